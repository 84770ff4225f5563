//! Program compiler and extractor.
//!
//! The compiler turns a [`Program`] into the address-scoped command sequence
//! that stores it in the pump's phase table: for phase `i`, `PHN i`, then
//! `FUN`, then for rate-class steps the present follow-ups in the order rate,
//! volume, direction. Every step is validated before any command is built.
//!
//! The extractor walks all 41 phase slots and rebuilds the program, dropping
//! the unused stop slots at the end of the table.

use crate::commands::{
    direction_command, function_command, phase_command, rate_command, volume_commands,
};
use crate::frame::Command;
use crate::phase::{check_program_length, PhaseFunction, PhaseStep, Program};
use crate::session::PumpSession;
use pump_core::limits::PHASE_SLOTS;
use pump_core::PumpResult;
use tracing::instrument;

/// Build the command sequence that writes `program` to the pump at `address`.
pub fn compile_program(address: u8, program: &[PhaseStep]) -> PumpResult<Vec<Command>> {
    check_program_length(program)?;
    let steps = program
        .iter()
        .cloned()
        .map(|mut step| step.validate().map(|()| step))
        .collect::<PumpResult<Vec<_>>>()?;

    let mut commands = Vec::with_capacity(steps.len() * 2);
    for (step, phase) in steps.iter().zip(1u8..) {
        commands.push(phase_command(address, phase)?);
        commands.push(function_command(address, step.function, step.datum.as_ref())?);
        if let Some(rate) = &step.rate {
            commands.push(rate_command(address, rate)?);
        }
        if let Some(volume) = &step.volume {
            commands.extend(volume_commands(address, volume)?);
        }
        if let Some(direction) = &step.direction {
            commands.push(direction_command(address, direction)?);
        }
    }
    Ok(commands)
}

/// Drop the unused phase slots at the end of a program read from a pump.
///
/// The first stop of the trailing run of stops terminates the program and is
/// kept; everything after it is unused. Stops between other steps are never
/// removed. A table holding only stops reduces to a single stop.
pub fn trim_unused_phases(mut program: Program) -> Program {
    let is_stop = |step: &PhaseStep| step.function == PhaseFunction::Stop;
    let keep = match program.iter().rposition(|step| !is_stop(step)) {
        Some(last_active) => last_active + 2,
        None => 1,
    };
    program.truncate(keep);
    program
}

impl PumpSession {
    /// Store `program` in the phase table of the pump at `address`.
    ///
    /// Slots beyond the program keep whatever they held before.
    #[instrument(skip(self, program), fields(phases = program.len()), err)]
    pub async fn write_program(&self, address: u8, program: &[PhaseStep]) -> PumpResult<()> {
        let commands = compile_program(address, program)?;
        for command in &commands {
            self.transact(command).await?;
        }
        tracing::debug!(address, commands = commands.len(), "Program written");
        Ok(())
    }

    /// Read the phase table of the pump at `address`.
    #[instrument(skip(self), err)]
    pub async fn read_program(&self, address: u8) -> PumpResult<Program> {
        let mut program = Program::with_capacity(PHASE_SLOTS.into());
        for phase in 1..=PHASE_SLOTS {
            self.set_phase(address, phase).await?;
            let (function, datum) = self.get_function(address).await?;
            let mut step = PhaseStep::new(function);
            step.datum = datum;
            if function.is_rate_class() {
                step.rate = Some(self.get_rate(address).await?);
                step.volume = Some(self.get_volume(address).await?);
                step.direction = Some(self.get_direction(address).await?.to_string());
            }
            program.push(step);
        }
        let program = trim_unused_phases(program);
        tracing::debug!(address, phases = program.len(), "Program read");
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{PhaseDatum, RateSetting, VolumeSetting};
    use pump_core::PumpError;

    fn encoded(commands: &[Command]) -> Vec<String> {
        commands
            .iter()
            .map(|c| c.encode().unwrap().trim_end().to_string())
            .collect()
    }

    fn rate_step() -> PhaseStep {
        PhaseStep::new(PhaseFunction::Rate)
            .with_rate(RateSetting::new(5.0, "ml", "min"))
            .with_volume(VolumeSetting::new(2.0, "ml"))
            .with_direction("infuse")
    }

    #[test]
    fn test_compile_orders_follow_ups() {
        let program = vec![
            rate_step(),
            PhaseStep::with_datum(PhaseFunction::Jump, PhaseDatum::Phase(1)),
            PhaseStep::stop(),
        ];
        let commands = compile_program(2, &program).unwrap();
        assert_eq!(
            encoded(&commands),
            vec![
                "2PHN1", "2FUNRAT", "2RAT5MM", "2VOL2", "2VOLML", "2DIRINF", "2PHN2",
                "2FUNJMP1", "2PHN3", "2FUNSTP",
            ]
        );
    }

    #[test]
    fn test_compile_rate_step_without_follow_ups() {
        let commands = compile_program(0, &[PhaseStep::new(PhaseFunction::Decrement)]).unwrap();
        assert_eq!(encoded(&commands), vec!["0PHN1", "0FUNDEC"]);
    }

    #[test]
    fn test_compile_validates_before_emitting() {
        let program = vec![
            rate_step(),
            PhaseStep::with_datum(PhaseFunction::Jump, PhaseDatum::Phase(42)),
        ];
        assert!(matches!(
            compile_program(0, &program),
            Err(PumpError::ValueOutOfRange { field: "phase", .. })
        ));
    }

    #[test]
    fn test_compile_rejects_oversized_program() {
        let program = vec![PhaseStep::stop(); 42];
        assert!(matches!(
            compile_program(0, &program),
            Err(PumpError::Configuration(_))
        ));
    }

    #[test]
    fn test_trim_keeps_terminating_stop() {
        let mut program = vec![
            rate_step(),
            PhaseStep::with_datum(PhaseFunction::Jump, PhaseDatum::Phase(1)),
        ];
        program.extend(vec![PhaseStep::stop(); 39]);
        let trimmed = trim_unused_phases(program);
        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[2].function, PhaseFunction::Stop);
    }

    #[test]
    fn test_trim_keeps_internal_stop() {
        let mut program = vec![
            rate_step(),
            PhaseStep::stop(),
            PhaseStep::with_datum(PhaseFunction::Jump, PhaseDatum::Phase(1)),
        ];
        program.extend(vec![PhaseStep::stop(); 38]);
        let trimmed = trim_unused_phases(program);
        assert_eq!(trimmed.len(), 4);
        assert_eq!(trimmed[1].function, PhaseFunction::Stop);
        assert_eq!(trimmed[2].function, PhaseFunction::Jump);
    }

    #[test]
    fn test_trim_edge_cases() {
        assert_eq!(trim_unused_phases(vec![PhaseStep::stop(); 41]).len(), 1);
        assert!(trim_unused_phases(Vec::new()).is_empty());
        let full = vec![rate_step(); 41];
        assert_eq!(trim_unused_phases(full).len(), 41);
    }
}
