//! Typed accessors for every device parameter.
//!
//! Each accessor is one transaction. Symbolic values go through the symbol
//! tables and numeric values through the field encoders before anything is
//! written to the bus.

use crate::encode::{encode_number, parse_number, DIAMETER, RATE, VOLUME};
use crate::frame::{Command, Mnemonic, Response, Status};
use crate::phase::{decode_function, PhaseDatum, PhaseFunction, RateSetting, VolumeSetting};
use crate::session::PumpSession;
use crate::symbols::{DIRECTION, TIME_UNIT, VOLUME_UNIT};
use crate::trigger::{decode_trigger, TriggerFormat, TriggerReading, TriggerSetup};
use pump_core::limits::{COUNT, PHASE, SAFE_TIMEOUT, TTL};
use pump_core::{PumpError, PumpResult};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Programmable TTL output pin.
pub const TTL_OUTPUT_PIN: u8 = 5;
/// TTL input pins that can be queried.
pub const TTL_INPUT_PINS: [u8; 4] = [2, 3, 4, 6];

/// Suffix of a volume unit on the wire (`ML`, `UL`).
const LITRE: char = 'L';

/// Communication mode. Safe mode stops the pump if no valid command arrives
/// within `timeout` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ComMode {
    Basic,
    Safe { timeout: u8 },
}

impl ComMode {
    fn encode(&self) -> PumpResult<String> {
        match *self {
            ComMode::Basic => Ok("0".to_string()),
            ComMode::Safe { timeout: 0 } => Err(PumpError::Configuration(
                "safe mode needs a timeout of at least one second".to_string(),
            )),
            ComMode::Safe { timeout } => Ok(SAFE_TIMEOUT.check(timeout.into())?.to_string()),
        }
    }

    fn decode(data: &str) -> PumpResult<Self> {
        let timeout: u8 = data
            .parse()
            .map_err(|_| PumpError::malformed(data, "invalid safe mode timeout"))?;
        Ok(match timeout {
            0 => ComMode::Basic,
            timeout => ComMode::Safe { timeout },
        })
    }
}

/// Volume dispensed since the counters were last cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispensedVolume {
    pub infused: f64,
    pub withdrawn: f64,
    pub unit: String,
}

/// Split `<value><U|M>L` into value text and canonical unit name.
fn split_volume_unit(data: &str) -> PumpResult<(&str, &'static str)> {
    let malformed = || PumpError::malformed(data, "expected a volume with unit");
    let value = data.strip_suffix(LITRE).ok_or_else(malformed)?;
    let letter_at = value
        .char_indices()
        .last()
        .map(|(i, _)| i)
        .ok_or_else(malformed)?;
    let (value, letter) = value.split_at(letter_at);
    Ok((value, VOLUME_UNIT.decode(letter)?))
}

fn parse_flag(response: &Response) -> PumpResult<bool> {
    match response.require_data()? {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(PumpError::malformed(other, "expected 0 or 1")),
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

// =============================================================================
// Command builders
// =============================================================================
//
// Shared by the accessors below and the program compiler. Every argument is
// range-checked and encoded here, so a builder that returns `Ok` yields a
// command the pump can accept.

pub(crate) fn phase_command(address: u8, phase: u8) -> PumpResult<Command> {
    let phase = PHASE.check(phase.into())?;
    Ok(Command::new(address, Mnemonic::Phase).arg(phase.to_string()))
}

pub(crate) fn function_command(
    address: u8,
    function: PhaseFunction,
    datum: Option<&PhaseDatum>,
) -> PumpResult<Command> {
    let command = Command::new(address, Mnemonic::Function).arg(function.code());
    match datum {
        None => Ok(command),
        Some(d) if function.datum_kind() == Some(d.kind()) => Ok(command.arg(d.encode()?)),
        Some(d) => Err(PumpError::Configuration(format!(
            "function {} does not take a {} datum",
            function.code(),
            d.kind().key()
        ))),
    }
}

pub(crate) fn rate_command(address: u8, rate: &RateSetting) -> PumpResult<Command> {
    let command = Command::new(address, Mnemonic::Rate).arg(encode_number(rate.value, RATE)?);
    match (&rate.volume_unit, &rate.time_unit) {
        (Some(v), Some(t)) => Ok(command
            .arg(VOLUME_UNIT.encode(v)?)
            .arg(TIME_UNIT.encode(t)?)),
        (None, None) => Ok(command),
        _ => Err(PumpError::Configuration(
            "rate needs both or neither of volume_unit and time_unit".to_string(),
        )),
    }
}

/// Value first, then unit; one command per present part.
pub(crate) fn volume_commands(address: u8, volume: &VolumeSetting) -> PumpResult<Vec<Command>> {
    if volume.value.is_none() && volume.unit.is_none() {
        return Err(PumpError::Configuration(
            "volume needs a value or a unit".to_string(),
        ));
    }
    let mut commands = Vec::with_capacity(2);
    if let Some(value) = volume.value {
        commands.push(Command::new(address, Mnemonic::Volume).arg(encode_number(value, VOLUME)?));
    }
    if let Some(unit) = &volume.unit {
        let code = VOLUME_UNIT.encode(unit)?;
        commands.push(Command::new(address, Mnemonic::Volume).arg(format!("{}{}", code, LITRE)));
    }
    Ok(commands)
}

pub(crate) fn direction_command(address: u8, direction: &str) -> PumpResult<Command> {
    Ok(Command::new(address, Mnemonic::Direction).arg(DIRECTION.encode(direction)?))
}

impl PumpSession {
    /// Status query (empty mnemonic).
    pub async fn get_status(&self, address: u8) -> PumpResult<Status> {
        Ok(self.send(address, Mnemonic::Status, &[]).await?.status)
    }

    // =========================================================================
    // Syringe and rate parameters
    // =========================================================================

    /// Syringe inside diameter in mm.
    pub async fn get_diameter(&self, address: u8) -> PumpResult<f64> {
        let response = self.send(address, Mnemonic::Diameter, &[]).await?;
        parse_number(response.require_data()?, DIAMETER.field)
    }

    pub async fn set_diameter(&self, address: u8, diameter: f64) -> PumpResult<()> {
        let value = encode_number(diameter, DIAMETER)?;
        self.send(address, Mnemonic::Diameter, &[&value]).await?;
        Ok(())
    }

    /// Volume to be dispensed and its unit.
    pub async fn get_volume(&self, address: u8) -> PumpResult<VolumeSetting> {
        let response = self.send(address, Mnemonic::Volume, &[]).await?;
        let (value, unit) = split_volume_unit(response.require_data()?)?;
        Ok(VolumeSetting::new(parse_number(value, VOLUME.field)?, unit))
    }

    /// Set the volume value and/or unit; each present part is one command.
    pub async fn set_volume(&self, address: u8, volume: &VolumeSetting) -> PumpResult<()> {
        for command in volume_commands(address, volume)? {
            self.transact(&command).await?;
        }
        Ok(())
    }

    pub async fn get_rate(&self, address: u8) -> PumpResult<RateSetting> {
        let response = self.send(address, Mnemonic::Rate, &[]).await?;
        let data = response.require_data()?;
        if data.len() < 3 || !data.is_char_boundary(data.len() - 2) {
            return Err(PumpError::malformed(data, "expected a rate with units"));
        }
        let (value, units) = data.split_at(data.len() - 2);
        let (volume_unit, time_unit) = units.split_at(1);
        Ok(RateSetting::new(
            parse_number(value, RATE.field)?,
            VOLUME_UNIT.decode(volume_unit)?,
            TIME_UNIT.decode(time_unit)?,
        ))
    }

    /// Set the pumping rate; units are sent only when both are given.
    pub async fn set_rate(&self, address: u8, rate: &RateSetting) -> PumpResult<()> {
        self.transact(&rate_command(address, rate)?).await?;
        Ok(())
    }

    /// Pumping direction, canonical name.
    pub async fn get_direction(&self, address: u8) -> PumpResult<&'static str> {
        let response = self.send(address, Mnemonic::Direction, &[]).await?;
        DIRECTION.decode(response.require_data()?)
    }

    pub async fn set_direction(&self, address: u8, direction: &str) -> PumpResult<()> {
        self.transact(&direction_command(address, direction)?).await?;
        Ok(())
    }

    // =========================================================================
    // Program phases
    // =========================================================================

    pub async fn get_phase(&self, address: u8) -> PumpResult<u8> {
        let response = self.send(address, Mnemonic::Phase, &[]).await?;
        let data = response.require_data()?;
        data.parse()
            .map_err(|_| PumpError::malformed(data, "invalid phase number"))
    }

    pub async fn set_phase(&self, address: u8, phase: u8) -> PumpResult<()> {
        self.transact(&phase_command(address, phase)?).await?;
        Ok(())
    }

    /// Function of the current phase and its inline datum.
    pub async fn get_function(
        &self,
        address: u8,
    ) -> PumpResult<(PhaseFunction, Option<PhaseDatum>)> {
        let response = self.send(address, Mnemonic::Function, &[]).await?;
        decode_function(response.require_data()?)
    }

    pub async fn set_function(
        &self,
        address: u8,
        function: PhaseFunction,
        datum: Option<&PhaseDatum>,
    ) -> PumpResult<()> {
        self.transact(&function_command(address, function, datum)?)
            .await?;
        Ok(())
    }

    /// Start the pumping program.
    #[instrument(skip(self), err)]
    pub async fn start_program(&self, address: u8) -> PumpResult<()> {
        self.send(address, Mnemonic::Run, &[]).await?;
        Ok(())
    }

    /// Stop (or pause) the pumping program.
    #[instrument(skip(self), err)]
    pub async fn stop_program(&self, address: u8) -> PumpResult<()> {
        self.send(address, Mnemonic::Stop, &[]).await?;
        Ok(())
    }

    // =========================================================================
    // Device settings
    // =========================================================================

    pub async fn get_com_mode(&self, address: u8) -> PumpResult<ComMode> {
        let response = self.send(address, Mnemonic::Safe, &[]).await?;
        ComMode::decode(response.require_data()?)
    }

    pub async fn set_com_mode(&self, address: u8, mode: ComMode) -> PumpResult<()> {
        let arg = mode.encode()?;
        self.send(address, Mnemonic::Safe, &[&arg]).await?;
        Ok(())
    }

    /// Whether alarms sound the buzzer.
    pub async fn get_alarm(&self, address: u8) -> PumpResult<bool> {
        parse_flag(&self.send(address, Mnemonic::Alarm, &[]).await?)
    }

    pub async fn set_alarm(&self, address: u8, buzzer: bool) -> PumpResult<()> {
        self.send(address, Mnemonic::Alarm, &[flag(buzzer)]).await?;
        Ok(())
    }

    /// Whether the program restarts after a power failure.
    pub async fn get_power_fail(&self, address: u8) -> PumpResult<bool> {
        parse_flag(&self.send(address, Mnemonic::PowerFail, &[]).await?)
    }

    pub async fn set_power_fail(&self, address: u8, restart: bool) -> PumpResult<()> {
        self.send(address, Mnemonic::PowerFail, &[flag(restart)])
            .await?;
        Ok(())
    }

    pub async fn get_trigger(&self, address: u8, format: TriggerFormat) -> PumpResult<TriggerReading> {
        let response = self.send(address, Mnemonic::Trigger, &[]).await?;
        decode_trigger(response.require_data()?, format)
    }

    pub async fn set_trigger(&self, address: u8, setup: &TriggerSetup) -> PumpResult<()> {
        let code = setup.encode()?;
        self.send(address, Mnemonic::Trigger, &[code]).await?;
        Ok(())
    }

    pub async fn get_key_beep(&self, address: u8) -> PumpResult<bool> {
        parse_flag(&self.send(address, Mnemonic::KeyBeep, &[]).await?)
    }

    pub async fn set_key_beep(&self, address: u8, enabled: bool) -> PumpResult<()> {
        self.send(address, Mnemonic::KeyBeep, &[flag(enabled)])
            .await?;
        Ok(())
    }

    // =========================================================================
    // I/O, buzzer, counters
    // =========================================================================

    /// Drive the programmable output pin.
    pub async fn set_ttl_output(&self, address: u8, level: u8) -> PumpResult<()> {
        let level = TTL.check(level.into())?.to_string();
        let pin = TTL_OUTPUT_PIN.to_string();
        self.send(address, Mnemonic::Output, &[&pin, &level]).await?;
        Ok(())
    }

    /// Level of a TTL input pin; `true` is high.
    pub async fn get_ttl_input(&self, address: u8, pin: u8) -> PumpResult<bool> {
        if !TTL_INPUT_PINS.contains(&pin) {
            return Err(PumpError::Configuration(format!(
                "TTL input pin {} not supported, use one of {:?}",
                pin, TTL_INPUT_PINS
            )));
        }
        let pin = pin.to_string();
        parse_flag(&self.send(address, Mnemonic::Input, &[&pin]).await?)
    }

    /// Whether the buzzer is sounding or beeping.
    pub async fn get_buzzer(&self, address: u8) -> PumpResult<bool> {
        parse_flag(&self.send(address, Mnemonic::Buzz, &[]).await?)
    }

    /// Switch the buzzer; `beeps: None` sounds it continuously.
    pub async fn set_buzzer(&self, address: u8, on: bool, beeps: Option<u8>) -> PumpResult<()> {
        let beeps = match beeps {
            Some(n) => COUNT.check(n.into())?.to_string(),
            None => "0".to_string(),
        };
        self.send(address, Mnemonic::Buzz, &[flag(on), &beeps])
            .await?;
        Ok(())
    }

    /// Infused and withdrawn volume counters.
    pub async fn get_dispensed(&self, address: u8) -> PumpResult<DispensedVolume> {
        let response = self.send(address, Mnemonic::Dispensed, &[]).await?;
        let data = response.require_data()?;
        let (counters, unit) = split_volume_unit(data)?;
        let (infused, withdrawn) = counters
            .strip_prefix('I')
            .and_then(|rest| rest.split_once('W'))
            .ok_or_else(|| PumpError::malformed(data, "expected I<volume>W<volume>"))?;
        Ok(DispensedVolume {
            infused: parse_number(infused, VOLUME.field)?,
            withdrawn: parse_number(withdrawn, VOLUME.field)?,
            unit: unit.to_string(),
        })
    }

    /// Reset the dispensed counter for one direction.
    pub async fn clear_dispensed(&self, address: u8, direction: &str) -> PumpResult<()> {
        let code = DIRECTION.encode(direction)?;
        if DIRECTION.decode(code)? == "reverse" {
            return Err(PumpError::Configuration(
                "dispensed counters exist for infuse and withdraw only".to_string(),
            ));
        }
        self.send(address, Mnemonic::ClearDispensed, &[code]).await?;
        Ok(())
    }

    pub async fn get_firmware_version(&self, address: u8) -> PumpResult<String> {
        let response = self.send(address, Mnemonic::Version, &[]).await?;
        Ok(response.require_data()?.to_string())
    }
}
