//! Pumping program model.
//!
//! A [`Program`] is an ordered list of [`PhaseStep`]s, stored on the pump in a
//! fixed table of 41 phase slots. Rate-class functions take their parameters
//! as separate `RAT` / `VOL` / `DIR` commands; every other function carries at
//! most one inline datum in the `FUN` command itself.
//!
//! In program files a step is a flat mapping:
//!
//! ```json
//! {"function": "rate", "rate": {"value": 5.0, "volume_unit": "ml", "time_unit": "min"},
//!  "volume": {"value": 2.0}, "direction": "infuse"}
//! {"function": "loop for", "count": 3}
//! {"function": "pause", "number": "trigger"}
//! ```

use crate::encode::{encode_number, parse_number, PAUSE_TENTHS};
use crate::symbols::{Symbol, DIRECTION, PHASE_FUNCTION, TIME_UNIT, VOLUME_UNIT};
use once_cell::sync::Lazy;
use pump_core::limits::{COUNT, NUMBER, PHASE, PHASE_SLOTS, TTL};
use pump_core::{PumpError, PumpResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keyword accepted in place of `0` for a pause that waits for a trigger.
pub const PAUSE_TRIGGER_KEYWORD: &str = "trigger";

// =============================================================================
// Phase functions
// =============================================================================

/// Kind of inline datum a phase function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatumKind {
    /// Target phase number (1-41).
    Phase,
    /// Loop repetition count (1-99).
    Count,
    /// Pause duration in seconds; `0` waits for a trigger.
    Number,
    /// TTL output level (0-1).
    Ttl,
}

impl DatumKind {
    /// Field name used for the datum in program files.
    pub fn key(&self) -> &'static str {
        match self {
            DatumKind::Phase => "phase",
            DatumKind::Count => "count",
            DatumKind::Number => "number",
            DatumKind::Ttl => "ttl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseFunction {
    Rate,
    Increment,
    Decrement,
    Stop,
    Jump,
    LoopFor,
    LoopStart,
    LoopEnd,
    Pause,
    If,
    EventTrap,
    EventReset,
    Beep,
    Output,
}

impl PhaseFunction {
    pub const ALL: [PhaseFunction; 14] = [
        PhaseFunction::Rate,
        PhaseFunction::Increment,
        PhaseFunction::Decrement,
        PhaseFunction::Stop,
        PhaseFunction::Jump,
        PhaseFunction::LoopFor,
        PhaseFunction::LoopStart,
        PhaseFunction::LoopEnd,
        PhaseFunction::Pause,
        PhaseFunction::If,
        PhaseFunction::EventTrap,
        PhaseFunction::EventReset,
        PhaseFunction::Beep,
        PhaseFunction::Output,
    ];

    /// Entry of this function in [`PHASE_FUNCTION`]; variants follow table order.
    fn symbol(&self) -> &'static Symbol {
        &PHASE_FUNCTION.entries()[*self as usize]
    }

    /// Device code.
    pub fn code(&self) -> &'static str {
        self.symbol().code()
    }

    pub fn from_code(code: &str) -> PumpResult<Self> {
        let symbol = PHASE_FUNCTION.lookup(code)?;
        Self::ALL
            .into_iter()
            .find(|f| f.code() == symbol.code())
            .ok_or_else(|| PumpError::UnknownCode {
                table: PHASE_FUNCTION.kind(),
                code: code.to_string(),
            })
    }

    pub fn from_name(name: &str) -> PumpResult<Self> {
        Self::from_code(PHASE_FUNCTION.encode(name)?)
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        self.symbol().name()
    }

    /// Rate-class functions take rate, volume and direction as follow-up commands.
    pub fn is_rate_class(&self) -> bool {
        matches!(
            self,
            PhaseFunction::Rate | PhaseFunction::Increment | PhaseFunction::Decrement
        )
    }

    pub fn datum_kind(&self) -> Option<DatumKind> {
        match self {
            PhaseFunction::Jump | PhaseFunction::If | PhaseFunction::EventTrap => {
                Some(DatumKind::Phase)
            }
            PhaseFunction::LoopFor => Some(DatumKind::Count),
            PhaseFunction::Pause => Some(DatumKind::Number),
            PhaseFunction::Output => Some(DatumKind::Ttl),
            _ => None,
        }
    }
}

// =============================================================================
// Inline datum
// =============================================================================

/// Pause length of a `pause` phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PauseDuration {
    /// Pause until an external trigger (encoded as `0`).
    UntilTrigger,
    /// Whole seconds, 1-99.
    Seconds(u8),
    /// Seconds with tenths, below ten seconds (`s.t`).
    Tenths(f64),
}

/// Inline datum of a non-rate phase function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseDatum {
    Phase(u8),
    Count(u8),
    Pause(PauseDuration),
    Ttl(u8),
}

/// Shortest fractional pause that does not round to the trigger code.
const MIN_TENTHS_PAUSE: f64 = 0.1;

/// `d.d` at the end of a `FUN` response: a revision 2 fractional pause.
static FRACTIONAL_PAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d\.\d$").unwrap());

impl PhaseDatum {
    pub fn kind(&self) -> DatumKind {
        match self {
            PhaseDatum::Phase(_) => DatumKind::Phase,
            PhaseDatum::Count(_) => DatumKind::Count,
            PhaseDatum::Pause(_) => DatumKind::Number,
            PhaseDatum::Ttl(_) => DatumKind::Ttl,
        }
    }

    /// Wire text of the datum, after range checks.
    pub fn encode(&self) -> PumpResult<String> {
        match *self {
            PhaseDatum::Phase(n) => Ok(PHASE.check(n.into())?.to_string()),
            PhaseDatum::Count(n) => Ok(COUNT.check(n.into())?.to_string()),
            PhaseDatum::Ttl(n) => Ok(TTL.check(n.into())?.to_string()),
            PhaseDatum::Pause(PauseDuration::UntilTrigger) => Ok("0".to_string()),
            PhaseDatum::Pause(PauseDuration::Seconds(n)) => {
                if n == 0 {
                    return Err(PumpError::Configuration(
                        "a zero-second pause waits for a trigger; use the trigger keyword"
                            .to_string(),
                    ));
                }
                Ok(NUMBER.check(n.into())?.to_string())
            }
            PhaseDatum::Pause(PauseDuration::Tenths(seconds)) => {
                let out_of_range = || PumpError::ValueOutOfRange {
                    field: PAUSE_TENTHS.field,
                    value: seconds,
                    min: MIN_TENTHS_PAUSE,
                    max: 9.9,
                };
                if seconds >= 10.0 {
                    return Err(out_of_range());
                }
                let text = encode_number(seconds, PAUSE_TENTHS)?;
                // "0" on the wire means wait for a trigger.
                if text == "0" {
                    return Err(out_of_range());
                }
                Ok(text)
            }
        }
    }

    /// Build a datum of `kind` from a program-file value.
    pub fn from_value(kind: DatumKind, value: &Value) -> PumpResult<Self> {
        let invalid =
            || PumpError::Configuration(format!("invalid {} datum: {}", kind.key(), value));
        match kind {
            DatumKind::Number => match value {
                Value::String(s) if s == PAUSE_TRIGGER_KEYWORD => {
                    Ok(PhaseDatum::Pause(PauseDuration::UntilTrigger))
                }
                Value::Number(n) => {
                    let seconds = n.as_f64().ok_or_else(invalid)?;
                    Ok(PhaseDatum::Pause(pause_from_seconds(seconds)?))
                }
                _ => Err(invalid()),
            },
            _ => {
                let n = value.as_u64().ok_or_else(invalid)?;
                let n = u8::try_from(n).map_err(|_| invalid())?;
                let datum = match kind {
                    DatumKind::Phase => PhaseDatum::Phase(n),
                    DatumKind::Count => PhaseDatum::Count(n),
                    _ => PhaseDatum::Ttl(n),
                };
                datum.encode()?;
                Ok(datum)
            }
        }
    }

    pub fn to_value(&self) -> Value {
        match *self {
            PhaseDatum::Phase(n) | PhaseDatum::Count(n) | PhaseDatum::Ttl(n) => Value::from(n),
            PhaseDatum::Pause(PauseDuration::UntilTrigger) => Value::from(PAUSE_TRIGGER_KEYWORD),
            PhaseDatum::Pause(PauseDuration::Seconds(n)) => Value::from(n),
            PhaseDatum::Pause(PauseDuration::Tenths(s)) => Value::from(s),
        }
    }

    /// Decode the wire text of a datum of `kind`.
    fn decode(kind: DatumKind, text: &str) -> PumpResult<Self> {
        if kind == DatumKind::Number && FRACTIONAL_PAUSE.is_match(text) {
            return Ok(PhaseDatum::Pause(PauseDuration::Tenths(parse_number(
                text, "pause",
            )?)));
        }
        let n: u8 = text
            .parse()
            .map_err(|_| PumpError::malformed(text, format!("invalid {} datum", kind.key())))?;
        Ok(match kind {
            DatumKind::Phase => PhaseDatum::Phase(n),
            DatumKind::Count => PhaseDatum::Count(n),
            DatumKind::Ttl => PhaseDatum::Ttl(n),
            DatumKind::Number if n == 0 => PhaseDatum::Pause(PauseDuration::UntilTrigger),
            DatumKind::Number => PhaseDatum::Pause(PauseDuration::Seconds(n)),
        })
    }
}

fn pause_from_seconds(seconds: f64) -> PumpResult<PauseDuration> {
    if seconds == 0.0 {
        Ok(PauseDuration::UntilTrigger)
    } else if seconds.fract() == 0.0 && (1.0..=99.0).contains(&seconds) {
        Ok(PauseDuration::Seconds(seconds as u8))
    } else if (0.0..10.0).contains(&seconds) {
        let pause = PauseDuration::Tenths(seconds);
        PhaseDatum::Pause(pause).encode()?;
        Ok(pause)
    } else {
        Err(PumpError::ValueOutOfRange {
            field: "pause",
            value: seconds,
            min: 0.0,
            max: NUMBER.max as f64,
        })
    }
}

/// Split a `FUN` response into function and inline datum.
///
/// The fractional pause form (`PAS2.5`) is matched on the last three
/// characters before the general rule that two trailing digits are a datum
/// (`JMP05`, `PAS00`).
pub fn decode_function(data: &str) -> PumpResult<(PhaseFunction, Option<PhaseDatum>)> {
    let split = |at: usize| data.is_char_boundary(at).then(|| data.split_at(at));

    let fractional = data
        .len()
        .checked_sub(3)
        .and_then(split)
        .filter(|(_, tail)| FRACTIONAL_PAUSE.is_match(tail));
    let trailing = data
        .len()
        .checked_sub(2)
        .and_then(split)
        .filter(|(_, tail)| tail.bytes().all(|b| b.is_ascii_digit()));

    let (code, datum_text) = match fractional.or(trailing) {
        Some((code, tail)) => (code, Some(tail)),
        None => (data, None),
    };

    let function = PhaseFunction::from_code(code)?;
    let datum = match (datum_text, function.datum_kind()) {
        (None, _) => None,
        (Some(text), Some(kind)) => Some(PhaseDatum::decode(kind, text)?),
        (Some(_), None) => {
            return Err(PumpError::malformed(
                data,
                format!("function {} does not take a datum", code),
            ))
        }
    };
    Ok((function, datum))
}

// =============================================================================
// Rate-class parameters
// =============================================================================

/// Pumping rate with optional units.
///
/// Units are sent only as a pair; a rate read back from the device always
/// carries both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSetting {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<String>,
}

impl RateSetting {
    pub fn new(value: f64, volume_unit: &str, time_unit: &str) -> Self {
        Self {
            value,
            volume_unit: Some(volume_unit.to_string()),
            time_unit: Some(time_unit.to_string()),
        }
    }

    fn canonicalize(&mut self) -> PumpResult<()> {
        match (&self.volume_unit, &self.time_unit) {
            (Some(v), Some(t)) => {
                self.volume_unit = Some(VOLUME_UNIT.canonical(v)?.to_string());
                self.time_unit = Some(TIME_UNIT.canonical(t)?.to_string());
                Ok(())
            }
            (None, None) => Ok(()),
            _ => Err(PumpError::Configuration(
                "rate needs both or neither of volume_unit and time_unit".to_string(),
            )),
        }
    }
}

/// Volume to dispense and/or volume unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSetting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl VolumeSetting {
    pub fn new(value: f64, unit: &str) -> Self {
        Self {
            value: Some(value),
            unit: Some(unit.to_string()),
        }
    }

    fn canonicalize(&mut self) -> PumpResult<()> {
        if self.value.is_none() && self.unit.is_none() {
            return Err(PumpError::Configuration(
                "volume needs a value or a unit".to_string(),
            ));
        }
        if let Some(unit) = &self.unit {
            self.unit = Some(VOLUME_UNIT.canonical(unit)?.to_string());
        }
        Ok(())
    }
}

// =============================================================================
// PhaseStep / Program
// =============================================================================

/// One slot of a pumping program.
///
/// Symbolic fields hold canonical names; [`PhaseStep::validate`] resolves
/// aliases. Construct via the `rate`/`control` helpers or from a program
/// file mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct PhaseStep {
    pub function: PhaseFunction,
    pub datum: Option<PhaseDatum>,
    pub rate: Option<RateSetting>,
    pub volume: Option<VolumeSetting>,
    pub direction: Option<String>,
}

impl PhaseStep {
    /// A step with no datum and no rate parameters.
    pub fn new(function: PhaseFunction) -> Self {
        Self {
            function,
            datum: None,
            rate: None,
            volume: None,
            direction: None,
        }
    }

    pub fn stop() -> Self {
        Self::new(PhaseFunction::Stop)
    }

    /// A non-rate step carrying one inline datum.
    pub fn with_datum(function: PhaseFunction, datum: PhaseDatum) -> Self {
        Self {
            datum: Some(datum),
            ..Self::new(function)
        }
    }

    pub fn with_rate(mut self, rate: RateSetting) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_volume(mut self, volume: VolumeSetting) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_direction(mut self, direction: &str) -> Self {
        self.direction = Some(direction.to_string());
        self
    }

    /// Check field/function compatibility and canonicalize symbolic names.
    pub fn validate(&mut self) -> PumpResult<()> {
        let rate_fields = self.rate.is_some() || self.volume.is_some() || self.direction.is_some();
        if self.function.is_rate_class() {
            if self.datum.is_some() {
                return Err(PumpError::Configuration(format!(
                    "rate-class function {} takes no inline datum",
                    self.function.code()
                )));
            }
        } else if rate_fields {
            return Err(PumpError::Configuration(format!(
                "function {} takes no rate, volume or direction",
                self.function.code()
            )));
        }

        if let Some(datum) = &self.datum {
            if self.function.datum_kind() != Some(datum.kind()) {
                return Err(PumpError::Configuration(format!(
                    "function {} does not take a {} datum",
                    self.function.code(),
                    datum.kind().key()
                )));
            }
            datum.encode()?;
        }
        if let Some(rate) = &mut self.rate {
            rate.canonicalize()?;
        }
        if let Some(volume) = &mut self.volume {
            volume.canonicalize()?;
        }
        if let Some(direction) = &self.direction {
            self.direction = Some(DIRECTION.canonical(direction)?.to_string());
        }
        Ok(())
    }

    /// Parse a program-file mapping.
    ///
    /// Each function accepts only its own datum key, so any other key,
    /// including a second datum kind, is rejected as unknown.
    pub fn from_fields(fields: &Map<String, Value>) -> PumpResult<Self> {
        let name = fields
            .get("function")
            .and_then(Value::as_str)
            .ok_or_else(|| PumpError::Configuration("phase step needs a function".to_string()))?;
        let mut step = PhaseStep::new(PhaseFunction::from_name(name)?);

        for (key, value) in fields {
            match key.as_str() {
                "function" => {}
                "rate" if step.function.is_rate_class() => {
                    step.rate = Some(serde_json::from_value(value.clone())?);
                }
                "volume" if step.function.is_rate_class() => {
                    step.volume = Some(serde_json::from_value(value.clone())?);
                }
                "direction" if step.function.is_rate_class() => {
                    let direction = value.as_str().ok_or_else(|| {
                        PumpError::Configuration(format!("invalid direction: {}", value))
                    })?;
                    step.direction = Some(direction.to_string());
                }
                other => match step.function.datum_kind() {
                    Some(kind) if kind.key() == other => {
                        step.datum = Some(PhaseDatum::from_value(kind, value)?);
                    }
                    _ => {
                        return Err(PumpError::Configuration(format!(
                            "unknown field '{}' for function '{}'",
                            other, name
                        )))
                    }
                },
            }
        }
        step.validate()?;
        Ok(step)
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        let name = self.function.name();
        fields.insert("function".to_string(), Value::from(name));
        if let Some(datum) = &self.datum {
            fields.insert(datum.kind().key().to_string(), datum.to_value());
        }
        if let Some(rate) = &self.rate {
            fields.insert("rate".to_string(), serde_json::to_value(rate).unwrap_or_default());
        }
        if let Some(volume) = &self.volume {
            fields.insert(
                "volume".to_string(),
                serde_json::to_value(volume).unwrap_or_default(),
            );
        }
        if let Some(direction) = &self.direction {
            fields.insert("direction".to_string(), Value::from(direction.as_str()));
        }
        fields
    }
}

impl TryFrom<Map<String, Value>> for PhaseStep {
    type Error = PumpError;

    fn try_from(fields: Map<String, Value>) -> PumpResult<Self> {
        PhaseStep::from_fields(&fields)
    }
}

impl From<PhaseStep> for Map<String, Value> {
    fn from(step: PhaseStep) -> Self {
        step.to_fields()
    }
}

/// An ordered pumping program; element `i` occupies phase slot `i + 1`.
pub type Program = Vec<PhaseStep>;

/// Check that a program fits the device phase table.
pub fn check_program_length(program: &[PhaseStep]) -> PumpResult<()> {
    if program.len() > PHASE_SLOTS as usize {
        return Err(PumpError::Configuration(format!(
            "program has {} phases, the pump holds {}",
            program.len(),
            PHASE_SLOTS
        )));
    }
    Ok(())
}
