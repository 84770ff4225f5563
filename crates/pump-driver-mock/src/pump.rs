//! Device-side model of one pump.
//!
//! `SimulatedPump` parses request lines the way the firmware does and answers
//! with framed responses. Rate, volume, direction and function are stored per
//! phase slot, like the real phase table.

use pump_core::limits::{PHASE, PHASE_SLOTS, SAFE_TIMEOUT};
use pump_core::DeviceErrorKind;

const STX: char = '\u{2}';
const ETX: char = '\u{3}';

/// Mnemonics the firmware recognizes.
const MNEMONICS: [&str; 19] = [
    "DIA", "VOL", "PHN", "FUN", "RAT", "DIR", "SAF", "AL", "PF", "TRG", "BP", "OUT", "IN", "BUZ",
    "RUN", "STP", "DIS", "CLD", "VER",
];

const FUNCTIONS: [&str; 14] = [
    "RAT", "INC", "DEC", "STP", "JMP", "LOP", "LPS", "LPE", "PAS", "IF", "EVN", "EVR", "BEP", "OUT",
];

const TRIGGERS: [&str; 13] = [
    "FT", "FH", "LE", "T2", "ST", "St", "SF", "SR", "LO", "HI", "SL", "SH", "OF",
];

/// Wire token of a device error.
pub fn error_token(kind: DeviceErrorKind) -> &'static str {
    match kind {
        DeviceErrorKind::CommandNotRecognized => "",
        DeviceErrorKind::CommandNotAvailable => "NA",
        DeviceErrorKind::DataOutOfRange => "OOR",
        DeviceErrorKind::InvalidComPacket => "COM",
        DeviceErrorKind::CommandIgnored => "IGN",
    }
}

/// One slot of the phase table.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSlot {
    pub function: String,
    /// Inline datum as the firmware echoes it: two digits, or `d.d` for a
    /// fractional pause.
    pub datum: Option<String>,
    pub rate: f64,
    pub rate_units: (char, char),
    pub volume: f64,
    pub volume_unit: char,
    pub direction: String,
}

impl Default for PhaseSlot {
    fn default() -> Self {
        Self {
            function: "STP".to_string(),
            datum: None,
            rate: 0.0,
            rate_units: ('M', 'M'),
            volume: 0.0,
            volume_unit: 'M',
            direction: "INF".to_string(),
        }
    }
}

/// Full state of a simulated pump.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPump {
    pub diameter: f64,
    pub phases: Vec<PhaseSlot>,
    /// Zero-based index of the current phase.
    pub current_phase: usize,
    /// Prompt letter (`S`, `I`, `W`, ...).
    pub prompt: char,
    pub safe_timeout: u8,
    pub alarm_enabled: bool,
    pub power_fail: bool,
    pub trigger: String,
    pub key_beep: bool,
    pub buzzer: bool,
    pub ttl_output: u8,
    /// Levels of input pins 2, 3, 4 and 6.
    pub ttl_inputs: [bool; 4],
    pub dispensed: (f64, f64),
    pub firmware: String,
    /// Alarm letter reported with the next response.
    pub pending_alarm: Option<char>,
    /// Error reported instead of executing the next command.
    pub pending_error: Option<DeviceErrorKind>,
}

impl Default for SimulatedPump {
    fn default() -> Self {
        Self {
            diameter: 0.0,
            phases: vec![PhaseSlot::default(); PHASE_SLOTS.into()],
            current_phase: 0,
            prompt: 'S',
            safe_timeout: 0,
            alarm_enabled: false,
            power_fail: false,
            trigger: "FT".to_string(),
            key_beep: true,
            buzzer: false,
            ttl_output: 0,
            ttl_inputs: [false; 4],
            dispensed: (0.0, 0.0),
            firmware: "NE1000V3.934".to_string(),
            pending_alarm: None,
            pending_error: None,
        }
    }
}

type Reply = Result<Option<String>, DeviceErrorKind>;

fn parse_flag(arg: &str) -> Result<bool, DeviceErrorKind> {
    match arg {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(DeviceErrorKind::DataOutOfRange),
    }
}

/// Accept a number of at most four digits, as the firmware does.
fn parse_value(arg: &str) -> Result<f64, DeviceErrorKind> {
    let digits = arg.chars().filter(char::is_ascii_digit).count();
    match arg.parse::<f64>() {
        Ok(v) if digits <= 4 && (0.0..=9999.0).contains(&v) => Ok(v),
        _ => Err(DeviceErrorKind::DataOutOfRange),
    }
}

fn flag(value: bool) -> String {
    u8::from(value).to_string()
}

impl SimulatedPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &PhaseSlot {
        &self.phases[self.current_phase]
    }

    fn phase_mut(&mut self) -> &mut PhaseSlot {
        &mut self.phases[self.current_phase]
    }

    /// Answer one request body (address already stripped).
    pub fn handle(&mut self, address: u8, body: &str) -> String {
        let reply = match self.pending_error.take() {
            Some(kind) => Err(kind),
            None => self.execute(body),
        };

        let status = match self.pending_alarm.take() {
            Some(alarm) => format!("A?{}", alarm),
            None => self.prompt.to_string(),
        };
        let data = match reply {
            Ok(data) => data.unwrap_or_default(),
            Err(kind) => format!("?{}", error_token(kind)),
        };
        format!("{}{:02}{}{}{}", STX, address, status, data, ETX)
    }

    fn execute(&mut self, body: &str) -> Reply {
        if body.is_empty() {
            return Ok(None);
        }
        let mnemonic = MNEMONICS
            .iter()
            .find(|m| body.starts_with(*m))
            .ok_or(DeviceErrorKind::CommandNotRecognized)?;
        let arg = &body[mnemonic.len()..];

        match *mnemonic {
            "DIA" if arg.is_empty() => Ok(Some(format!("{:.3}", self.diameter))),
            "DIA" => {
                self.diameter = parse_value(arg)?;
                Ok(None)
            }
            "VOL" if arg.is_empty() => {
                let slot = self.phase();
                Ok(Some(format!("{:.3}{}L", slot.volume, slot.volume_unit)))
            }
            "VOL" if arg == "UL" || arg == "ML" => {
                self.phase_mut().volume_unit = arg.chars().next().unwrap_or('M');
                Ok(None)
            }
            "VOL" => {
                self.phase_mut().volume = parse_value(arg)?;
                Ok(None)
            }
            "PHN" if arg.is_empty() => Ok(Some(format!("{:02}", self.current_phase + 1))),
            "PHN" => {
                let phase: u32 = arg.parse().map_err(|_| DeviceErrorKind::DataOutOfRange)?;
                if !PHASE.contains(phase) {
                    return Err(DeviceErrorKind::DataOutOfRange);
                }
                self.current_phase = phase as usize - 1;
                Ok(None)
            }
            "FUN" if arg.is_empty() => {
                let slot = self.phase();
                Ok(Some(format!(
                    "{}{}",
                    slot.function,
                    slot.datum.as_deref().unwrap_or("")
                )))
            }
            "FUN" => self.set_function(arg),
            "RAT" if arg.is_empty() => {
                let slot = self.phase();
                Ok(Some(format!(
                    "{:.3}{}{}",
                    slot.rate, slot.rate_units.0, slot.rate_units.1
                )))
            }
            "RAT" => self.set_rate(arg),
            "DIR" if arg.is_empty() => Ok(Some(self.phase().direction.clone())),
            "DIR" => {
                let next = match (arg, self.phase().direction.as_str()) {
                    ("INF", _) | ("REV", "WDR") => "INF",
                    ("WDR", _) | ("REV", "INF") => "WDR",
                    _ => return Err(DeviceErrorKind::DataOutOfRange),
                };
                self.phase_mut().direction = next.to_string();
                Ok(None)
            }
            "SAF" if arg.is_empty() => Ok(Some(format!("{:03}", self.safe_timeout))),
            "SAF" => {
                let timeout: u32 = arg.parse().map_err(|_| DeviceErrorKind::DataOutOfRange)?;
                if !SAFE_TIMEOUT.contains(timeout) {
                    return Err(DeviceErrorKind::DataOutOfRange);
                }
                self.safe_timeout = timeout as u8;
                Ok(None)
            }
            "AL" if arg.is_empty() => Ok(Some(flag(self.alarm_enabled))),
            "AL" => {
                self.alarm_enabled = parse_flag(arg)?;
                Ok(None)
            }
            "PF" if arg.is_empty() => Ok(Some(flag(self.power_fail))),
            "PF" => {
                self.power_fail = parse_flag(arg)?;
                Ok(None)
            }
            "BP" if arg.is_empty() => Ok(Some(flag(self.key_beep))),
            "BP" => {
                self.key_beep = parse_flag(arg)?;
                Ok(None)
            }
            "TRG" if arg.is_empty() => Ok(Some(self.trigger.clone())),
            "TRG" if TRIGGERS.contains(&arg) => {
                self.trigger = arg.to_string();
                Ok(None)
            }
            "TRG" => Err(DeviceErrorKind::DataOutOfRange),
            "OUT" => {
                let level = arg.strip_prefix('5').ok_or(DeviceErrorKind::DataOutOfRange)?;
                self.ttl_output = u8::from(parse_flag(level)?);
                Ok(None)
            }
            "IN" => {
                let index = match arg {
                    "2" => 0,
                    "3" => 1,
                    "4" => 2,
                    "6" => 3,
                    _ => return Err(DeviceErrorKind::DataOutOfRange),
                };
                Ok(Some(flag(self.ttl_inputs[index])))
            }
            "BUZ" if arg.is_empty() => Ok(Some(flag(self.buzzer))),
            "BUZ" => {
                let (on, _beeps) = arg.split_at(1);
                self.buzzer = parse_flag(on)?;
                Ok(None)
            }
            "RUN" => {
                self.prompt = if self.phase().direction == "WDR" { 'W' } else { 'I' };
                Ok(None)
            }
            "STP" => {
                self.prompt = 'S';
                Ok(None)
            }
            "DIS" => Ok(Some(format!(
                "I{:.3}W{:.3}{}L",
                self.dispensed.0,
                self.dispensed.1,
                self.phase().volume_unit
            ))),
            "CLD" => {
                match arg {
                    "INF" => self.dispensed.0 = 0.0,
                    "WDR" => self.dispensed.1 = 0.0,
                    _ => return Err(DeviceErrorKind::DataOutOfRange),
                }
                Ok(None)
            }
            "VER" => Ok(Some(self.firmware.clone())),
            _ => Err(DeviceErrorKind::CommandNotRecognized),
        }
    }

    fn set_function(&mut self, arg: &str) -> Reply {
        let function = FUNCTIONS
            .iter()
            .find(|f| arg.starts_with(*f))
            .ok_or(DeviceErrorKind::DataOutOfRange)?;
        let datum = &arg[function.len()..];
        let datum = if datum.is_empty() {
            None
        } else if datum.contains('.') {
            let seconds: f64 = datum.parse().map_err(|_| DeviceErrorKind::DataOutOfRange)?;
            Some(format!("{:.1}", seconds))
        } else {
            let n: u8 = datum.parse().map_err(|_| DeviceErrorKind::DataOutOfRange)?;
            Some(format!("{:02}", n))
        };
        let slot = self.phase_mut();
        slot.function = function.to_string();
        slot.datum = datum;
        Ok(None)
    }

    fn set_rate(&mut self, arg: &str) -> Reply {
        let split = arg
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(arg.len());
        let (value, units) = arg.split_at(split);
        let rate = parse_value(value)?;
        let units = match units.as_bytes() {
            [] => None,
            [v @ (b'U' | b'M'), t @ (b'M' | b'H')] => Some((char::from(*v), char::from(*t))),
            _ => return Err(DeviceErrorKind::DataOutOfRange),
        };
        let slot = self.phase_mut();
        slot.rate = rate;
        if let Some(units) = units {
            slot.rate_units = units;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(reply: &str) -> &str {
        &reply[4..reply.len() - 1]
    }

    #[test]
    fn test_status_frame() {
        let mut pump = SimulatedPump::new();
        assert_eq!(pump.handle(3, ""), "\u{2}03S\u{3}");
    }

    #[test]
    fn test_phase_scoped_parameters() {
        let mut pump = SimulatedPump::new();
        pump.handle(0, "PHN2");
        pump.handle(0, "FUNRAT");
        pump.handle(0, "RAT5MH");
        assert_eq!(data(&pump.handle(0, "RAT")), "5.000MH");
        assert_eq!(data(&pump.handle(0, "FUN")), "RAT");
        pump.handle(0, "PHN1");
        assert_eq!(data(&pump.handle(0, "FUN")), "STP");
    }

    #[test]
    fn test_function_datum_echo() {
        let mut pump = SimulatedPump::new();
        pump.handle(0, "FUNJMP5");
        assert_eq!(data(&pump.handle(0, "FUN")), "JMP05");
        pump.handle(0, "FUNPAS2.5");
        assert_eq!(data(&pump.handle(0, "FUN")), "PAS2.5");
    }

    #[test]
    fn test_errors_and_alarms() {
        let mut pump = SimulatedPump::new();
        assert_eq!(data(&pump.handle(0, "XYZ")), "?");
        assert_eq!(data(&pump.handle(0, "PHN42")), "?OOR");
        pump.pending_alarm = Some('S');
        assert_eq!(pump.handle(0, ""), "\u{2}00A?S\u{3}");
        assert_eq!(pump.handle(0, ""), "\u{2}00S\u{3}");
    }
}
