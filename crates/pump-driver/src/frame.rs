//! Command encoding and response framing.
//!
//! Requests are plain ASCII: `<address><mnemonic><args>\r\n`. Responses are
//! framed as `STX <2-digit address> <status> [data] ETX`, where the status byte
//! is either a prompt letter or `A` followed by `?` and an alarm letter. A `?`
//! directly after the address (or at the start of the data field) introduces a
//! device error token.

use crate::symbols::{Symbol, ALARM, ERROR, PROMPT};
use pump_core::limits::ADDRESS;
use pump_core::{DeviceErrorKind, PumpError, PumpResult};

/// Start of a response frame.
pub const STX: u8 = 0x02;
/// End of a response frame; the read terminator.
pub const ETX: u8 = 0x03;
/// Request line terminator.
pub const TERMINATOR: &str = "\r\n";

/// Command mnemonics understood by the pump family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    /// Empty mnemonic; the pump answers with its prompt.
    Status,
    Diameter,
    Volume,
    Phase,
    Function,
    Rate,
    Direction,
    Safe,
    Alarm,
    PowerFail,
    Trigger,
    KeyBeep,
    Output,
    Input,
    Buzz,
    Run,
    Stop,
    Dispensed,
    ClearDispensed,
    Version,
}

impl Mnemonic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mnemonic::Status => "",
            Mnemonic::Diameter => "DIA",
            Mnemonic::Volume => "VOL",
            Mnemonic::Phase => "PHN",
            Mnemonic::Function => "FUN",
            Mnemonic::Rate => "RAT",
            Mnemonic::Direction => "DIR",
            Mnemonic::Safe => "SAF",
            Mnemonic::Alarm => "AL",
            Mnemonic::PowerFail => "PF",
            Mnemonic::Trigger => "TRG",
            Mnemonic::KeyBeep => "BP",
            Mnemonic::Output => "OUT",
            Mnemonic::Input => "IN",
            Mnemonic::Buzz => "BUZ",
            Mnemonic::Run => "RUN",
            Mnemonic::Stop => "STP",
            Mnemonic::Dispensed => "DIS",
            Mnemonic::ClearDispensed => "CLD",
            Mnemonic::Version => "VER",
        }
    }
}

impl std::fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request addressed to one pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub address: u8,
    pub mnemonic: Mnemonic,
    /// Arguments, concatenated without separators on the wire.
    pub args: Vec<String>,
}

impl Command {
    pub fn new(address: u8, mnemonic: Mnemonic) -> Self {
        Self {
            address,
            mnemonic,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Wire text of the request, terminator included.
    pub fn encode(&self) -> PumpResult<String> {
        ADDRESS.check(self.address.into())?;
        Ok(format!(
            "{}{}{}{}",
            self.address,
            self.mnemonic.as_str(),
            self.args.concat(),
            TERMINATOR
        ))
    }
}

/// Status byte of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Operating state prompt (infusing, stopped, ...).
    Prompt(&'static Symbol),
    /// Alarm condition; the pump is stopped until the alarm is cleared.
    Alarm(&'static Symbol),
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Status::Prompt(symbol) | Status::Alarm(symbol) => symbol.name(),
        }
    }

    pub fn is_alarm(&self) -> bool {
        matches!(self, Status::Alarm(_))
    }
}

/// A successfully parsed, error-free response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub address: u8,
    pub status: Status,
    /// Data field, `None` when empty.
    pub data: Option<String>,
}

impl Response {
    /// Data field, or `MalformedResponse` if the pump sent none.
    pub fn require_data(&self) -> PumpResult<&str> {
        self.data
            .as_deref()
            .ok_or_else(|| PumpError::malformed("", "expected a data field"))
    }
}

/// Parse one raw frame, STX and ETX included.
///
/// Error tokens become `PumpError::Device`; alarms are logged as warnings and
/// returned in [`Response::status`].
pub fn parse_response(raw: &[u8]) -> PumpResult<Response> {
    let text = String::from_utf8_lossy(raw);
    let malformed = |reason: &str| PumpError::malformed(text.as_ref(), reason);

    let body = raw
        .strip_prefix(&[STX])
        .ok_or_else(|| malformed("missing STX"))?
        .strip_suffix(&[ETX])
        .ok_or_else(|| malformed("missing ETX"))?;
    let body = std::str::from_utf8(body).map_err(|_| malformed("non-ASCII payload"))?;

    if body.len() < 3 || !body.is_char_boundary(2) {
        return Err(malformed("frame too short"));
    }
    let (address, rest) = body.split_at(2);
    if !address.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("address is not two digits"));
    }
    let address: u8 = address
        .parse()
        .map_err(|_| malformed("address is not two digits"))?;

    // `?` right after the address: an error token with no status byte.
    if let Some(token) = rest.strip_prefix('?') {
        return Err(device_error(token, &text)?);
    }

    let (status, data) = if let Some(alarm) = rest.strip_prefix("A?") {
        let mut chars = alarm.char_indices();
        let (_, letter) = chars.next().ok_or_else(|| malformed("missing alarm code"))?;
        let symbol = ALARM.lookup(letter.encode_utf8(&mut [0u8; 4]))?;
        let data = chars.next().map_or("", |(i, _)| &alarm[i..]);
        tracing::warn!(address, alarm = symbol.name(), "Pump reported alarm");
        (Status::Alarm(symbol), data)
    } else if rest.starts_with('A') {
        return Err(malformed("alarm status without '?'"));
    } else {
        let letter = &rest[..rest.chars().next().map_or(0, char::len_utf8)];
        let symbol = PROMPT
            .lookup(letter)
            .map_err(|_| malformed("unknown status byte"))?;
        (Status::Prompt(symbol), &rest[letter.len()..])
    };

    if let Some(token) = data.strip_prefix('?') {
        return Err(device_error(token, &text)?);
    }

    Ok(Response {
        address,
        status,
        data: (!data.is_empty()).then(|| data.to_string()),
    })
}

/// Map an error token to a `Device` error. An unlisted token is malformed.
fn device_error(token: &str, raw: &str) -> PumpResult<PumpError> {
    let name = ERROR
        .decode(token)
        .map_err(|_| PumpError::malformed(raw, format!("unknown error token '{}'", token)))?;
    let kind = DeviceErrorKind::from_name(name)
        .ok_or_else(|| PumpError::malformed(raw, format!("unknown error token '{}'", token)))?;
    Ok(PumpError::Device(kind))
}
