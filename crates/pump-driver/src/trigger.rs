//! Trigger setup encoding.
//!
//! A trigger setup is stored on the device as a two-letter code. Callers may
//! name it directly ("foot switch") or describe it by the edge or level that
//! starts and stops the pumping program. The start/stop form is translated in
//! two steps: edge names to single letters ([`TRIGGER_EDGE`]), then the letter
//! pair to a device code ([`TRIGGER_START_STOP`]).

use crate::symbols::{TRIGGER_EDGE, TRIGGER_SETUP, TRIGGER_START_STOP};
use pump_core::{PumpError, PumpResult};
use serde::{Deserialize, Serialize};

const UNSPECIFIED: char = '_';

/// Caller-facing trigger description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerSetup {
    /// A setup name such as "foot switch" or "start only".
    Named(String),
    /// Edges or levels that start and stop the program. `None` leaves that
    /// side unspecified.
    Edges {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop: Option<String>,
    },
}

impl TriggerSetup {
    pub fn named(name: impl Into<String>) -> Self {
        TriggerSetup::Named(name.into())
    }

    pub fn edges(start: Option<&str>, stop: Option<&str>) -> Self {
        TriggerSetup::Edges {
            start: start.map(str::to_string),
            stop: stop.map(str::to_string),
        }
    }

    /// Device code for this setup.
    pub fn encode(&self) -> PumpResult<&'static str> {
        match self {
            TriggerSetup::Named(name) => TRIGGER_SETUP.encode(name),
            TriggerSetup::Edges { start, stop } => {
                encode_start_stop(start.as_deref(), stop.as_deref())
            }
        }
    }

    /// The same setup expressed by its canonical name.
    pub fn canonical(&self) -> PumpResult<TriggerSetup> {
        let code = self.encode()?;
        Ok(TriggerSetup::Named(TRIGGER_SETUP.decode(code)?.to_string()))
    }
}

/// Output shape for a decoded trigger code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerFormat {
    Code,
    Name,
    /// Edge names for the start and stop sides.
    StartStop,
    /// The two-letter start/stop pattern, `_` for an unspecified side.
    StartStopCode,
}

/// A decoded trigger code in the requested shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReading {
    Code(&'static str),
    Name(&'static str),
    StartStop {
        start: Option<&'static str>,
        stop: Option<&'static str>,
    },
    StartStopCode(&'static str),
}

/// Encode a start/stop edge pair into a device trigger code.
pub fn encode_start_stop(start: Option<&str>, stop: Option<&str>) -> PumpResult<&'static str> {
    let mut pattern = String::with_capacity(2);
    for side in [start, stop] {
        match side {
            Some(name) => pattern.push_str(TRIGGER_EDGE.encode(name)?),
            None => pattern.push(UNSPECIFIED),
        }
    }
    TRIGGER_START_STOP.encode(&pattern)
}

/// Decode a device trigger code into canonical start/stop edge names.
pub fn decode_start_stop(
    code: &str,
) -> PumpResult<(Option<&'static str>, Option<&'static str>)> {
    let pattern = TRIGGER_START_STOP.decode(code)?;
    let mut sides = pattern.chars().map(|c| {
        if c == UNSPECIFIED {
            Ok(None)
        } else {
            TRIGGER_EDGE.decode(c.encode_utf8(&mut [0u8; 4])).map(Some)
        }
    });
    match (sides.next(), sides.next(), sides.next()) {
        (Some(start), Some(stop), None) => Ok((start?, stop?)),
        _ => Err(PumpError::UnknownCode {
            table: TRIGGER_START_STOP.kind(),
            code: code.to_string(),
        }),
    }
}

/// Decode a device trigger code in the requested shape.
pub fn decode_trigger(code: &str, format: TriggerFormat) -> PumpResult<TriggerReading> {
    let symbol = TRIGGER_SETUP.lookup(code)?;
    Ok(match format {
        TriggerFormat::Code => TriggerReading::Code(symbol.code()),
        TriggerFormat::Name => TriggerReading::Name(symbol.name()),
        TriggerFormat::StartStop => {
            let (start, stop) = decode_start_stop(code)?;
            TriggerReading::StartStop { start, stop }
        }
        TriggerFormat::StartStopCode => {
            TriggerReading::StartStopCode(TRIGGER_START_STOP.decode(code)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDGES: [Option<&str>; 5] = [
        None,
        Some("falling"),
        Some("rising"),
        Some("low"),
        Some("high"),
    ];

    #[test]
    fn test_start_stop_round_trip() {
        let mut valid = 0;
        for start in EDGES {
            for stop in EDGES {
                let Ok(code) = encode_start_stop(start, stop) else {
                    continue;
                };
                valid += 1;
                assert_eq!(decode_start_stop(code).unwrap(), (start, stop));
            }
        }
        assert_eq!(valid, 13);
    }

    #[test]
    fn test_aliases_resolve_to_same_code() {
        assert_eq!(
            encode_start_stop(Some("rising edge"), Some("fall")).unwrap(),
            encode_start_stop(Some("rising"), Some("falling")).unwrap()
        );
    }

    #[test]
    fn test_unsupported_pair_is_rejected() {
        // Mixing an edge with a level has no device code.
        assert!(matches!(
            encode_start_stop(Some("falling"), Some("high")),
            Err(PumpError::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn test_named_and_edges_agree() {
        let named = TriggerSetup::named("level control");
        let edges = TriggerSetup::edges(Some("rising"), Some("falling"));
        assert_eq!(named.encode().unwrap(), "LE");
        assert_eq!(edges.encode().unwrap(), "LE");
        assert_eq!(edges.canonical().unwrap(), named);
    }

    #[test]
    fn test_decode_shapes() {
        assert_eq!(
            decode_trigger("FT", TriggerFormat::Code).unwrap(),
            TriggerReading::Code("FT")
        );
        assert_eq!(
            decode_trigger("FT", TriggerFormat::Name).unwrap(),
            TriggerReading::Name("foot switch")
        );
        assert_eq!(
            decode_trigger("ST", TriggerFormat::StartStop).unwrap(),
            TriggerReading::StartStop {
                start: Some("falling"),
                stop: None
            }
        );
        assert_eq!(
            decode_trigger("OF", TriggerFormat::StartStop).unwrap(),
            TriggerReading::StartStop {
                start: None,
                stop: None
            }
        );
    }

    #[test]
    fn test_decode_start_stop_pattern() {
        assert_eq!(
            decode_trigger("LE", TriggerFormat::StartStopCode).unwrap(),
            TriggerReading::StartStopCode("RF")
        );
        assert_eq!(
            decode_trigger("SR", TriggerFormat::StartStopCode).unwrap(),
            TriggerReading::StartStopCode("_R")
        );
        assert_eq!(
            decode_trigger("OF", TriggerFormat::StartStopCode).unwrap(),
            TriggerReading::StartStopCode("__")
        );
        assert!(matches!(
            decode_trigger("XX", TriggerFormat::StartStopCode),
            Err(PumpError::UnknownCode { .. })
        ));
    }

    #[test]
    fn test_trigger_setup_deserializes_both_shapes() {
        let named: TriggerSetup = serde_json::from_str(r#""foot switch""#).unwrap();
        assert_eq!(named, TriggerSetup::named("foot switch"));

        let edges: TriggerSetup =
            serde_json::from_str(r#"{"start": "rising", "stop": "falling"}"#).unwrap();
        assert_eq!(edges, TriggerSetup::edges(Some("rising"), Some("falling")));
    }
}
