//! Error types for the syringe pump driver.
//!
//! This module defines the primary error type, `PumpError`, shared by every crate
//! in the workspace. Using the `thiserror` crate, it gives a single place where
//! device-reported failures, protocol violations and caller mistakes are named.
//!
//! ## Error Hierarchy
//!
//! - **`Device`**: An error token reported by the pump itself (`?NA`, `?OOR`, ...).
//!   The five kinds are listed in [`DeviceErrorKind`].
//! - **`UnknownSymbol` / `UnknownCode`**: A symbolic name or device code that is
//!   missing from (or ambiguous in) a symbol table. These indicate a programming
//!   or table-completeness error and are never retried.
//! - **`ValueOutOfRange`**: A caller-supplied value exceeds the range or digit
//!   budget of its field. Raised before anything is transmitted.
//! - **`MalformedResponse`**: A framing or status-byte violation. The bus is
//!   considered desynchronised; there is no automatic recovery.
//! - **`DeviceTimeout`**: No framed response arrived within the read timeout.
//!   This is the expected signal for an unpopulated address during scanning.
//! - **`Configuration`**: Semantic errors in caller input, such as a phase step
//!   with conflicting fields.
//!
//! Alarms are not errors. They travel with an otherwise valid response and are
//! reported as `tracing` warnings.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Device-reported errors
// =============================================================================

/// Error kinds reported by the pump in the data field of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorKind {
    /// Mnemonic unknown to the device (`?` with an empty token).
    CommandNotRecognized,
    /// Valid mnemonic, but not applicable in the current state (`?NA`).
    CommandNotAvailable,
    /// Argument rejected by the device-side range check (`?OOR`).
    DataOutOfRange,
    /// Malformed packet as seen by the device (`?COM`).
    InvalidComPacket,
    /// Lost a race with a new phase start (`?IGN`).
    CommandIgnored,
}

impl DeviceErrorKind {
    pub const ALL: [DeviceErrorKind; 5] = [
        DeviceErrorKind::CommandNotRecognized,
        DeviceErrorKind::CommandNotAvailable,
        DeviceErrorKind::DataOutOfRange,
        DeviceErrorKind::InvalidComPacket,
        DeviceErrorKind::CommandIgnored,
    ];

    /// Canonical name, as stored in the error symbol table.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceErrorKind::CommandNotRecognized => "command not recognized",
            DeviceErrorKind::CommandNotAvailable => "command not available",
            DeviceErrorKind::DataOutOfRange => "data out of range",
            DeviceErrorKind::InvalidComPacket => "invalid communications packet",
            DeviceErrorKind::CommandIgnored => "command ignored",
        }
    }

    /// Look up a kind by its canonical name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceErrorKind::CommandNotRecognized => "command is not recognized",
            DeviceErrorKind::CommandNotAvailable => "command is not currently applicable",
            DeviceErrorKind::DataOutOfRange => "command data is out of range",
            DeviceErrorKind::InvalidComPacket => "invalid communications packet received",
            DeviceErrorKind::CommandIgnored => {
                "command ignored due to a simultaneous new phase start"
            }
        }
    }
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// PumpError
// =============================================================================

/// Convenience alias for results using the driver error type.
pub type PumpResult<T> = std::result::Result<T, PumpError>;

/// Primary error type for the syringe pump driver.
#[derive(Error, Debug)]
pub enum PumpError {
    /// The pump answered with an error token.
    #[error("Device error: {0}")]
    Device(DeviceErrorKind),

    /// A name or alias matched zero or several entries of a symbol table.
    #[error("Unknown {table} symbol '{name}'")]
    UnknownSymbol { table: &'static str, name: String },

    /// A device code is missing from a symbol table.
    #[error("Unknown {table} code '{code}'")]
    UnknownCode { table: &'static str, code: String },

    /// A value exceeds the range or digit budget of its field.
    ///
    /// **Error Type**: Permanent - the caller must supply a smaller value.
    /// Nothing has been transmitted when this is raised.
    #[error("{field} value {value} out of range [{min}, {max}]")]
    ValueOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Framing or status-byte violation.
    ///
    /// **Error Type**: Fatal - the request/response stream is desynchronised.
    #[error("Malformed response {response:?}: {reason}")]
    MalformedResponse { response: String, reason: String },

    /// No framed response within the read timeout.
    ///
    /// **Error Type**: Transient - retry at the caller's discretion. During
    /// address scanning this means "address unpopulated".
    #[error("No response from address {address} within {timeout:?}")]
    DeviceTimeout { address: u8, timeout: Duration },

    /// Invalid caller input that passed parsing but is logically wrong.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PumpError {
    pub fn malformed(response: impl Into<String>, reason: impl Into<String>) -> Self {
        PumpError::MalformedResponse {
            response: response.into(),
            reason: reason.into(),
        }
    }

    /// Whether a caller may reasonably retry the failed command.
    ///
    /// The driver itself never retries; this only classifies the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PumpError::DeviceTimeout { .. } | PumpError::Device(DeviceErrorKind::CommandIgnored)
        )
    }

    /// The device-reported kind, if the pump answered with an error token.
    pub fn device_kind(&self) -> Option<DeviceErrorKind> {
        match self {
            PumpError::Device(kind) => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PumpError::Device(DeviceErrorKind::DataOutOfRange);
        assert_eq!(err.to_string(), "Device error: command data is out of range");
    }

    #[test]
    fn test_device_kind_names_round_trip() {
        for kind in DeviceErrorKind::ALL {
            assert_eq!(DeviceErrorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(DeviceErrorKind::from_name("nope"), None);
    }

    #[test]
    fn test_retryable_classification() {
        let timeout = PumpError::DeviceTimeout {
            address: 3,
            timeout: Duration::from_millis(20),
        };
        assert!(timeout.is_retryable());
        assert!(PumpError::Device(DeviceErrorKind::CommandIgnored).is_retryable());
        assert!(!PumpError::Device(DeviceErrorKind::DataOutOfRange).is_retryable());
        assert!(!PumpError::malformed("01X", "unknown status").is_retryable());
    }
}
