//! Protocol ranges and timing limits shared across the driver.
//!
//! This module centralizes:
//! - Inclusive data ranges enforced on every relevant command field
//! - Read-timeout and calibration defaults

use crate::error::{PumpError, PumpResult};
use std::time::Duration;

// =============================================================================
// Data Ranges
// =============================================================================

/// An inclusive integer range for one kind of protocol field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub field: &'static str,
    pub min: u32,
    pub max: u32,
}

impl DataRange {
    pub const fn new(field: &'static str, min: u32, max: u32) -> Self {
        Self { field, min, max }
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Reject `value` with `ValueOutOfRange` unless it lies in the range.
    pub fn check(&self, value: u32) -> PumpResult<u32> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(PumpError::ValueOutOfRange {
                field: self.field,
                value: value as f64,
                min: self.min as f64,
                max: self.max as f64,
            })
        }
    }
}

/// Pump address on the shared bus.
pub const ADDRESS: DataRange = DataRange::new("address", 0, 99);
/// Program phase slot.
pub const PHASE: DataRange = DataRange::new("phase", 1, 41);
/// Generic numeric datum (pause seconds).
pub const NUMBER: DataRange = DataRange::new("number", 0, 99);
/// Loop repetition count.
pub const COUNT: DataRange = DataRange::new("count", 1, 99);
/// TTL output level.
pub const TTL: DataRange = DataRange::new("ttl", 0, 1);
/// Safe-mode communications timeout in seconds.
pub const SAFE_TIMEOUT: DataRange = DataRange::new("timeout", 0, 255);

/// Number of phase slots in the device program table.
pub const PHASE_SLOTS: u8 = 41;

// =============================================================================
// Timing
// =============================================================================

/// Read timeout used before the bus has been calibrated (1 second).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Lower bound for a calibrated read timeout (20 ms).
///
/// A round trip measured on an idle bus can be shorter than the scheduling
/// jitter of the host; the calibrated value never drops below this floor.
pub const MIN_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Status queries issued during calibration.
pub const CALIBRATION_SAMPLES: u32 = 10;

/// Multiplier applied to the measured round trip.
pub const CALIBRATION_SAFETY_FACTOR: f64 = 4.0;

/// Time spent draining stale bytes before each command (5 ms).
pub const DRAIN_WINDOW_MS: u64 = 5;
