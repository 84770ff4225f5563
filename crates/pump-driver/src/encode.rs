//! Numeric field encoding.
//!
//! The pump accepts at most `max_digits` digits plus one decimal point, and at
//! most `max_decimals` digits right of the point. The device itself keeps only
//! the trailing characters of an over-long number, so an integer part that
//! does not fit would be silently corrupted. [`encode_number`] rejects such
//! values before rounding and spends the remaining digit budget on the
//! fractional part instead.

use pump_core::{PumpError, PumpResult};

/// Digit budget of one numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub field: &'static str,
    pub max_digits: u32,
    pub max_decimals: u32,
}

impl NumberFormat {
    pub const fn new(field: &'static str, max_digits: u32, max_decimals: u32) -> Self {
        Self {
            field,
            max_digits,
            max_decimals,
        }
    }

    /// Largest value whose integer part fits the digit budget.
    pub fn max_value(&self) -> f64 {
        10f64.powi(self.max_digits as i32) - 1.0
    }
}

/// Syringe inside diameter in mm.
pub const DIAMETER: NumberFormat = NumberFormat::new("diameter", 4, 3);
/// Pumping rate magnitude.
pub const RATE: NumberFormat = NumberFormat::new("rate", 4, 3);
/// Volume to be dispensed.
pub const VOLUME: NumberFormat = NumberFormat::new("volume", 4, 3);
/// Fractional pause duration (`s.t`).
pub const PAUSE_TENTHS: NumberFormat = NumberFormat::new("pause", 2, 1);

/// Render `value` rounded to `decimals` places, without trailing zeros.
fn render(value: f64, decimals: u32) -> String {
    let text = format!("{:.*}", decimals as usize, value);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// Keep only the trailing characters that fit the field width.
///
/// The width is `max_digits`, plus one when the text carries a decimal point.
pub fn truncate_to_width(text: &str, max_digits: u32) -> &str {
    let width = max_digits as usize + usize::from(text.contains('.'));
    if text.len() > width {
        &text[text.len() - width..]
    } else {
        text
    }
}

/// The device's own formatting rule: round, render, keep trailing characters.
///
/// No range check is applied, so `12345.0` with four digits becomes `"2345"`.
/// Use [`encode_number`] for anything sent to a pump.
pub fn render_truncated(value: f64, format: NumberFormat) -> String {
    let text = render(value, format.max_decimals);
    truncate_to_width(&text, format.max_digits).to_string()
}

/// Encode a non-negative value for a numeric field.
///
/// Fails with `ValueOutOfRange` if `value` is negative, not finite, or its
/// integer part needs more than `max_digits` digits.
pub fn encode_number(value: f64, format: NumberFormat) -> PumpResult<String> {
    let max = format.max_value();
    if !value.is_finite() || value < 0.0 || value > max {
        return Err(PumpError::ValueOutOfRange {
            field: format.field,
            value,
            min: 0.0,
            max,
        });
    }

    let integer_digits = integer_digits(value);
    let decimals = format
        .max_decimals
        .min(format.max_digits.saturating_sub(integer_digits));
    let text = render(value, decimals);
    Ok(truncate_to_width(&text, format.max_digits).to_string())
}

fn integer_digits(value: f64) -> u32 {
    let mut digits = 1;
    let mut whole = value.trunc();
    while whole >= 10.0 {
        whole = (whole / 10.0).trunc();
        digits += 1;
    }
    digits
}

/// Parse a numeric value returned by the device.
pub fn parse_number(text: &str, field: &'static str) -> PumpResult<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| PumpError::malformed(text, format!("invalid {} value", field)))
}
