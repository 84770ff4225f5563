//! JSON program files.
//!
//! A program file is a JSON array of records. Each record names the addresses
//! it applies to (a number, a list of numbers, or `"all"`) next to the
//! settings and program for those pumps:
//!
//! ```json
//! [
//!   {
//!     "address": [0, 1],
//!     "diameter": 26.7,
//!     "program": [
//!       {"function": "rate",
//!        "rate": {"value": 5.0, "volume_unit": "ml", "time_unit": "min"},
//!        "volume": {"value": 2.0, "unit": "ml"},
//!        "direction": "infuse"},
//!       {"function": "stop"}
//!     ]
//!   }
//! ]
//! ```

use anyhow::Context;
use pump_driver::{AddressSpec, ConfigRecord, PumpSession};
use std::path::Path;
use tracing::info;

/// Parse program file contents.
pub fn parse_records(json: &str) -> anyhow::Result<Vec<ConfigRecord>> {
    serde_json::from_str(json).context("Invalid program file")
}

/// Render records the way [`save_records`] writes them.
pub fn render_records(records: &[ConfigRecord]) -> anyhow::Result<String> {
    serde_json::to_string_pretty(records).context("Failed to serialize program file")
}

pub async fn load_records(path: impl AsRef<Path>) -> anyhow::Result<Vec<ConfigRecord>> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read program file {}", path.display()))?;
    parse_records(&json).with_context(|| format!("In {}", path.display()))
}

pub async fn save_records(path: impl AsRef<Path>, records: &[ConfigRecord]) -> anyhow::Result<()> {
    let path = path.as_ref();
    let json = render_records(records)?;
    tokio::fs::write(path, json + "\n")
        .await
        .with_context(|| format!("Failed to write program file {}", path.display()))
}

/// Apply every record of a program file, in file order.
///
/// Stops at the first failing record; records before it stay applied.
pub async fn apply_program_file(
    session: &PumpSession,
    path: impl AsRef<Path>,
) -> anyhow::Result<usize> {
    let path = path.as_ref();
    let records = load_records(path).await?;
    for (index, record) in records.iter().enumerate() {
        session
            .write_config(record)
            .await
            .with_context(|| format!("Record {} ({:?}) failed", index, record.address))?;
    }
    info!(
        path = %path.display(),
        records = records.len(),
        "Applied program file"
    );
    Ok(records.len())
}

/// Read the pumps selected by `spec` and save their merged configuration.
pub async fn save_program_file(
    session: &PumpSession,
    spec: &AddressSpec,
    path: impl AsRef<Path>,
) -> anyhow::Result<Vec<ConfigRecord>> {
    let path = path.as_ref();
    let records = session
        .read_configs(spec)
        .await
        .context("Failed to read pump configuration")?;
    save_records(path, &records).await?;
    info!(
        path = %path.display(),
        records = records.len(),
        "Saved program file"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pump_driver::{PhaseFunction, PhaseStep};

    #[test]
    fn test_parse_records() {
        let records = parse_records(
            r#"[
                {"address": "all", "alarm": true},
                {"address": 3, "diameter": 14.43,
                 "program": [{"function": "jump", "phase": 1}, {"function": "stop"}]}
            ]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].address, AddressSpec::All);
        assert_eq!(records[0].settings.alarm, Some(true));
        assert_eq!(records[1].address, AddressSpec::Single(3));
        let program = records[1].settings.program.as_ref().unwrap();
        assert_eq!(program[0].function, PhaseFunction::Jump);
        assert_eq!(program[1], PhaseStep::stop());
    }

    #[test]
    fn test_parse_rejects_bad_address() {
        assert!(parse_records(r#"[{"address": "some"}]"#).is_err());
        assert!(parse_records(r#"{"address": 1}"#).is_err());
    }
}
