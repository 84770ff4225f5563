//! # syrpump
//!
//! Host-side driver for addressable syringe pumps sharing one serial bus.
//!
//! The protocol codec, program compiler and bus session live in
//! `pump-driver` and are re-exported here. This crate adds the application
//! edge around them:
//!
//! - **`config`**: layered `syrpump.toml` + `SYRPUMP_*` configuration
//! - **`logging`**: `tracing-subscriber` setup driven by that configuration
//! - **`program_file`**: JSON program files applied to or saved from the bus
//!
//! ```no_run
//! use syrpump::{config::DriverConfig, logging, PumpSession};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = DriverConfig::load()?;
//! logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
//! let session = syrpump::open_session(&config).await?;
//! let pumps = session.scan_addresses().await?;
//! tracing::info!(?pumps, "Pumps on the bus");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod program_file;

pub use pump_core::serial::{available_ports, SerialSettings};
pub use pump_core::{DeviceErrorKind, PumpError, PumpResult};
pub use pump_driver::*;

use anyhow::Context;
use config::DriverConfig;

/// Open the configured bus, set its initial read timeout and
/// calibrate against the reference pump.
pub async fn open_session(config: &DriverConfig) -> anyhow::Result<PumpSession> {
    config.validate().map_err(anyhow::Error::msg)?;
    let session = PumpSession::open(&config.serial_settings())
        .await
        .with_context(|| format!("Failed to open pump bus on {}", config.serial.port))?;
    session.set_read_timeout(config.initial_read_timeout());
    session
        .calibrate_timeout(&config.calibration_settings())
        .await
        .with_context(|| {
            format!(
                "Timeout calibration against pump {} failed",
                config.timing.reference_address
            )
        })?;
    Ok(session)
}
