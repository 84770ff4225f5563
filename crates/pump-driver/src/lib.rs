//! Driver for addressable syringe pumps on a shared serial bus.
//!
//! This crate provides:
//! - Symbol tables between device short codes and domain names ([`symbols`])
//! - Command encoding and response framing ([`frame`])
//! - Numeric, trigger and phase-datum encoders ([`encode`], [`trigger`], [`phase`])
//! - The program compiler and extractor ([`program`]) and config merge ([`settings`])
//! - A bus session with typed accessors, calibration and scanning ([`PumpSession`])
//!
//! # Usage
//!
//! ```rust,ignore
//! use pump_core::serial::SerialSettings;
//! use pump_driver::{CalibrationSettings, PumpSession};
//!
//! let session = PumpSession::open(&SerialSettings::new("/dev/ttyUSB0")).await?;
//! session.calibrate_timeout(&CalibrationSettings::default()).await?;
//! let pumps = session.scan_addresses().await?;
//! ```

mod commands;
pub mod encode;
pub mod frame;
pub mod phase;
pub mod program;
mod scan;
mod session;
pub mod settings;
pub mod symbols;
pub mod trigger;

pub use commands::{ComMode, DispensedVolume, TTL_INPUT_PINS, TTL_OUTPUT_PIN};
pub use frame::{Command, Mnemonic, Response, Status};
pub use phase::{
    PauseDuration, PhaseDatum, PhaseFunction, PhaseStep, Program, RateSetting, VolumeSetting,
};
pub use program::{compile_program, trim_unused_phases};
pub use scan::CalibrationSettings;
pub use session::{BusGuard, PumpBus, PumpSession, TimeoutProfile, TimeoutSource};
pub use settings::{combine, AddressSpec, ConfigRecord, DeviceConfig, DeviceSettings, Parameter};
pub use trigger::{TriggerFormat, TriggerReading, TriggerSetup};
