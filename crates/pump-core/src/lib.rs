//! `pump-core`
//!
//! Shared building blocks for the syrpump workspace: the driver error type,
//! serial transport abstractions for the multi-drop pump bus, and the protocol
//! ranges and timing limits every other crate enforces.

pub mod error;
pub mod limits;
pub mod serial;

pub use error::{DeviceErrorKind, PumpError, PumpResult};
