//! Simulated syringe pumps for testing without hardware.
//!
//! The simulation speaks the device side of the wire protocol over an
//! in-memory stream, so a `PumpSession` can be driven end to end:
//!
//! ```rust,ignore
//! use pump_driver::PumpSession;
//! use pump_driver_mock::SimulatedBus;
//!
//! let bus = SimulatedBus::with_addresses([3, 17, 42]);
//! let session = PumpSession::from_port(bus.connect());
//! ```
//!
//! Pumps start in factory state: every phase slot holds `stop`, the prompt
//! is `S`. Alarms and device errors can be injected per pump through
//! [`SimulatedBus::with_pump`].

mod bus;
mod pump;

pub use bus::SimulatedBus;
pub use pump::{error_token, PhaseSlot, SimulatedPump};
