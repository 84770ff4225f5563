//! Simulated multi-drop bus.
//!
//! [`SimulatedBus::connect`] returns the host end of an in-memory duplex
//! stream; a background task plays every registered pump on the far end.
//! Requests to an address with no pump get no reply, like a real bus.

use crate::pump::SimulatedPump;
use parking_lot::Mutex;
use pump_core::serial::DynSerial;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

const BUFFER_SIZE: usize = 4096;

/// A bus with a set of simulated pumps.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    pumps: Arc<Mutex<BTreeMap<u8, SimulatedPump>>>,
    latency: Duration,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus with a factory-default pump at each address.
    pub fn with_addresses(addresses: impl IntoIterator<Item = u8>) -> Self {
        let bus = Self::new();
        for address in addresses {
            bus.insert(address, SimulatedPump::new());
        }
        bus
    }

    /// Delay before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn insert(&self, address: u8, pump: SimulatedPump) {
        self.pumps.lock().insert(address, pump);
    }

    pub fn addresses(&self) -> Vec<u8> {
        self.pumps.lock().keys().copied().collect()
    }

    /// Snapshot of the pump at `address`.
    pub fn pump(&self, address: u8) -> Option<SimulatedPump> {
        self.pumps.lock().get(&address).cloned()
    }

    /// Mutate the pump at `address`, e.g. to inject an alarm or error.
    pub fn with_pump<R>(&self, address: u8, f: impl FnOnce(&mut SimulatedPump) -> R) -> Option<R> {
        self.pumps.lock().get_mut(&address).map(f)
    }

    /// Start serving the bus and return the host-side transport.
    ///
    /// Must be called inside a tokio runtime. The serving task ends when
    /// the transport is dropped.
    pub fn connect(&self) -> DynSerial {
        let (host, device) = tokio::io::duplex(BUFFER_SIZE);
        tokio::spawn(self.clone().serve(device));
        Box::new(host)
    }

    async fn serve(self, device: DuplexStream) {
        let mut device = BufReader::new(device);
        let mut line = String::new();
        loop {
            line.clear();
            match device.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let Some(reply) = self.answer(line.trim_end()) else {
                continue;
            };
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if device.get_mut().write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
        tracing::debug!("Simulated bus closed");
    }

    /// Reply for one request line, or `None` if nobody answers.
    fn answer(&self, request: &str) -> Option<String> {
        let digits = request
            .bytes()
            .take(2)
            .take_while(u8::is_ascii_digit)
            .count();
        let address: u8 = request[..digits].parse().ok()?;
        let body = &request[digits..];

        let mut pumps = self.pumps.lock();
        let pump = pumps.get_mut(&address)?;
        let reply = pump.handle(address, body);
        tracing::trace!(request, reply = %reply.escape_debug(), "Simulated pump reply");
        Some(reply)
    }
}
