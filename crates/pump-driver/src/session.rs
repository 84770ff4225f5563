//! Bus session: the transport, its lock and its read timeout.
//!
//! Every request/response pair on a bus is one unit under the bus mutex. A
//! [`PumpBus`] owns the transport and the [`TimeoutProfile`]; a
//! [`PumpSession`] is a handle on a bus plus the addresses discovered by the
//! last scan. Every session opened on a port owns its bus; callers that need
//! concurrent access share one bus explicitly with [`PumpSession::from_bus`].

use crate::frame::{parse_response, Command, Mnemonic, Response, ETX};
use parking_lot::RwLock;
use pump_core::limits::{DEFAULT_READ_TIMEOUT, DRAIN_WINDOW_MS};
use pump_core::serial::{
    drain_serial_buffer, open_serial_async, read_until_timeout, wrap_shared, DynSerial,
    SerialSettings, SharedPort,
};
use pump_core::{PumpError, PumpResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::MutexGuard;
use tracing::instrument;

/// Where the current read timeout came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSource {
    /// Initial value; not yet fitted to the bus.
    Default,
    /// Set by the caller.
    Explicit,
    /// Derived from measured round trips.
    Calibrated,
}

/// Read timeout of one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutProfile {
    pub read_timeout: Duration,
    pub source: TimeoutSource,
}

impl Default for TimeoutProfile {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            source: TimeoutSource::Default,
        }
    }
}

impl TimeoutProfile {
    pub fn explicit(read_timeout: Duration) -> Self {
        Self {
            read_timeout,
            source: TimeoutSource::Explicit,
        }
    }

    /// Timeout from `samples` round trips that took `elapsed` in total:
    /// the mean round trip times `safety_factor`, never below `floor`.
    pub fn from_round_trip(
        elapsed: Duration,
        samples: u32,
        safety_factor: f64,
        floor: Duration,
    ) -> Self {
        let mean = elapsed.as_secs_f64() / f64::from(samples.max(1));
        let read_timeout = Duration::from_secs_f64(mean * safety_factor).max(floor);
        Self {
            read_timeout,
            source: TimeoutSource::Calibrated,
        }
    }

    /// Whether the timeout was fitted to the bus or chosen by the caller.
    pub fn is_fitted(&self) -> bool {
        self.source != TimeoutSource::Default
    }
}

/// One physical bus: the shared transport and its timeout profile.
pub struct PumpBus {
    port: SharedPort,
    timeout: RwLock<TimeoutProfile>,
}

impl PumpBus {
    pub fn new(port: SharedPort) -> Self {
        Self::with_timeout(port, TimeoutProfile::default())
    }

    pub fn with_timeout(port: SharedPort, profile: TimeoutProfile) -> Self {
        Self {
            port,
            timeout: RwLock::new(profile),
        }
    }

    pub fn timeout_profile(&self) -> TimeoutProfile {
        *self.timeout.read()
    }

    pub(crate) fn set_timeout_profile(&self, profile: TimeoutProfile) {
        *self.timeout.write() = profile;
    }

    /// Take the bus lock.
    pub async fn lock(&self) -> BusGuard<'_> {
        BusGuard {
            port: self.port.lock().await,
            bus: self,
            needs_drain: true,
        }
    }
}

impl std::fmt::Debug for PumpBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpBus")
            .field("timeout", &self.timeout_profile())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a bus for a sequence of transactions.
///
/// Calibration and scanning hold one guard for their whole sweep.
pub struct BusGuard<'a> {
    port: MutexGuard<'a, BufReader<DynSerial>>,
    bus: &'a PumpBus,
    /// Set on acquisition and after a timeout, when a late reply may be queued.
    needs_drain: bool,
}

impl BusGuard<'_> {
    /// Send one command and parse its response.
    ///
    /// Stale bytes are drained before the first command under this guard
    /// and after any timeout. The response must echo the request address;
    /// a mismatch means the bus is out of step.
    pub async fn transact(&mut self, command: &Command) -> PumpResult<Response> {
        let line = command.encode()?;
        let timeout = self.bus.timeout_profile().read_timeout;

        if self.needs_drain {
            let stale = drain_serial_buffer(&mut *self.port, DRAIN_WINDOW_MS).await;
            if stale > 0 {
                tracing::trace!(stale, "Drained stale bytes before command");
            }
            self.needs_drain = false;
        }

        let port = self.port.get_mut();
        port.write_all(line.as_bytes()).await?;
        port.flush().await?;

        let Some(raw) = read_until_timeout(&mut *self.port, ETX, timeout).await? else {
            self.needs_drain = true;
            return Err(PumpError::DeviceTimeout {
                address: command.address,
                timeout,
            });
        };
        if raw.is_empty() {
            return Err(PumpError::SerialUnexpectedEof);
        }

        tracing::debug!(
            command = line.trim_end(),
            response = %String::from_utf8_lossy(&raw).escape_debug(),
            "Pump transaction"
        );

        let response = parse_response(&raw)?;
        if response.address != command.address {
            return Err(PumpError::malformed(
                String::from_utf8_lossy(&raw),
                format!(
                    "response from address {} to a command for address {}",
                    response.address, command.address
                ),
            ));
        }
        Ok(response)
    }
}

/// Handle on a pump bus.
///
/// Cheap to clone the underlying bus; the scan cache belongs to this handle.
#[derive(Debug)]
pub struct PumpSession {
    bus: Arc<PumpBus>,
    known_addresses: RwLock<Option<Vec<u8>>>,
}

impl PumpSession {
    /// Session over an already-open transport, not shared with anyone.
    pub fn from_port(port: DynSerial) -> Self {
        Self::from_bus(Arc::new(PumpBus::new(wrap_shared(port))))
    }

    pub fn from_bus(bus: Arc<PumpBus>) -> Self {
        Self {
            bus,
            known_addresses: RwLock::new(None),
        }
    }

    /// Open the port at `settings.path` as a new bus owned by this session.
    pub async fn open(settings: &SerialSettings) -> anyhow::Result<Self> {
        let port = open_serial_async(settings).await?;
        tracing::info!(port = %settings.path, baud = settings.baud_rate, "Opened pump bus");
        Ok(Self::from_port(Box::new(port)))
    }

    pub fn bus(&self) -> &Arc<PumpBus> {
        &self.bus
    }

    pub fn timeout_profile(&self) -> TimeoutProfile {
        self.bus.timeout_profile()
    }

    /// Replace the read timeout without calibrating.
    pub fn set_read_timeout(&self, read_timeout: Duration) {
        tracing::info!(timeout_ms = read_timeout.as_millis() as u64, "Read timeout set");
        self.bus
            .set_timeout_profile(TimeoutProfile::explicit(read_timeout));
    }

    /// Addresses found by the last scan, if any.
    pub fn known_addresses(&self) -> Option<Vec<u8>> {
        self.known_addresses.read().clone()
    }

    pub(crate) fn remember_addresses(&self, addresses: Vec<u8>) {
        *self.known_addresses.write() = Some(addresses);
    }

    /// Send one command under the bus lock.
    #[instrument(skip(self, command), fields(address = command.address, mnemonic = %command.mnemonic), err)]
    pub async fn transact(&self, command: &Command) -> PumpResult<Response> {
        self.bus.lock().await.transact(command).await
    }

    /// Build and send a command from a mnemonic and its arguments.
    pub(crate) async fn send(
        &self,
        address: u8,
        mnemonic: Mnemonic,
        args: &[&str],
    ) -> PumpResult<Response> {
        let command = args
            .iter()
            .fold(Command::new(address, mnemonic), |cmd, arg| cmd.arg(*arg));
        self.transact(&command).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream};

    /// Session over a duplex whose far end answers from a script.
    ///
    /// Each entry pairs the expected request line (without terminator) with
    /// the raw response to send back; `None` stays silent.
    pub fn scripted_session(
        script: Vec<(&'static str, Option<&'static [u8]>)>,
    ) -> (PumpSession, tokio::task::JoinHandle<()>) {
        let (host, device) = tokio::io::duplex(1024);
        let session = PumpSession::from_port(Box::new(host));
        session.set_read_timeout(Duration::from_millis(100));
        let handle = tokio::spawn(run_script(device, script));
        (session, handle)
    }

    async fn run_script(device: DuplexStream, script: Vec<(&'static str, Option<&'static [u8]>)>) {
        let mut device = BufReader::new(device);
        for (expected, reply) in script {
            let mut line = String::new();
            device.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), expected);
            if let Some(reply) = reply {
                device.get_mut().write_all(reply).await.unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::scripted_session;
    use super::*;
    use pump_core::DeviceErrorKind;

    #[tokio::test]
    async fn test_transact_round_trip() {
        let (session, script) = scripted_session(vec![("1", Some(&b"\x0201S\x03"[..]))]);
        let resp = session
            .transact(&Command::new(1, Mnemonic::Status))
            .await
            .unwrap();
        assert_eq!(resp.address, 1);
        assert_eq!(resp.status.name(), "stopped");
        script.await.unwrap();
    }

    #[tokio::test]
    async fn test_silence_is_device_timeout() {
        let (session, _script) = scripted_session(vec![("7", None)]);
        let err = session
            .transact(&Command::new(7, Mnemonic::Status))
            .await
            .unwrap_err();
        assert!(matches!(err, PumpError::DeviceTimeout { address: 7, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_device_error_is_raised() {
        let (session, _script) = scripted_session(vec![("2DIA99999", Some(&b"\x0202?OOR\x03"[..]))]);
        let err = session
            .send(2, Mnemonic::Diameter, &["99999"])
            .await
            .unwrap_err();
        assert_eq!(err.device_kind(), Some(DeviceErrorKind::DataOutOfRange));
    }

    #[tokio::test]
    async fn test_address_mismatch_is_malformed() {
        let (session, _script) = scripted_session(vec![("3", Some(&b"\x0204S\x03"[..]))]);
        let err = session
            .transact(&Command::new(3, Mnemonic::Status))
            .await
            .unwrap_err();
        assert!(matches!(err, PumpError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_stale_bytes_are_drained() {
        use tokio::io::AsyncWriteExt;

        let (host, mut device) = tokio::io::duplex(1024);
        let session = PumpSession::from_port(Box::new(host));
        session.set_read_timeout(Duration::from_millis(100));

        // A late reply to an earlier command sits in the buffer.
        device.write_all(b"\x0209S\x03").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let responder = tokio::spawn(async move {
            let mut device = BufReader::new(device);
            let mut line = String::new();
            tokio::io::AsyncBufReadExt::read_line(&mut device, &mut line)
                .await
                .unwrap();
            device.get_mut().write_all(b"\x0201I\x03").await.unwrap();
        });

        let resp = session
            .transact(&Command::new(1, Mnemonic::Status))
            .await
            .unwrap();
        assert_eq!(resp.address, 1);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_is_drained() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

        let (host, device) = tokio::io::duplex(1024);
        let session = PumpSession::from_port(Box::new(host));
        session.set_read_timeout(Duration::from_millis(30));

        let responder = tokio::spawn(async move {
            let mut device = BufReader::new(device);
            let mut line = String::new();
            device.read_line(&mut line).await.unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
            device.get_mut().write_all(b"\x0207S\x03").await.unwrap();
            line.clear();
            device.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), "8");
            device.get_mut().write_all(b"\x0208S\x03").await.unwrap();
        });

        let mut bus = session.bus().lock().await;
        let err = bus
            .transact(&Command::new(7, Mnemonic::Status))
            .await
            .unwrap_err();
        assert!(matches!(err, PumpError::DeviceTimeout { address: 7, .. }));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let resp = bus
            .transact(&Command::new(8, Mnemonic::Status))
            .await
            .unwrap();
        assert_eq!(resp.address, 8);
        drop(bus);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_sessions_opened_separately_keep_their_own_timeout() {
        let (first_host, _first_device) = tokio::io::duplex(64);
        let (second_host, _second_device) = tokio::io::duplex(64);
        let first = PumpSession::from_port(Box::new(first_host));
        let second = PumpSession::from_port(Box::new(second_host));

        first.set_read_timeout(Duration::from_millis(40));
        assert_eq!(first.timeout_profile().source, TimeoutSource::Explicit);
        assert_eq!(second.timeout_profile(), TimeoutProfile::default());

        let joined = PumpSession::from_bus(first.bus().clone());
        assert_eq!(joined.timeout_profile().read_timeout, Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let settings = SerialSettings::new("/dev/syrpump-missing-port");
        assert!(PumpSession::open(&settings).await.is_err());
    }

    #[test]
    fn test_timeout_profile_from_round_trip() {
        let profile = TimeoutProfile::from_round_trip(
            Duration::from_millis(100),
            10,
            4.0,
            Duration::from_millis(20),
        );
        assert!((profile.read_timeout.as_secs_f64() - 0.040).abs() < 1e-6);
        assert_eq!(profile.source, TimeoutSource::Calibrated);

        let floored = TimeoutProfile::from_round_trip(
            Duration::from_millis(10),
            10,
            4.0,
            Duration::from_millis(20),
        );
        assert_eq!(floored.read_timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_default_profile_is_not_fitted() {
        assert!(!TimeoutProfile::default().is_fitted());
        assert!(TimeoutProfile::explicit(Duration::from_millis(50)).is_fitted());
    }
}
