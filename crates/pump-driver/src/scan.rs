//! Read-timeout calibration and address scanning.
//!
//! An unpopulated address never answers, so discovering pumps means waiting
//! out one read timeout per empty address. Calibration measures the round trip
//! of status queries to a known pump and sets the timeout to a multiple of it;
//! the scan then queries all 100 addresses with that timeout. Both hold the bus
//! lock for their whole sweep.

use crate::frame::{Command, Mnemonic};
use crate::session::{PumpSession, TimeoutProfile};
use pump_core::limits::{
    ADDRESS, CALIBRATION_SAFETY_FACTOR, CALIBRATION_SAMPLES, MIN_READ_TIMEOUT,
};
use pump_core::{PumpError, PumpResult};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Parameters of a timeout calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSettings {
    /// A pump known to be present.
    pub reference: u8,
    pub samples: u32,
    pub safety_factor: f64,
    /// Floor for the derived timeout.
    pub min_timeout: Duration,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            reference: 0,
            samples: CALIBRATION_SAMPLES,
            safety_factor: CALIBRATION_SAFETY_FACTOR,
            min_timeout: MIN_READ_TIMEOUT,
        }
    }
}

impl CalibrationSettings {
    pub fn with_reference(reference: u8) -> Self {
        Self {
            reference,
            ..Self::default()
        }
    }
}

impl PumpSession {
    /// Measure the bus round trip and install the derived read timeout.
    ///
    /// Queries run with the current timeout, so the reference pump must
    /// answer within it. Any failure leaves the profile unchanged.
    #[instrument(skip(self, settings), fields(reference = settings.reference), err)]
    pub async fn calibrate_timeout(
        &self,
        settings: &CalibrationSettings,
    ) -> PumpResult<TimeoutProfile> {
        ADDRESS.check(settings.reference.into())?;
        if settings.samples == 0 || settings.safety_factor.is_nan() || settings.safety_factor <= 0.0 {
            return Err(PumpError::Configuration(format!(
                "calibration needs at least one sample and a positive safety factor, got {} and {}",
                settings.samples, settings.safety_factor
            )));
        }

        let command = Command::new(settings.reference, Mnemonic::Status);
        let mut bus = self.bus().lock().await;
        let start = Instant::now();
        for _ in 0..settings.samples {
            bus.transact(&command).await?;
        }
        let elapsed = start.elapsed();

        let profile = TimeoutProfile::from_round_trip(
            elapsed,
            settings.samples,
            settings.safety_factor,
            settings.min_timeout,
        );
        self.bus().set_timeout_profile(profile);
        tracing::info!(
            samples = settings.samples,
            elapsed_ms = elapsed.as_millis() as u64,
            timeout_ms = profile.read_timeout.as_millis() as u64,
            "Calibrated read timeout"
        );
        Ok(profile)
    }

    /// Query every address and return the ones that answer, ascending.
    ///
    /// A timeout marks an address empty. A device error still proves a pump
    /// is there. Framing errors abort the scan. The result is cached as the
    /// default address list for `"all"`.
    #[instrument(skip(self), err)]
    pub async fn scan_addresses(&self) -> PumpResult<Vec<u8>> {
        let profile = self.timeout_profile();
        if !profile.is_fitted() {
            return Err(PumpError::Configuration(
                "calibrate or set the read timeout before scanning".to_string(),
            ));
        }

        let mut found = Vec::new();
        {
            let mut bus = self.bus().lock().await;
            for address in ADDRESS.min as u8..=ADDRESS.max as u8 {
                match bus.transact(&Command::new(address, Mnemonic::Status)).await {
                    Ok(_) | Err(PumpError::Device(_)) => found.push(address),
                    Err(PumpError::DeviceTimeout { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(
            count = found.len(),
            addresses = ?found,
            timeout_ms = profile.read_timeout.as_millis() as u64,
            "Address scan complete"
        );
        self.remember_addresses(found.clone());
        Ok(found)
    }
}
