//! End-to-end tests against a simulated multi-drop bus.

use pump_driver_mock::SimulatedBus;
use std::sync::Arc;
use std::time::Duration;
use syrpump::{
    AddressSpec, CalibrationSettings, ComMode, ConfigRecord, DeviceSettings, PhaseDatum,
    PhaseFunction, PhaseStep, PumpError, PumpSession, RateSetting, Status, TimeoutSource,
    TriggerSetup, VolumeSetting,
};
use tracing_test::traced_test;

const MIN_TIMEOUT: Duration = Duration::from_millis(20);

fn session_on(bus: &SimulatedBus) -> PumpSession {
    PumpSession::from_port(bus.connect())
}

async fn calibrated(bus: &SimulatedBus, reference: u8) -> PumpSession {
    let session = session_on(bus);
    let settings = CalibrationSettings {
        samples: 5,
        min_timeout: MIN_TIMEOUT,
        ..CalibrationSettings::with_reference(reference)
    };
    session.calibrate_timeout(&settings).await.unwrap();
    session
}

fn rate_step(rate: f64) -> PhaseStep {
    PhaseStep::new(PhaseFunction::Rate)
        .with_rate(RateSetting::new(rate, "ml", "min"))
        .with_volume(VolumeSetting::new(2.0, "ml"))
        .with_direction("infuse")
}

fn sample_program() -> Vec<PhaseStep> {
    vec![
        rate_step(5.0),
        PhaseStep::with_datum(PhaseFunction::Jump, PhaseDatum::Phase(1)),
        PhaseStep::stop(),
    ]
}

#[tokio::test]
async fn test_calibrate_then_scan() {
    let bus = SimulatedBus::with_addresses([3, 17, 42]);
    let session = calibrated(&bus, 17).await;

    let profile = session.timeout_profile();
    assert_eq!(profile.source, TimeoutSource::Calibrated);
    assert!(profile.read_timeout >= MIN_TIMEOUT);

    assert_eq!(session.scan_addresses().await.unwrap(), vec![3, 17, 42]);
    assert_eq!(session.known_addresses(), Some(vec![3, 17, 42]));
}

#[tokio::test]
async fn test_program_round_trip() {
    let bus = SimulatedBus::with_addresses([4]);
    let session = session_on(&bus);

    session.write_program(4, &sample_program()).await.unwrap();
    let slots = bus.pump(4).unwrap().phases;
    assert_eq!(slots[0].function, "RAT");
    assert_eq!(slots[1].datum.as_deref(), Some("01"));

    let program = session.read_program(4).await.unwrap();
    assert_eq!(program, sample_program());
}

#[tokio::test]
async fn test_pause_datum_round_trip() {
    let bus = SimulatedBus::with_addresses([0]);
    let session = session_on(&bus);
    let program: Vec<PhaseStep> = [
        PhaseDatum::Pause(syrpump::PauseDuration::Tenths(2.5)),
        PhaseDatum::Pause(syrpump::PauseDuration::Seconds(30)),
    ]
    .into_iter()
    .map(|datum| PhaseStep::with_datum(PhaseFunction::Pause, datum))
    .chain(std::iter::once(PhaseStep::stop()))
    .collect();

    session.write_program(0, &program).await.unwrap();
    assert_eq!(session.read_program(0).await.unwrap(), program);
}

#[tokio::test]
async fn test_invalid_program_touches_no_pump() {
    let bus = SimulatedBus::with_addresses([1]);
    let session = session_on(&bus);
    let before = bus.pump(1).unwrap();

    let program = vec![
        rate_step(5.0),
        PhaseStep::with_datum(PhaseFunction::Jump, PhaseDatum::Phase(42)),
    ];
    assert!(matches!(
        session.write_program(1, &program).await,
        Err(PumpError::ValueOutOfRange { .. })
    ));
    assert_eq!(bus.pump(1).unwrap(), before);
}

#[tokio::test]
async fn test_write_and_read_configs_combine() {
    let bus = SimulatedBus::with_addresses([3, 17, 42]);
    let session = calibrated(&bus, 3).await;

    let settings = DeviceSettings {
        diameter: Some(26.7),
        com_mode: Some(ComMode::Basic),
        alarm: Some(true),
        power_fail: Some(false),
        trigger: Some(TriggerSetup::named("foot switch")),
        key_beep: Some(false),
        program: Some(sample_program()),
    };
    let record = ConfigRecord {
        address: AddressSpec::List(vec![3, 17]),
        settings: settings.clone(),
    };
    session.write_config(&record).await.unwrap();
    assert_eq!(bus.pump(17).unwrap().diameter, 26.7);

    let records = session.read_configs(&AddressSpec::All).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], record);
    assert_eq!(records[1].address, AddressSpec::Single(42));
    assert_eq!(records[1].settings.program, Some(vec![PhaseStep::stop()]));
}

#[tokio::test]
async fn test_all_scans_once_then_uses_cache() {
    let bus = SimulatedBus::with_addresses([5, 6]);
    let session = calibrated(&bus, 5).await;
    assert_eq!(session.known_addresses(), None);

    let record = ConfigRecord {
        address: AddressSpec::All,
        settings: DeviceSettings {
            alarm: Some(true),
            ..Default::default()
        },
    };
    session.write_config(&record).await.unwrap();
    assert_eq!(session.known_addresses(), Some(vec![5, 6]));
    assert!(bus.pump(5).unwrap().alarm_enabled);
    assert!(bus.pump(6).unwrap().alarm_enabled);

    // A pump added after the scan is not part of "all" until the next scan.
    bus.insert(7, Default::default());
    assert_eq!(
        session.resolve_addresses(&AddressSpec::All).await.unwrap(),
        vec![5, 6]
    );
}

#[tokio::test]
async fn test_all_without_fitted_timeout_fails() {
    let bus = SimulatedBus::with_addresses([0]);
    let session = session_on(&bus);
    assert!(matches!(
        session.resolve_addresses(&AddressSpec::All).await,
        Err(PumpError::Configuration(_))
    ));
}

#[tokio::test]
#[traced_test]
async fn test_alarm_is_reported_as_warning() {
    let bus = SimulatedBus::with_addresses([2]);
    let session = session_on(&bus);
    bus.with_pump(2, |pump| pump.pending_alarm = Some('S'));

    let status = session.get_status(2).await.unwrap();
    assert!(status.is_alarm());
    assert_eq!(status.name(), "pump motor stalled");
    assert!(logs_contain("Pump reported alarm"));

    let status = session.get_status(2).await.unwrap();
    assert!(matches!(status, Status::Prompt(_)));
}

#[tokio::test]
async fn test_device_error_surfaces_kind() {
    let bus = SimulatedBus::with_addresses([8]);
    let session = session_on(&bus);
    session.set_phase(8, 41).await.unwrap();
    assert_eq!(session.get_phase(8).await.unwrap(), 41);
    bus.with_pump(8, |pump| {
        pump.pending_error = Some(syrpump::DeviceErrorKind::CommandIgnored)
    });
    let err = session.start_program(8).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.device_kind(), Some(syrpump::DeviceErrorKind::CommandIgnored));
}

#[tokio::test]
async fn test_run_and_stop() {
    let bus = SimulatedBus::with_addresses([9]);
    let session = session_on(&bus);

    session.start_program(9).await.unwrap();
    assert_eq!(session.get_status(9).await.unwrap().name(), "infusing");
    session.stop_program(9).await.unwrap();
    assert_eq!(session.get_status(9).await.unwrap().name(), "stopped");
    assert_eq!(
        session.get_firmware_version(9).await.unwrap(),
        "NE1000V3.934"
    );
}

#[tokio::test]
async fn test_sessions_on_one_bus_do_not_interleave() {
    let bus = SimulatedBus::with_addresses([10, 11]);
    let first = session_on(&bus);
    let second = Arc::new(PumpSession::from_bus(first.bus().clone()));
    let first = Arc::new(first);

    let long: Vec<PhaseStep> = (1..=20)
        .map(|i| rate_step(f64::from(i)))
        .chain(std::iter::once(PhaseStep::stop()))
        .collect();
    let other: Vec<PhaseStep> = (1..=20)
        .map(|i| rate_step(f64::from(i) + 100.0))
        .chain(std::iter::once(PhaseStep::stop()))
        .collect();

    let (a, b) = tokio::join!(
        {
            let session = first.clone();
            let program = long.clone();
            async move { session.write_program(10, &program).await }
        },
        {
            let session = second.clone();
            let program = other.clone();
            async move { session.write_program(11, &program).await }
        }
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(first.read_program(10).await.unwrap(), long);
    assert_eq!(second.read_program(11).await.unwrap(), other);
}
