//! Program files saved from one bus and applied to another.

use pump_driver_mock::SimulatedBus;
use std::time::Duration;
use syrpump::program_file::{apply_program_file, load_records, save_program_file, save_records};
use syrpump::{
    AddressSpec, ConfigRecord, DeviceSettings, PhaseDatum, PhaseFunction, PhaseStep, PumpSession,
};
use tempfile::tempdir;

fn looping_program() -> Vec<PhaseStep> {
    vec![
        PhaseStep::new(PhaseFunction::LoopStart),
        PhaseStep::with_datum(PhaseFunction::Output, PhaseDatum::Ttl(1)),
        PhaseStep::with_datum(PhaseFunction::LoopFor, PhaseDatum::Count(3)),
        PhaseStep::stop(),
    ]
}

#[tokio::test]
async fn test_save_then_apply_to_another_bus() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pumps.json");

    let source = SimulatedBus::with_addresses([1, 2]);
    let session = PumpSession::from_port(source.connect());
    session.set_read_timeout(Duration::from_millis(50));
    let record = ConfigRecord {
        address: AddressSpec::List(vec![1, 2]),
        settings: DeviceSettings {
            diameter: Some(14.43),
            program: Some(looping_program()),
            ..Default::default()
        },
    };
    session.write_config(&record).await.unwrap();

    let saved = save_program_file(&session, &AddressSpec::List(vec![1, 2]), &path)
        .await
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(load_records(&path).await.unwrap(), saved);

    let target = SimulatedBus::with_addresses([1, 2]);
    let session = PumpSession::from_port(target.connect());
    session.set_read_timeout(Duration::from_millis(50));
    assert_eq!(apply_program_file(&session, &path).await.unwrap(), 1);

    for address in [1, 2] {
        assert_eq!(target.pump(address).unwrap().diameter, 14.43);
        assert_eq!(
            session.read_program(address).await.unwrap(),
            looping_program()
        );
    }
}

#[tokio::test]
async fn test_apply_stops_at_first_failing_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pumps.json");
    let records = vec![
        ConfigRecord {
            address: AddressSpec::Single(3),
            settings: DeviceSettings {
                alarm: Some(true),
                ..Default::default()
            },
        },
        ConfigRecord {
            address: AddressSpec::Single(3),
            settings: DeviceSettings {
                program: Some(vec![PhaseStep::with_datum(
                    PhaseFunction::Jump,
                    PhaseDatum::Phase(42),
                )]),
                ..Default::default()
            },
        },
        ConfigRecord {
            address: AddressSpec::Single(3),
            settings: DeviceSettings {
                key_beep: Some(false),
                ..Default::default()
            },
        },
    ];
    save_records(&path, &records).await.unwrap();

    let bus = SimulatedBus::with_addresses([3]);
    let session = PumpSession::from_port(bus.connect());
    let err = apply_program_file(&session, &path).await.unwrap_err();
    assert!(err.to_string().contains("Record 1"));

    let pump = bus.pump(3).unwrap();
    assert!(pump.alarm_enabled);
    assert!(pump.key_beep);
}

#[tokio::test]
async fn test_missing_file_is_reported() {
    let dir = tempdir().unwrap();
    let err = load_records(dir.path().join("absent.json"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("absent.json"));
}
