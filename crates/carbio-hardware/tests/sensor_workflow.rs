//! Whole-workflow tests: a `FingerprintSensor` over the simulated device.

use carbio_core::{SensorConfig, StatusCode};
use carbio_hardware::FingerprintSensor;
use carbio_hardware::mock::{MockTransport, SimulatedSensor, SimulatedSensorHandle};
use carbio_protocol::{CommandCode, SecurityLevel};
use rstest::rstest;
use std::time::Duration;

fn open_sensor() -> (FingerprintSensor<MockTransport>, SimulatedSensorHandle) {
    let (device, fingers) = SimulatedSensor::new();
    let (transport, _wire) = MockTransport::with_device(device);
    let config = SensorConfig::default()
        .with_path("/dev/mock")
        .with_timeout(Duration::from_millis(5))
        .with_settle_delay(Duration::ZERO);
    let mut sensor = FingerprintSensor::new(transport, config);
    sensor.open().unwrap();
    (sensor, fingers)
}

fn enroll(sensor: &mut FingerprintSensor<MockTransport>, fingers: &SimulatedSensorHandle, page: u16, print: u16) {
    fingers.place_finger(print);
    sensor.capture_image().unwrap();
    sensor.extract_features(1).unwrap();
    fingers.remove_finger();
    fingers.place_finger(print);
    sensor.capture_image().unwrap();
    sensor.extract_features(2).unwrap();
    sensor.create_model().unwrap();
    sensor.store_model(page, 1).unwrap();
    fingers.remove_finger();
}

#[test]
fn test_enroll_then_search() {
    let (mut sensor, fingers) = open_sensor();
    enroll(&mut sensor, &fingers, 7, 1234);
    assert_eq!(fingers.template(7), Some(1234));
    assert_eq!(sensor.model_count().unwrap(), 1);

    let table = sensor.read_index_table(0).unwrap();
    assert!(table.contains(7));
    assert_eq!(table.count(), 1);

    fingers.place_finger(1234);
    sensor.capture_image().unwrap();
    sensor.extract_features(1).unwrap();
    let found = sensor.fast_search_model(1, 0, 127).unwrap();
    assert_eq!(found.index, 7);
    assert_eq!(found.confidence, 200);

    let found = sensor.search_model(1, 0, 127).unwrap();
    assert_eq!(found.index, 7);
}

#[test]
fn test_verify_against_single_slot() {
    let (mut sensor, fingers) = open_sensor();
    fingers.enroll(3, 10);
    fingers.enroll(4, 11);

    fingers.place_finger(11);
    sensor.capture_image().unwrap();
    sensor.extract_features(1).unwrap();
    sensor.load_model(3, 2).unwrap();
    assert!(sensor.match_model().unwrap_err().is(StatusCode::NoMatch));

    // Searching only slot 3 never reports the match in slot 4.
    let err = sensor.fast_search_model(1, 3, 1).unwrap_err();
    assert!(err.is(StatusCode::NotFound));
    assert_eq!(sensor.fast_search_model(1, 4, 1).unwrap().index, 4);
}

#[test]
fn test_mismatched_captures_do_not_make_a_model() {
    let (mut sensor, fingers) = open_sensor();
    fingers.place_finger(1);
    sensor.capture_image().unwrap();
    sensor.extract_features(1).unwrap();
    fingers.place_finger(2);
    sensor.capture_image().unwrap();
    sensor.extract_features(2).unwrap();

    let err = sensor.create_model().unwrap_err();
    assert!(err.is(StatusCode::EnrollmentMismatch));
}

#[test]
fn test_no_finger_is_reported() {
    let (mut sensor, _fingers) = open_sensor();
    let err = sensor.capture_image().unwrap_err();
    assert!(err.is(StatusCode::NoFinger));
    assert!(!err.is_transient());
}

#[rstest]
#[case(StatusCode::ImageTooFaint, true)]
#[case(StatusCode::CommunicationError, true)]
#[case(StatusCode::HardwareFault, true)]
#[case(StatusCode::DatabaseAccessError, false)]
fn test_injected_capture_faults(#[case] status: StatusCode, #[case] transient: bool) {
    let (mut sensor, fingers) = open_sensor();
    fingers.place_finger(5);
    fingers.fail_next(CommandCode::CaptureImage, status);

    let err = sensor.capture_image().unwrap_err();
    assert_eq!(err.status(), Some(status));
    assert_eq!(err.is_transient(), transient);
    sensor.capture_image().unwrap();
}

#[test]
fn test_silent_device_times_out_then_recovers() {
    let (mut sensor, fingers) = open_sensor();
    fingers.silence_next(CommandCode::CountModel);
    assert!(sensor.model_count().unwrap_err().is_transient());
    assert_eq!(sensor.model_count().unwrap(), 0);
}

#[test]
fn test_erase_and_clear() {
    let (mut sensor, fingers) = open_sensor();
    for page in 1..=4 {
        fingers.enroll(page, page + 100);
    }
    sensor.erase_model(2, 2).unwrap();
    assert_eq!(fingers.template(2), None);
    assert_eq!(fingers.template(3), None);
    assert_eq!(sensor.model_count().unwrap(), 2);

    sensor.clear_database().unwrap();
    assert_eq!(sensor.model_count().unwrap(), 0);
    assert!(
        sensor
            .load_model(1, 1)
            .unwrap_err()
            .is(StatusCode::DatabaseAccessError)
    );
}

#[test]
fn test_out_of_range_page() {
    let (mut sensor, fingers) = open_sensor();
    fingers.place_finger(1);
    sensor.capture_image().unwrap();
    sensor.extract_features(1).unwrap();
    assert!(sensor.store_model(127, 1).unwrap_err().is(StatusCode::IndexOutOfRange));
}

#[test]
fn test_settings_round_trip() {
    let (mut sensor, fingers) = open_sensor();
    sensor.set_security_level(SecurityLevel::High).unwrap();
    assert_eq!(fingers.settings().security_level, SecurityLevel::High as u16);
    assert_eq!(
        sensor.device_settings().unwrap().security_level,
        SecurityLevel::High as u16
    );

    sensor.led_on().unwrap();
    assert!(fingers.led().on);
    sensor.led_off().unwrap();
    assert!(!fingers.led().on);
}
