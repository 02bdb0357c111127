//! End-to-end tests driving a spawned worker thread over a simulated sensor.

use carbio_core::SensorConfig;
use carbio_hardware::FingerprintSensor;
use carbio_hardware::mock::{MockTransport, SimulatedSensor, SimulatedSensorHandle};
use carbio_worker::{SensorEvent, SensorHandle, SensorWorker, WorkerConfig};
use std::thread;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn spawn_worker(config: WorkerConfig) -> (SensorHandle, SimulatedSensorHandle) {
    let (device, fingers) = SimulatedSensor::new();
    let (transport, _wire) = MockTransport::with_device(device);
    let sensor_config = SensorConfig::default()
        .with_path("/dev/mock")
        .with_timeout(Duration::from_millis(5))
        .with_settle_delay(Duration::ZERO);
    let mut sensor = FingerprintSensor::new(transport, sensor_config);
    sensor.open().expect("open simulated sensor");
    let handle = SensorWorker::spawn(sensor, config).expect("spawn worker");
    (handle, fingers)
}

/// Receive events until one matches, failing the test after [`WAIT`].
async fn wait_for(handle: &mut SensorHandle, wanted: impl Fn(&SensorEvent) -> bool) -> SensorEvent {
    timeout(WAIT, async {
        loop {
            match handle.recv_event().await {
                Some(event) if wanted(&event) => return event,
                Some(_) => continue,
                None => panic!("worker stopped before the expected event"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_auth_polling_reports_match() {
    let (mut handle, fingers) = spawn_worker(WorkerConfig::default());
    fingers.enroll(4, 77);
    handle.start_auth_polling();

    tokio::time::sleep(Duration::from_millis(20)).await;
    fingers.place_finger(77);

    let event = wait_for(&mut handle, |e| matches!(e, SensorEvent::AuthenticationSuccess { .. })).await;
    let SensorEvent::AuthenticationSuccess { finger_id, .. } = event else {
        unreachable!();
    };
    assert_eq!(finger_id.value(), 4);

    let result = handle.latest_auth_result().expect("auth result published");
    assert!(result.success);
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_auth_polling_reports_unknown_finger_once() {
    let (mut handle, fingers) = spawn_worker(WorkerConfig::default());
    fingers.place_finger(3);
    handle.start_auth_polling();

    wait_for(&mut handle, |e| *e == SensorEvent::AuthenticationFailed).await;

    // The finger never left the sensor, so no second report.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(event) = handle.try_recv_event() {
        assert_ne!(event, SensorEvent::AuthenticationFailed);
    }
    assert!(!handle.latest_auth_result().unwrap().success);

    handle.stop_auth_polling();
    wait_for(&mut handle, |e| *e == SensorEvent::ScanProgress(0)).await;
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_admin_polling_times_out() {
    let config = WorkerConfig::default().with_admin_deadline(Duration::from_millis(30));
    let (mut handle, _fingers) = spawn_worker(config);
    handle.start_admin_polling();

    wait_for(&mut handle, |e| *e == SensorEvent::AdminNoFinger).await;
    let result = handle.latest_admin_result().unwrap();
    assert!(result.valid && !result.success);
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_admin_polling_accepts_admin_finger() {
    let (mut handle, fingers) = spawn_worker(WorkerConfig::default());
    fingers.enroll(0, 500);
    fingers.place_finger(500);
    handle.start_admin_polling();

    wait_for(&mut handle, |e| matches!(e, SensorEvent::AdminSuccess { .. })).await;
    assert_eq!(handle.latest_admin_result().unwrap().finger_id.value(), 0);
    handle.shutdown().unwrap();
}

#[tokio::test]
async fn test_settings_and_library_commands() {
    let (mut handle, fingers) = spawn_worker(WorkerConfig::default());
    fingers.enroll(10, 1);
    fingers.enroll(11, 2);

    handle.refresh_template_count();
    assert_eq!(
        wait_for(&mut handle, |e| matches!(e, SensorEvent::TemplateCount(_))).await,
        SensorEvent::TemplateCount(2)
    );

    handle.set_baud_rate(12);
    let event = wait_for(&mut handle, |e| matches!(e, SensorEvent::OperationComplete(_))).await;
    assert_eq!(event.message(), Some("Baud rate set to 115200 bps"));
    assert_eq!(fingers.settings().baud_rate, 12);

    handle.delete_template(10);
    let event = wait_for(&mut handle, |e| matches!(e, SensorEvent::OperationComplete(_))).await;
    assert_eq!(event.message(), Some("Fingerprint #10 deleted"));
    assert_eq!(fingers.template(10), None);

    handle.shutdown().unwrap();
}

#[test]
fn test_enrollment_with_finger_lift() {
    let (handle, fingers) = spawn_worker(WorkerConfig::default());
    handle.enroll(9);
    fingers.place_finger(321);

    let first = handle.next_enrollment_stage_timeout(WAIT).expect("first stage");
    assert_eq!((first.success, first.stage), (true, 0));

    fingers.remove_finger();
    thread::sleep(Duration::from_millis(50));
    fingers.place_finger(321);

    let model = handle.next_enrollment_stage_timeout(WAIT).expect("model stage");
    assert_eq!((model.success, model.stage), (true, 1));
    let stored = handle.next_enrollment_stage_timeout(WAIT).expect("store stage");
    assert!(stored.success && stored.is_terminal());
    assert_eq!(fingers.template(9), Some(321));

    handle.shutdown().unwrap();
}

#[test]
fn test_shutdown_joins_worker() {
    let (handle, _fingers) = spawn_worker(WorkerConfig::default());
    handle.start_auth_polling();
    assert!(handle.is_running());
    handle.shutdown().unwrap();
}

#[test]
fn test_spawn_rejects_invalid_config() {
    let (device, _fingers) = SimulatedSensor::new();
    let (transport, _wire) = MockTransport::with_device(device);
    let sensor = FingerprintSensor::new(transport, SensorConfig::default());
    let config = WorkerConfig {
        tick_ms: 0,
        ..WorkerConfig::default()
    };
    assert!(SensorWorker::spawn(sensor, config).is_err());
}
