//! The sensor worker thread and the handle used to drive it.
//!
//! # Architecture
//!
//! One dedicated thread owns the [`FingerprintSensor`] for its whole life.
//! Callers never touch the serial port; they queue [`SensorCommand`]s and
//! read results back through three channels:
//!
//! ```text
//!  SensorHandle                              sensor-worker thread
//! ┌─────────────┐  PriorityCommandQueue  ┌──────────────────────────┐
//! │ submit ─────┼───────────────────────►│ tick: queue due polls,   │
//! │             │                        │ pop, execute one command │
//! │ latest_*  ◄─┼──── triple buffers ────┤                          │
//! │ next_enroll◄┼──── BlockingQueue ─────┤  FingerprintSensor       │
//! │ recv_event◄─┼──── mpsc events ───────┤  (transport owned here)  │
//! └─────────────┘                        └──────────────────────────┘
//! ```
//!
//! Polling channels are not threads. Each one is a timer inside the worker
//! that queues a poll command when it falls due, unless one is still queued:
//!
//! | Channel | Priority | Kind | Interval |
//! |---------|----------|------|----------|
//! | authentication | Low | `OperationalPoll` | adaptive 5 / 1 / 3 ms |
//! | admin | Critical | `AdminPoll` | 3 ms, with a deadline |
//! | dialog operation | High | `None` | 3 ms |
//!
//! Admin polls purge queued authentication polls and every `Low` command so
//! the device is free for the privileged check. The authentication timer
//! queues nothing while admin polling is active. Handle commands run at
//! `High` or above so a busy authentication loop cannot starve them.
//!
//! # Examples
//!
//! ```no_run
//! use carbio_core::SensorConfig;
//! use carbio_hardware::{FingerprintSensor, SerialTransport};
//! use carbio_worker::{SensorEvent, SensorWorker, WorkerConfig};
//!
//! # async fn run() -> carbio_core::Result<()> {
//! let config = SensorConfig::from_env();
//! let transport = SerialTransport::new();
//! let mut sensor = FingerprintSensor::new(transport, config);
//! sensor.open()?;
//!
//! let mut handle = SensorWorker::spawn(sensor, WorkerConfig::default())?;
//! handle.start_auth_polling();
//! while let Some(event) = handle.recv_event().await {
//!     if let SensorEvent::AuthenticationSuccess { .. } = event {
//!         break;
//!     }
//! }
//! handle.shutdown()
//! # }
//! ```

use crate::command::{CommandKind, Priority, SensorAction, SensorCommand};
use crate::config::WorkerConfig;
use crate::events::SensorEvent;
use crate::polling::AdaptivePoller;
use crate::queue::PriorityCommandQueue;
use crate::results::{AdminResult, AuthResult, EnrollmentStageResult, ScanResult, VerifyResult};
use crate::sync::{BlockingQueue, TripleBufferReader, TripleBufferWriter, triple_buffer};
use carbio_core::constants::INDEX_TABLE_SIZE;
use carbio_core::{Error, Result, Sensitive, StatusCode};
use carbio_hardware::{FingerprintSensor, Transport};
use carbio_protocol::{BaudRate, DeviceSettings, PacketLength, SearchResult, SecurityLevel};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

const THREAD_NAME: &str = "sensor-worker";

/// Template slots covered by one index table page.
const SLOTS_PER_PAGE: u16 = (INDEX_TABLE_SIZE * 8) as u16;

#[derive(Debug, Default)]
struct PollTimer {
    next_due: Option<Instant>,
}

impl PollTimer {
    fn start(&mut self, now: Instant) {
        self.next_due = Some(now);
    }

    fn stop(&mut self) {
        self.next_due = None;
    }

    fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    fn rearm(&mut self, now: Instant, interval: Duration) {
        if self.is_active() {
            self.next_due = Some(now + interval);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnrollStep {
    First,
    /// First template taken; waiting for the finger to leave the sensor.
    AwaitRemoval,
    Second,
}

/// Capture-polled dialog operation in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Find,
    Identify,
    Verify(u16),
    Enroll { id: u16, step: EnrollStep },
}

enum Capture {
    Present,
    Absent,
    Transient,
    Fault(Error),
}

enum Identification {
    Matched(SearchResult),
    Unrecognized,
    Transient,
    Fault(&'static str),
}

/// Owns the sensor on the worker thread.
///
/// Build one with [`SensorWorker::spawn`]; the returned [`SensorHandle`] is
/// the only way to talk to it.
pub struct SensorWorker<T: Transport> {
    sensor: FingerprintSensor<T>,
    config: WorkerConfig,

    queue: Arc<PriorityCommandQueue>,
    running: Arc<AtomicBool>,
    events: mpsc::Sender<SensorEvent>,
    auth_results: TripleBufferWriter<AuthResult>,
    admin_results: TripleBufferWriter<AdminResult>,
    verify_results: TripleBufferWriter<VerifyResult>,
    enrollment: Arc<BlockingQueue<EnrollmentStageResult>>,

    settings: Option<DeviceSettings>,
    poller: AdaptivePoller,
    auth_timer: PollTimer,
    admin_timer: PollTimer,
    operation_timer: PollTimer,
    admin_deadline: Option<Instant>,
    /// Auth polling ignores a finger until it has been lifted once, so a
    /// rejected finger resting on the sensor is not reported again.
    finger_lifted: bool,
    operation: Option<Operation>,
}

impl<T: Transport + 'static> SensorWorker<T> {
    /// Start the worker thread. `sensor` should already be open.
    pub fn spawn(sensor: FingerprintSensor<T>, config: WorkerConfig) -> Result<SensorHandle> {
        config.validate()?;
        let (worker, mut handle) = Self::new(sensor, config);
        let thread = thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || worker.run())?;
        handle.thread = Some(thread);
        Ok(handle)
    }
}

impl<T: Transport> SensorWorker<T> {
    /// Wire up a worker and its handle without starting a thread.
    fn new(sensor: FingerprintSensor<T>, config: WorkerConfig) -> (Self, SensorHandle) {
        let queue = Arc::new(PriorityCommandQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let enrollment = Arc::new(BlockingQueue::new());
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (auth_tx, auth_rx) = triple_buffer();
        let (admin_tx, admin_rx) = triple_buffer();
        let (verify_tx, verify_rx) = triple_buffer();

        let handle = SensorHandle {
            queue: Arc::clone(&queue),
            running: Arc::clone(&running),
            auth_results: auth_rx,
            admin_results: admin_rx,
            verify_results: verify_rx,
            enrollment: Arc::clone(&enrollment),
            events: event_rx,
            thread: None,
        };

        let worker = Self {
            sensor,
            poller: AdaptivePoller::new(config.polling.clone()),
            config,
            queue,
            running,
            events: event_tx,
            auth_results: auth_tx,
            admin_results: admin_tx,
            verify_results: verify_tx,
            enrollment,
            settings: None,
            auth_timer: PollTimer::default(),
            admin_timer: PollTimer::default(),
            operation_timer: PollTimer::default(),
            admin_deadline: None,
            finger_lifted: true,
            operation: None,
        };
        (worker, handle)
    }

    fn run(mut self) {
        info!("Sensor worker started");
        self.prewarm_cache();

        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            self.queue_due_polls(now);
            if let Some(command) = self.queue.pop_until(self.next_wakeup(now)) {
                if !self.execute(command) {
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        self.abandon_operation("Sensor worker stopped");
        self.enrollment.wake_all();
        self.sensor.close();
        info!("Sensor worker stopped");
    }

    /// Earliest timer deadline, capped at one tick from `now`.
    fn next_wakeup(&self, now: Instant) -> Instant {
        let auth = (!self.auth_suspended()).then_some(&self.auth_timer);
        [auth, Some(&self.admin_timer), Some(&self.operation_timer)]
            .into_iter()
            .flatten()
            .filter_map(|timer| timer.next_due)
            .fold(now + self.config.tick(), Instant::min)
    }

    /// Authentication polling stays armed but idle while admin polling owns
    /// the sensor.
    fn auth_suspended(&self) -> bool {
        self.admin_timer.is_active()
    }

    fn queue_due_polls(&mut self, now: Instant) {
        if self.auth_timer.is_due(now) && !self.auth_suspended() {
            self.queue_poll(Priority::Low, CommandKind::OperationalPoll, SensorAction::AuthPoll);
            let interval = self.poller.interval(now);
            self.auth_timer.rearm(now, interval);
        }
        if self.admin_timer.is_due(now) {
            self.queue_poll(Priority::Critical, CommandKind::AdminPoll, SensorAction::AdminPoll);
            self.admin_timer.rearm(now, self.config.admin_poll_interval());
        }
        if self.operation_timer.is_due(now) {
            self.queue_poll(Priority::High, CommandKind::None, SensorAction::OperationPoll);
            self.operation_timer
                .rearm(now, self.config.operation_poll_interval());
        }
    }

    fn queue_poll(&self, priority: Priority, kind: CommandKind, action: SensorAction) {
        if !self.queue.contains(|c| c.action == action) {
            self.queue.push(SensorCommand::new(priority, kind, action));
        }
    }

    /// Run one command. Returns `false` when the worker should exit.
    fn execute(&mut self, command: SensorCommand) -> bool {
        trace!(action = %command.action, priority = ?command.priority, "execute");
        let now = Instant::now();
        match command.action {
            SensorAction::AuthPoll => self.auth_poll(now),
            SensorAction::AdminPoll => self.admin_poll(now),
            SensorAction::OperationPoll => self.operation_poll(now),

            SensorAction::StartAuthPolling => self.start_auth_polling(now),
            SensorAction::StopAuthPolling => self.stop_auth_polling(),
            SensorAction::StartAdminPolling => self.start_admin_polling(now),
            SensorAction::StopAdminPolling => self.stop_admin_polling(),
            SensorAction::Authenticate => self.authenticate(),
            SensorAction::AuthenticateAdmin => self.authenticate_admin(),

            SensorAction::PrewarmCache => self.prewarm_cache(),

            SensorAction::Enroll(id) => self.enroll(id, now),
            SensorAction::Find => self.begin_operation(Operation::Find, now),
            SensorAction::Identify => self.begin_operation(Operation::Identify, now),
            SensorAction::Verify(id) => self.begin_operation(Operation::Verify(id), now),
            SensorAction::CancelOperation => self.cancel_operation(),

            SensorAction::QueryTemplate(id) => self.query_template(id),
            SensorAction::DeleteTemplate(id) => self.delete_template(id),
            SensorAction::ClearDatabase => self.clear_database(),
            SensorAction::RefreshTemplateCount => self.refresh_template_count(),

            SensorAction::LedOn => self.set_led(true),
            SensorAction::LedOff => self.set_led(false),

            SensorAction::SetBaudRate(choice) => self.set_baud_rate(choice),
            SensorAction::SetSecurityLevel(level) => self.set_security_level(level),
            SensorAction::SetPacketSize(code) => self.set_packet_size(code),
            SensorAction::SoftReset => self.soft_reset(),
            SensorAction::ShowSettings => self.show_settings(),
            SensorAction::ResetSensorState => self.reset_sensor_state(),

            SensorAction::Shutdown => return false,
        }
        true
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    fn emit(&self, event: SensorEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(event = event.name(), "Event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn emit_operation(&self, result: std::result::Result<String, String>) {
        match result {
            Ok(message) => self.emit(SensorEvent::OperationComplete(message)),
            Err(message) => self.emit(SensorEvent::OperationFailed(message)),
        }
    }

    // ========================================================================
    // Settings cache
    // ========================================================================

    fn prewarm_cache(&mut self) {
        if self.settings.is_some() {
            return;
        }
        match self.sensor.device_settings() {
            Ok(settings) => {
                debug!(capacity = settings.capacity, "Device settings cached");
                self.settings = Some(settings);
            }
            Err(e) => warn!("Failed to read device settings: {}", e),
        }
    }

    fn settings(&mut self) -> Result<DeviceSettings> {
        if let Some(settings) = self.settings {
            return Ok(settings);
        }
        let settings = self.sensor.device_settings()?;
        self.settings = Some(settings);
        Ok(settings)
    }

    fn refresh_settings(&mut self) {
        self.settings = None;
        self.prewarm_cache();
    }

    // ========================================================================
    // Capture and search
    // ========================================================================

    fn capture(&mut self) -> Capture {
        match self.sensor.capture_image() {
            Ok(()) => Capture::Present,
            Err(e) if e.is(StatusCode::NoFinger) => Capture::Absent,
            Err(e) if e.is_transient() => Capture::Transient,
            Err(e) => Capture::Fault(e),
        }
    }

    /// Extract the captured image into buffer 1 and search the library.
    fn identify_finger(&mut self, report_progress: bool) -> Identification {
        if report_progress {
            self.emit(SensorEvent::ScanProgress(40));
        }
        if let Err(e) = self.sensor.extract_features(1) {
            if e.is_transient() {
                return Identification::Transient;
            }
            warn!("Feature extraction failed: {}", e);
            return Identification::Fault("Feature extraction failed");
        }
        if report_progress {
            self.emit(SensorEvent::ScanProgress(65));
            self.emit(SensorEvent::Progress("Processing fingerprint...".into()));
            self.emit(SensorEvent::ScanProgress(75));
        }

        let capacity = match self.settings() {
            Ok(settings) => settings.capacity,
            Err(e) => {
                warn!("Failed to read device settings: {}", e);
                return Identification::Fault("Failed to read system parameters");
            }
        };
        match self.sensor.fast_search_model(1, 0, capacity) {
            Ok(found) => {
                debug!(id = found.index, confidence = found.confidence, "Fingerprint matched");
                Identification::Matched(found)
            }
            Err(e) if e.status().is_some_and(StatusCode::is_unrecognized) => {
                Identification::Unrecognized
            }
            Err(e) => {
                warn!("Search failed: {}", e);
                Identification::Transient
            }
        }
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    fn start_auth_polling(&mut self, now: Instant) {
        info!("Authentication polling started");
        self.poller.reset();
        self.finger_lifted = true;
        self.auth_timer.start(now);
    }

    fn stop_auth_polling(&mut self) {
        info!("Authentication polling stopped");
        self.auth_timer.stop();
        self.poller.reset();
        self.queue.clear_type(CommandKind::OperationalPoll);
        self.emit(SensorEvent::ScanProgress(0));
    }

    fn auth_poll(&mut self, now: Instant) {
        if !self.auth_timer.is_active() || self.auth_suspended() {
            return;
        }
        match self.capture() {
            Capture::Absent => {
                self.finger_lifted = true;
                return;
            }
            Capture::Transient => return,
            Capture::Present if !self.finger_lifted => return,
            Capture::Present => {}
            Capture::Fault(e) => {
                warn!("Image capture failed: {}", e);
                self.auth_failed(now, "Image capture failed");
                return;
            }
        }

        match self.identify_finger(false) {
            Identification::Transient => {}
            Identification::Unrecognized => self.auth_failed(now, "Fingerprint not recognized"),
            Identification::Fault(message) => self.auth_failed(now, message),
            Identification::Matched(found) => {
                self.auth_timer.stop();
                self.poller.reset();
                self.emit(SensorEvent::ScanProgress(100));
                self.auth_succeeded(found);
            }
        }
    }

    fn auth_succeeded(&mut self, found: SearchResult) {
        info!("Authentication succeeded");
        self.auth_results.push(ScanResult::matched(
            found.index,
            found.confidence,
            format!("ID #{}", found.index),
        ));
        self.emit(SensorEvent::AuthenticationSuccess {
            finger_id: Sensitive::new(found.index),
            confidence: Sensitive::new(found.confidence),
        });
    }

    fn auth_failed(&mut self, now: Instant, message: &str) {
        debug!(reason = message, "Authentication attempt failed");
        self.poller.record_failure(now);
        self.finger_lifted = false;
        self.auth_results.push(ScanResult::rejected(message));
        self.emit(SensorEvent::AuthenticationFailed);
    }

    /// One attempt with progress reporting. Transient faults count as no finger.
    fn authenticate(&mut self) {
        self.emit(SensorEvent::ScanProgress(5));
        match self.capture() {
            Capture::Present => {}
            Capture::Absent | Capture::Transient => {
                self.emit(SensorEvent::AuthenticationNoFinger);
                return;
            }
            Capture::Fault(e) => {
                warn!("Image capture failed: {}", e);
                self.auth_results.push(ScanResult::rejected("Image capture failed"));
                self.emit(SensorEvent::AuthenticationFailed);
                return;
            }
        }
        self.emit(SensorEvent::ScanProgress(30));
        self.emit(SensorEvent::Progress("Finger detected - capturing...".into()));

        match self.identify_finger(true) {
            Identification::Transient => self.emit(SensorEvent::AuthenticationNoFinger),
            Identification::Unrecognized => {
                self.auth_results.push(ScanResult::rejected("Fingerprint not recognized"));
                self.emit(SensorEvent::AuthenticationFailed);
            }
            Identification::Fault(message) => {
                self.auth_results.push(ScanResult::rejected(message));
                self.emit(SensorEvent::AuthenticationFailed);
            }
            Identification::Matched(found) => {
                self.emit(SensorEvent::ScanProgress(95));
                self.emit(SensorEvent::Progress("Verifying identity...".into()));
                self.auth_succeeded(found);
            }
        }
    }

    // ========================================================================
    // Admin
    // ========================================================================

    fn start_admin_polling(&mut self, now: Instant) {
        info!("Admin polling started");
        self.queue.clear_type(CommandKind::OperationalPoll);
        self.queue.clear_low_priority();
        self.admin_deadline = Some(now + self.config.admin_poll_deadline());
        self.admin_timer.start(now);
    }

    fn stop_admin_polling(&mut self) {
        info!("Admin polling stopped");
        self.admin_timer.stop();
        self.admin_deadline = None;
        self.queue.clear_type(CommandKind::AdminPoll);
    }

    fn admin_poll(&mut self, now: Instant) {
        if !self.admin_timer.is_active() {
            return;
        }
        self.queue.clear_type(CommandKind::OperationalPoll);
        self.queue.clear_low_priority();

        let capture = self.capture();
        if matches!(capture, Capture::Absent | Capture::Transient) {
            if self.admin_deadline.is_some_and(|deadline| now >= deadline) {
                self.stop_admin_polling();
                self.admin_results.push(ScanResult::rejected("No finger detected"));
                self.emit(SensorEvent::AdminNoFinger);
            }
            return;
        }

        self.stop_admin_polling();
        match capture {
            Capture::Fault(e) => {
                warn!("Image capture failed: {}", e);
                self.admin_failed("Image capture failed");
            }
            _ => {
                let identification = self.identify_finger(false);
                self.finish_admin(identification);
            }
        }
    }

    fn authenticate_admin(&mut self) {
        match self.capture() {
            Capture::Present => {
                let identification = self.identify_finger(false);
                self.finish_admin(identification);
            }
            Capture::Absent | Capture::Transient => self.emit(SensorEvent::AdminNoFinger),
            Capture::Fault(e) => {
                warn!("Image capture failed: {}", e);
                self.admin_failed("Image capture failed");
            }
        }
    }

    fn finish_admin(&mut self, identification: Identification) {
        match identification {
            Identification::Matched(found)
                if self.config.admin.accepts(found.index, found.confidence) =>
            {
                info!("Admin fingerprint accepted");
                self.admin_results.push(ScanResult::matched(
                    found.index,
                    found.confidence,
                    format!("Admin ID #{}", found.index),
                ));
                self.emit(SensorEvent::AdminSuccess {
                    finger_id: Sensitive::new(found.index),
                    confidence: Sensitive::new(found.confidence),
                });
            }
            Identification::Matched(_) => self.admin_failed("Fingerprint not authorized"),
            Identification::Unrecognized => self.admin_failed("Fingerprint not recognized"),
            Identification::Transient => self.admin_failed("Fingerprint could not be read"),
            Identification::Fault(message) => self.admin_failed(message),
        }
    }

    fn admin_failed(&mut self, reason: &str) {
        info!(reason, "Admin fingerprint rejected");
        self.admin_results.push(ScanResult::rejected(reason));
        self.emit(SensorEvent::AdminFailed(reason.to_string()));
    }

    // ========================================================================
    // Dialog operations
    // ========================================================================

    fn begin_operation(&mut self, operation: Operation, now: Instant) {
        self.abandon_operation("Enrollment cancelled");
        debug!(?operation, "Operation started");
        self.emit(SensorEvent::Progress("Place finger on sensor...".into()));
        self.operation = Some(operation);
        self.operation_timer.start(now);
    }

    /// Drop the running operation. A pending enrollment gets a terminal
    /// stage result so a blocked caller wakes up.
    fn abandon_operation(&mut self, reason: &str) -> bool {
        self.operation_timer.stop();
        match self.operation.take() {
            Some(Operation::Enroll { step, .. }) => {
                self.enrollment
                    .push(EnrollmentStageResult::failed(step_stage(step), reason));
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    fn cancel_operation(&mut self) {
        if self.abandon_operation("Enrollment cancelled") {
            info!("Operation cancelled");
            self.emit(SensorEvent::ScanProgress(0));
            self.emit(SensorEvent::OperationFailed("Operation cancelled".into()));
        }
    }

    fn operation_poll(&mut self, now: Instant) {
        let Some(operation) = self.operation else {
            self.operation_timer.stop();
            return;
        };

        match self.capture() {
            Capture::Absent => {
                if let Operation::Enroll {
                    id,
                    step: EnrollStep::AwaitRemoval,
                } = operation
                {
                    self.operation = Some(Operation::Enroll {
                        id,
                        step: EnrollStep::Second,
                    });
                    self.emit(SensorEvent::EnrollmentProgress(
                        "Place the same finger again...".into(),
                    ));
                }
                return;
            }
            Capture::Transient => return,
            Capture::Present => {}
            Capture::Fault(e) => {
                warn!("Image capture failed: {}", e);
                self.operation_timer.stop();
                self.operation = None;
                match operation {
                    Operation::Enroll { step, .. } => {
                        self.enrollment_failed(step_stage(step), "Failed to capture image")
                    }
                    _ => self.emit(SensorEvent::OperationFailed("Failed to capture image".into())),
                }
                return;
            }
        }

        if let Operation::Enroll {
            step: EnrollStep::AwaitRemoval,
            ..
        } = operation
        {
            return;
        }

        self.operation_timer.stop();
        self.operation = None;
        match operation {
            Operation::Find => self.complete_find(),
            Operation::Identify => self.complete_identify(),
            Operation::Verify(id) => self.complete_verify(id),
            Operation::Enroll {
                id,
                step: EnrollStep::First,
            } => self.enroll_first(id, now),
            Operation::Enroll { id, .. } => self.enroll_second(id),
        }
    }

    fn search_library(&mut self) -> Result<SearchResult> {
        let capacity = self.settings()?.capacity;
        self.sensor.fast_search_model(1, 0, capacity)
    }

    fn complete_find(&mut self) {
        self.emit(SensorEvent::Progress("Processing fingerprint...".into()));
        let result = self
            .sensor
            .extract_features(1)
            .map_err(|_| "Failed to create template".to_string())
            .and_then(|()| {
                self.search_library()
                    .map_err(|_| "Fingerprint not found in database".to_string())
            })
            .map(|found| format!("Found: ID #{}, confidence: {}", found.index, found.confidence));
        self.emit_operation(result);
    }

    fn complete_identify(&mut self) {
        self.emit(SensorEvent::Progress("Identifying fingerprint...".into()));
        let result = self
            .sensor
            .extract_features(1)
            .map_err(|_| "Failed to create template".to_string())
            .and_then(|()| {
                self.search_library()
                    .map_err(|_| "No matching fingerprint found".to_string())
            })
            .map(|found| format!("ID #{}, confidence: {}", found.index, found.confidence));
        self.emit_operation(result);
    }

    fn complete_verify(&mut self, id: u16) {
        self.emit(SensorEvent::Progress("Verifying fingerprint...".into()));

        let outcome = if self.sensor.extract_features(1).is_err() {
            Err("Failed to create template".to_string())
        } else if self.sensor.load_model(id, 2).is_err() {
            Err(format!("Template #{id} not found"))
        } else {
            match self.sensor.fast_search_model(1, id, 1) {
                Ok(found) if found.index == id => Ok(found),
                _ => Err(format!("Fingerprint does NOT match ID #{id}")),
            }
        };

        match outcome {
            Ok(found) => {
                let message = format!("VERIFIED - ID #{id} (confidence: {})", found.confidence);
                self.verify_results
                    .push(ScanResult::matched(id, found.confidence, message.clone()));
                self.emit(SensorEvent::OperationComplete(message));
            }
            Err(message) => {
                self.verify_results.push(ScanResult::rejected(message.clone()));
                self.emit(SensorEvent::OperationFailed(message));
            }
        }
    }

    // ========================================================================
    // Enrollment
    // ========================================================================

    fn enroll(&mut self, id: u16, now: Instant) {
        let max = self.config.max_template_id;
        if !(1..=max).contains(&id) {
            self.enrollment_failed(0, &format!("Invalid ID. Must be between 1 and {max}."));
            return;
        }
        self.abandon_operation("Enrollment cancelled");
        self.enrollment.clear();
        self.reset_sensor_state();

        info!(id, "Enrollment started");
        self.emit(SensorEvent::ScanProgress(0));
        self.emit(SensorEvent::EnrollmentProgress("Place finger on sensor...".into()));
        self.operation = Some(Operation::Enroll {
            id,
            step: EnrollStep::First,
        });
        self.operation_timer.start(now);
    }

    fn enroll_first(&mut self, id: u16, now: Instant) {
        self.emit(SensorEvent::ScanProgress(15));
        self.emit(SensorEvent::EnrollmentProgress("Capturing first scan...".into()));
        if let Err(e) = self.sensor.extract_features(1) {
            debug!("First template failed: {}", e);
            self.enrollment_failed(0, "Failed to create first template");
            return;
        }

        let message = "Remove finger, then place again...";
        self.emit(SensorEvent::ScanProgress(25));
        self.emit(SensorEvent::EnrollmentProgress(message.into()));
        self.enrollment
            .push(EnrollmentStageResult::progressed(0, message));

        self.operation = Some(Operation::Enroll {
            id,
            step: EnrollStep::AwaitRemoval,
        });
        self.operation_timer.start(now);
    }

    fn enroll_second(&mut self, id: u16) {
        self.emit(SensorEvent::ScanProgress(40));
        self.emit(SensorEvent::EnrollmentProgress("Capturing second scan...".into()));
        if let Err(e) = self.sensor.extract_features(2) {
            debug!("Second template failed: {}", e);
            self.enrollment_failed(1, "Failed to create second template");
            return;
        }

        self.emit(SensorEvent::ScanProgress(50));
        self.emit(SensorEvent::EnrollmentProgress("Creating fingerprint model...".into()));
        if let Err(e) = self.sensor.create_model() {
            debug!("Model creation failed: {}", e);
            self.enrollment_failed(1, "Failed to create fingerprint model");
            return;
        }
        self.enrollment
            .push(EnrollmentStageResult::progressed(1, "Fingerprint model created"));

        self.emit(SensorEvent::ScanProgress(75));
        self.emit(SensorEvent::EnrollmentProgress("Storing template...".into()));
        if let Err(e) = self.sensor.store_model(id, 1) {
            debug!("Store failed: {}", e);
            self.enrollment_failed(2, "Failed to store template");
            return;
        }

        let message = format!("Fingerprint enrolled successfully as ID #{id}");
        info!(id, "Enrollment complete");
        self.emit(SensorEvent::ScanProgress(100));
        self.emit(SensorEvent::EnrollmentComplete(message.clone()));
        self.enrollment
            .push(EnrollmentStageResult::progressed(2, message));
    }

    fn enrollment_failed(&mut self, stage: u8, message: &str) {
        info!(stage, reason = message, "Enrollment failed");
        self.reset_sensor_state();
        self.emit(SensorEvent::ScanProgress(0));
        self.emit(SensorEvent::EnrollmentFailed(message.to_string()));
        self.enrollment
            .push(EnrollmentStageResult::failed(stage, message));
    }

    // ========================================================================
    // Library
    // ========================================================================

    fn query_template(&mut self, id: u16) {
        let page = (id / SLOTS_PER_PAGE) as u8;
        let table = match self.sensor.read_index_table(page) {
            Ok(table) => table,
            Err(e) => {
                warn!("Failed to read index table: {}", e);
                self.emit(SensorEvent::OperationFailed("Failed to read index table".into()));
                return;
            }
        };

        let exists = table.contains(id % SLOTS_PER_PAGE) && self.sensor.load_model(id, 1).is_ok();
        let message = if exists {
            format!("Template #{id} EXISTS in database")
        } else {
            format!("Template #{id} does NOT exist")
        };
        self.emit(SensorEvent::OperationComplete(message));
    }

    fn delete_template(&mut self, id: u16) {
        let max = self.config.max_template_id;
        if !(1..=max).contains(&id) {
            self.emit(SensorEvent::OperationFailed(format!(
                "Invalid ID. Must be between 1 and {max}."
            )));
            return;
        }
        let result = match self.sensor.erase_model(id, 1) {
            Ok(()) => {
                info!(id, "Template deleted");
                Ok(format!("Fingerprint #{id} deleted"))
            }
            Err(e) => {
                warn!("Failed to delete template: {}", e);
                Err(format!("Failed to delete fingerprint #{id}"))
            }
        };
        self.emit_operation(result);
    }

    fn clear_database(&mut self) {
        let result = match self.sensor.clear_database() {
            Ok(()) => {
                info!("Template database cleared");
                Ok("All fingerprints deleted".to_string())
            }
            Err(e) => {
                warn!("Failed to clear database: {}", e);
                Err("Failed to clear database".to_string())
            }
        };
        self.emit_operation(result);
    }

    fn refresh_template_count(&mut self) {
        match self.sensor.model_count() {
            Ok(count) => self.emit(SensorEvent::TemplateCount(count)),
            Err(e) => {
                warn!("Failed to count templates: {}", e);
                self.emit(SensorEvent::OperationFailed("Failed to count templates".into()));
            }
        }
    }

    // ========================================================================
    // LED and configuration
    // ========================================================================

    fn set_led(&mut self, on: bool) {
        let (result, state) = if on {
            (self.sensor.led_on(), "ON")
        } else {
            (self.sensor.led_off(), "OFF")
        };
        self.emit_operation(
            result
                .map(|()| format!("LED turned {state}"))
                .map_err(|e| format!("Failed to turn LED {}: {e}", state.to_lowercase())),
        );
    }

    fn set_baud_rate(&mut self, choice: u8) {
        let Ok(baud_rate) = BaudRate::try_from(choice) else {
            self.emit(SensorEvent::OperationFailed(
                "Invalid baud rate choice. Must be 1-12.".into(),
            ));
            return;
        };
        let result = self.sensor.set_baud_rate(baud_rate);
        self.finish_configuration(result, "Failed to set baud rate", format!("Baud rate set to {baud_rate}"));
    }

    fn set_security_level(&mut self, level: u8) {
        let Ok(level) = SecurityLevel::try_from(level) else {
            self.emit(SensorEvent::OperationFailed("Invalid security level".into()));
            return;
        };
        let result = self.sensor.set_security_level(level);
        self.finish_configuration(result, "Failed to set security level", format!("Security level set to {level}"));
    }

    fn set_packet_size(&mut self, code: u8) {
        let Ok(length) = PacketLength::try_from(code) else {
            self.emit(SensorEvent::OperationFailed("Invalid packet size".into()));
            return;
        };
        let result = self.sensor.set_packet_length(length);
        self.finish_configuration(result, "Failed to set packet size", format!("Data packet size set to {length}"));
    }

    fn soft_reset(&mut self) {
        let result = self.sensor.soft_reset();
        self.finish_configuration(result, "Failed to reset sensor", "Sensor reset successfully".into());
    }

    /// Report a mutating command and refresh the settings cache after success.
    fn finish_configuration(&mut self, result: Result<()>, failure: &str, success: String) {
        match result {
            Ok(()) => {
                self.refresh_settings();
                info!("{}", success);
                self.emit(SensorEvent::OperationComplete(success));
            }
            Err(e) => {
                warn!("{}: {}", failure, e);
                self.emit(SensorEvent::OperationFailed(format!("{failure}: {e}")));
            }
        }
    }

    fn show_settings(&mut self) {
        self.settings = None;
        match self.settings() {
            Ok(settings) => self.emit(SensorEvent::OperationComplete(format!(
                "System Settings:\nLibrary Size: {}\nSecurity Level: {}\nPacket Length: {}\nBaud Rate: {}",
                settings.capacity,
                settings.security_level,
                settings.packet_size(),
                settings.baud_bps()
            ))),
            Err(e) => {
                warn!("Failed to read system parameters: {}", e);
                self.emit(SensorEvent::OperationFailed("Failed to read system parameters".into()));
            }
        }
    }

    /// One throwaway capture to resynchronise the image buffer.
    fn reset_sensor_state(&mut self) {
        let _ = self.sensor.capture_image();
    }
}

fn step_stage(step: EnrollStep) -> u8 {
    match step {
        EnrollStep::First => 0,
        EnrollStep::AwaitRemoval | EnrollStep::Second => 1,
    }
}

/// Caller side of a running [`SensorWorker`].
///
/// Submitting never blocks. Dropping the handle stops the worker and joins
/// its thread.
pub struct SensorHandle {
    queue: Arc<PriorityCommandQueue>,
    running: Arc<AtomicBool>,
    auth_results: TripleBufferReader<AuthResult>,
    admin_results: TripleBufferReader<AdminResult>,
    verify_results: TripleBufferReader<VerifyResult>,
    enrollment: Arc<BlockingQueue<EnrollmentStageResult>>,
    events: mpsc::Receiver<SensorEvent>,
    thread: Option<JoinHandle<()>>,
}

impl SensorHandle {
    /// Queue an arbitrary command.
    pub fn submit(&self, command: SensorCommand) {
        self.queue.push(command);
    }

    fn submit_action(&self, priority: Priority, action: SensorAction) {
        self.submit(SensorCommand::immediate(priority, action));
    }

    pub fn start_auth_polling(&self) {
        self.submit_action(Priority::High, SensorAction::StartAuthPolling);
    }

    pub fn stop_auth_polling(&self) {
        self.submit_action(Priority::High, SensorAction::StopAuthPolling);
    }

    /// Poll for an admin finger until one is read or the deadline passes.
    pub fn start_admin_polling(&self) {
        self.submit_action(Priority::Critical, SensorAction::StartAdminPolling);
    }

    pub fn stop_admin_polling(&self) {
        self.submit_action(Priority::Critical, SensorAction::StopAdminPolling);
    }

    pub fn authenticate(&self) {
        self.submit_action(Priority::High, SensorAction::Authenticate);
    }

    pub fn authenticate_admin(&self) {
        self.submit_action(Priority::Critical, SensorAction::AuthenticateAdmin);
    }

    pub fn prewarm_cache(&self) {
        self.submit_action(Priority::High, SensorAction::PrewarmCache);
    }

    /// Start a two-capture enrollment into slot `id`. Follow it with
    /// [`SensorHandle::next_enrollment_stage`].
    pub fn enroll(&self, id: u16) {
        self.submit_action(Priority::High, SensorAction::Enroll(id));
    }

    pub fn find(&self) {
        self.submit_action(Priority::High, SensorAction::Find);
    }

    pub fn identify(&self) {
        self.submit_action(Priority::High, SensorAction::Identify);
    }

    pub fn verify(&self, id: u16) {
        self.submit_action(Priority::High, SensorAction::Verify(id));
    }

    pub fn cancel_operation(&self) {
        self.submit_action(Priority::High, SensorAction::CancelOperation);
    }

    pub fn query_template(&self, id: u16) {
        self.submit_action(Priority::High, SensorAction::QueryTemplate(id));
    }

    pub fn delete_template(&self, id: u16) {
        self.submit_action(Priority::High, SensorAction::DeleteTemplate(id));
    }

    pub fn clear_database(&self) {
        self.submit_action(Priority::High, SensorAction::ClearDatabase);
    }

    pub fn refresh_template_count(&self) {
        self.submit_action(Priority::High, SensorAction::RefreshTemplateCount);
    }

    pub fn led_on(&self) {
        self.submit_action(Priority::High, SensorAction::LedOn);
    }

    pub fn led_off(&self) {
        self.submit_action(Priority::High, SensorAction::LedOff);
    }

    /// `choice` is the baud multiplier, 1..=12 (× 9600 bps).
    pub fn set_baud_rate(&self, choice: u8) {
        self.submit_action(Priority::High, SensorAction::SetBaudRate(choice));
    }

    pub fn set_security_level(&self, level: u8) {
        self.submit_action(Priority::High, SensorAction::SetSecurityLevel(level));
    }

    /// `code` is the packet length register value, 0..=3.
    pub fn set_packet_size(&self, code: u8) {
        self.submit_action(Priority::High, SensorAction::SetPacketSize(code));
    }

    pub fn soft_reset(&self) {
        self.submit_action(Priority::High, SensorAction::SoftReset);
    }

    pub fn show_settings(&self) {
        self.submit_action(Priority::High, SensorAction::ShowSettings);
    }

    pub fn reset_sensor_state(&self) {
        self.submit_action(Priority::High, SensorAction::ResetSensorState);
    }

    // ------------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------------

    /// Most recent authentication result not yet read.
    pub fn latest_auth_result(&mut self) -> Option<AuthResult> {
        self.auth_results.try_pop()
    }

    pub fn latest_admin_result(&mut self) -> Option<AdminResult> {
        self.admin_results.try_pop()
    }

    pub fn latest_verify_result(&mut self) -> Option<VerifyResult> {
        self.verify_results.try_pop()
    }

    /// Block until the next enrollment stage arrives. Returns `None` once the
    /// worker has stopped and nothing is left to read.
    pub fn next_enrollment_stage(&self) -> Option<EnrollmentStageResult> {
        self.enrollment
            .pop_unless(|| !self.running.load(Ordering::Acquire))
    }

    /// Like [`SensorHandle::next_enrollment_stage`] with an upper bound on the wait.
    pub fn next_enrollment_stage_timeout(&self, timeout: Duration) -> Option<EnrollmentStageResult> {
        self.enrollment.pop_until(Instant::now() + timeout)
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Next event, or `None` once the worker has stopped.
    pub async fn recv_event(&mut self) -> Option<SensorEvent> {
        self.events.recv().await
    }

    pub fn try_recv_event(&mut self) -> Option<SensorEvent> {
        self.events.try_recv().ok()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of commands waiting for the worker.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Stop the worker and wait for its thread to exit. The command in
    /// flight, if any, runs to completion; queued commands are dropped.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            self.running.store(false, Ordering::Release);
            return Ok(());
        };
        self.queue.clear();
        self.submit_action(Priority::Critical, SensorAction::Shutdown);
        self.running.store(false, Ordering::Release);
        self.enrollment.wake_all();
        thread
            .join()
            .map_err(|_| Error::Io(io::Error::other("sensor worker panicked")))
    }
}

impl Drop for SensorHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Sensor worker did not stop cleanly: {}", e);
        }
    }
}

impl std::fmt::Debug for SensorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorHandle")
            .field("running", &self.is_running())
            .field("pending_commands", &self.pending_commands())
            .finish_non_exhaustive()
    }
}
