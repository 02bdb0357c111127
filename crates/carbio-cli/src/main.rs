//! `carbio`: drive a serial fingerprint sensor from the command line.
//!
//! Every subcommand opens the sensor, hands it to a worker thread and logs
//! the worker's events until the command finishes. `watch` keeps
//! authentication polling running until Ctrl-C.

use anyhow::{Context, Result, bail};
use carbio_core::SensorConfig;
use carbio_hardware::{FingerprintSensor, SerialTransport};
use carbio_worker::{SensorEvent, SensorHandle, SensorWorker, WorkerConfig};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Fingerprint sensor control utility", long_about = None)]
struct Cli {
    /// Serial device. Overrides the config file and CARBIO_SERIAL_PATH.
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Sensor config as JSON.
    #[arg(long, global = true, env = "CARBIO_SENSOR_CONFIG")]
    sensor_config: Option<PathBuf>,

    /// Worker config as JSON.
    #[arg(long, global = true, env = "CARBIO_WORKER_CONFIG")]
    worker_config: Option<PathBuf>,

    /// Give up on a one-shot command after this many seconds.
    #[arg(long, global = true, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll for fingers and log every authentication until Ctrl-C.
    Watch,
    /// Wait for an administrator finger.
    Admin,
    /// Enroll a finger into template slot ID.
    Enroll { id: u16 },
    /// Search the whole library for the next finger.
    Find,
    /// Identify the next finger.
    Identify,
    /// Check the next finger against template ID.
    Verify { id: u16 },
    /// Report whether template ID is stored.
    Query { id: u16 },
    /// Delete template ID.
    Delete { id: u16 },
    /// Delete every template.
    Clear,
    /// Print the number of stored templates.
    Count,
    /// Switch the LED.
    Led { state: LedState },
    /// Print the device settings.
    Settings,
    /// Set the baud rate as a multiple of 9600 (1-12).
    Baud { multiplier: u8 },
    /// Set the matching security level (1-5).
    Security { level: u8 },
    /// Set the data packet size code (0-3 for 32-256 bytes).
    PacketSize { code: u8 },
    /// Soft-reset the sensor.
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedState {
    On,
    Off,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

fn load_configs(cli: &Cli) -> Result<(SensorConfig, WorkerConfig)> {
    let mut sensor = match &cli.sensor_config {
        Some(path) => SensorConfig::from_json_file(path)
            .with_context(|| format!("loading sensor config {}", path.display()))?,
        None => SensorConfig::from_env(),
    };
    if let Some(port) = &cli.port {
        sensor = sensor.with_path(port.clone());
    }
    let worker = match &cli.worker_config {
        Some(path) => WorkerConfig::from_json_file(path)
            .with_context(|| format!("loading worker config {}", path.display()))?,
        None => WorkerConfig::default(),
    };
    Ok((sensor, worker))
}

fn start_worker(sensor_config: SensorConfig, worker_config: WorkerConfig) -> Result<SensorHandle> {
    let path = sensor_config.path.clone();
    let mut sensor = FingerprintSensor::new(SerialTransport::new(), sensor_config);
    sensor
        .open()
        .with_context(|| format!("no fingerprint sensor answered on {path}"))?;
    SensorWorker::spawn(sensor, worker_config).context("starting sensor worker")
}

/// Log one event. Returns `Some(success)` when it ends a one-shot command.
fn report(event: &SensorEvent) -> Option<bool> {
    match event {
        SensorEvent::ScanProgress(_) => None,
        SensorEvent::AuthenticationSuccess { finger_id, .. } => {
            info!("Authenticated as ID #{}", finger_id.value());
            Some(true)
        }
        SensorEvent::AdminSuccess { finger_id, .. } => {
            info!("Administrator ID #{} accepted", finger_id.value());
            Some(true)
        }
        SensorEvent::AuthenticationFailed => {
            warn!("Fingerprint not recognized");
            Some(false)
        }
        SensorEvent::AuthenticationNoFinger | SensorEvent::AdminNoFinger => {
            warn!("No finger detected");
            Some(false)
        }
        SensorEvent::TemplateCount(count) => {
            info!("{count} templates stored");
            Some(true)
        }
        SensorEvent::EnrollmentComplete(message) | SensorEvent::OperationComplete(message) => {
            info!("{message}");
            Some(true)
        }
        SensorEvent::AdminFailed(message)
        | SensorEvent::EnrollmentFailed(message)
        | SensorEvent::OperationFailed(message) => {
            warn!("{message}");
            Some(false)
        }
        other => {
            if let Some(message) = other.message() {
                info!("{message}");
            }
            None
        }
    }
}

/// Log events until Ctrl-C. Authentication results do not stop the loop.
async fn watch(handle: &mut SensorHandle) -> Result<()> {
    handle.start_auth_polling();
    info!("Waiting for fingers, press Ctrl-C to stop");
    loop {
        tokio::select! {
            event = handle.recv_event() => {
                let Some(event) = event else { bail!("sensor worker stopped") };
                report(&event);
                // A match stops polling on the worker side.
                if matches!(event, SensorEvent::AuthenticationSuccess { .. }) {
                    handle.start_auth_polling();
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                handle.stop_auth_polling();
                return Ok(());
            }
        }
    }
}

async fn until_finished(handle: &mut SensorHandle, limit: Duration) -> Result<bool> {
    let finished = async {
        while let Some(event) = handle.recv_event().await {
            if let Some(success) = report(&event) {
                return Ok(success);
            }
        }
        bail!("sensor worker stopped")
    };
    match timeout(limit, finished).await {
        Ok(result) => result,
        Err(_) => {
            handle.cancel_operation();
            handle.stop_admin_polling();
            bail!("timed out after {}s", limit.as_secs())
        }
    }
}

fn submit(handle: &SensorHandle, command: &Command) {
    match *command {
        Command::Watch => {}
        Command::Admin => handle.start_admin_polling(),
        Command::Enroll { id } => handle.enroll(id),
        Command::Find => handle.find(),
        Command::Identify => handle.identify(),
        Command::Verify { id } => handle.verify(id),
        Command::Query { id } => handle.query_template(id),
        Command::Delete { id } => handle.delete_template(id),
        Command::Clear => handle.clear_database(),
        Command::Count => handle.refresh_template_count(),
        Command::Led { state: LedState::On } => handle.led_on(),
        Command::Led { state: LedState::Off } => handle.led_off(),
        Command::Settings => handle.show_settings(),
        Command::Baud { multiplier } => handle.set_baud_rate(multiplier),
        Command::Security { level } => handle.set_security_level(level),
        Command::PacketSize { code } => handle.set_packet_size(code),
        Command::Reset => handle.soft_reset(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let (sensor_config, worker_config) = load_configs(&cli)?;
    let mut handle = start_worker(sensor_config, worker_config)?;

    let outcome = match cli.command {
        Command::Watch => watch(&mut handle).await.map(|()| true),
        ref command => {
            submit(&handle, command);
            until_finished(&mut handle, Duration::from_secs(cli.timeout_secs)).await
        }
    };

    handle.shutdown().context("stopping sensor worker")?;
    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}
