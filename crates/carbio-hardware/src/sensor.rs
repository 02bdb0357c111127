//! High-level fingerprint sensor API.
//!
//! [`FingerprintSensor`] wraps a [`CommandExecutor`] with one method per
//! sensor operation and owns the connection lifecycle, including auto-baud
//! detection.
//!
//! # Examples
//!
//! ```
//! use carbio_core::SensorConfig;
//! use carbio_hardware::FingerprintSensor;
//! use carbio_hardware::mock::{MockTransport, SimulatedSensor};
//! use std::time::Duration;
//!
//! let (device, fingers) = SimulatedSensor::new();
//! let (transport, _wire) = MockTransport::with_device(device);
//! let config = SensorConfig::default()
//!     .with_path("/dev/mock")
//!     .with_settle_delay(Duration::ZERO);
//!
//! let mut sensor = FingerprintSensor::new(transport, config);
//! sensor.open().unwrap();
//!
//! fingers.place_finger(7);
//! sensor.capture_image().unwrap();
//! sensor.extract_features(1).unwrap();
//! sensor.store_model(4, 1).unwrap();
//! assert_eq!(sensor.model_count().unwrap(), 1);
//! ```

use crate::executor::CommandExecutor;
use crate::transport::Transport;
use carbio_core::{Error, Result, SecureBuffer, SensorConfig, Sensitive, StatusCode};
use carbio_protocol::commands::{
    CaptureImage, ClearDatabase, CountModel, CreateModel, DownloadImage, DownloadModel,
    EraseModel, ExtractFeatures, FastSearchModel, LedOff, LedOn, LoadModel, MatchModel,
    ReadIndexTable, ReadSystemParameter, SearchModel, SetDevicePassword, SetLedConfig, SoftReset,
    StoreModel, UploadImage, UploadModel, VerifyDevicePassword, WriteSystemParameter,
};
use carbio_protocol::{
    BaudRate, DeviceSettingIndex, DeviceSettings, IndexTable, LedColor, LedMode, MatchResult,
    PacketLength, ProtocolHandler, SearchResult, SecurityLevel, Template,
};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct FingerprintSensor<T: Transport> {
    executor: CommandExecutor<T>,
    config: SensorConfig,
}

fn check_buffer(buffer_id: u8) -> Result<()> {
    match buffer_id {
        1 | 2 => Ok(()),
        other => Err(Error::invalid_argument(format!(
            "character buffer {other} not in 1..=2"
        ))),
    }
}

impl<T: Transport> FingerprintSensor<T> {
    pub fn new(transport: T, config: SensorConfig) -> Self {
        let handler = ProtocolHandler::new(config.address);
        let executor = CommandExecutor::new(transport, handler, config.timeout());
        Self { executor, config }
    }

    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    pub fn executor(&self) -> &CommandExecutor<T> {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut CommandExecutor<T> {
        &mut self.executor
    }

    pub fn into_transport(self) -> T {
        self.executor.into_transport()
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the configured device, probing each configured baud rate until
    /// the sensor answers the password handshake.
    ///
    /// A device path that cannot be opened at all fails immediately with the
    /// transport's error.
    pub fn open(&mut self) -> Result<()> {
        let path = self.config.path.clone();
        let rates = self.config.baud_rates.clone();

        for baud_rate in rates {
            self.executor.transport_mut().open(&path)?;
            match self.probe(baud_rate) {
                Ok(settings) => {
                    info!(
                        "Connected to sensor on {} at {} bps ({})",
                        path, baud_rate, settings
                    );
                    return Ok(());
                }
                Err(err) => {
                    warn!(baud_rate, error = %err, "sensor did not answer");
                    self.executor.transport_mut().close();
                }
            }
        }

        warn!("No response from sensor on {} at any baud rate", path);
        Err(StatusCode::CommunicationError.into())
    }

    fn probe(&mut self, baud_rate: u32) -> Result<DeviceSettings> {
        self.executor.transport_mut().set_baud_rate(baud_rate)?;
        self.settle();

        self.verify_device_password(self.config.password)?;
        let settings = self.device_settings()?;
        self.executor
            .handler_mut()
            .set_packet_length(settings.packet_size());
        Ok(settings)
    }

    fn settle(&self) {
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    pub fn close(&mut self) {
        self.executor.transport_mut().close();
    }

    pub fn is_open(&self) -> bool {
        self.executor.transport().is_open()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.executor.set_timeout(timeout);
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Read the 16-byte system parameter block.
    pub fn device_settings(&mut self) -> Result<DeviceSettings> {
        self.executor.execute(&ReadSystemParameter)
    }

    /// Change the sensor's UART speed and follow it on the host side.
    pub fn set_baud_rate(&mut self, baud_rate: BaudRate) -> Result<()> {
        debug!(%baud_rate, "set baud rate");
        self.executor.execute(&WriteSystemParameter {
            index: DeviceSettingIndex::BaudRate,
            value: baud_rate as u8,
        })?;
        self.executor.transport_mut().set_baud_rate(baud_rate.bps())?;
        self.settle();
        info!("Sensor baud rate changed to {}", baud_rate);
        Ok(())
    }

    pub fn set_security_level(&mut self, level: SecurityLevel) -> Result<()> {
        debug!(%level, "set security level");
        self.executor.execute(&WriteSystemParameter {
            index: DeviceSettingIndex::SecurityLevel,
            value: level as u8,
        })
    }

    /// Change the data packet size on both ends of the link.
    pub fn set_packet_length(&mut self, length: PacketLength) -> Result<()> {
        debug!(%length, "set packet length");
        self.executor.execute(&WriteSystemParameter {
            index: DeviceSettingIndex::PacketLength,
            value: length as u8,
        })?;
        self.executor.handler_mut().set_packet_length(length.bytes());
        Ok(())
    }

    pub fn soft_reset(&mut self) -> Result<()> {
        debug!("soft reset");
        self.executor.execute(&SoftReset)
    }

    // ========================================================================
    // LEDs
    // ========================================================================

    pub fn set_led_config(
        &mut self,
        mode: LedMode,
        speed: u8,
        color: LedColor,
        cycles: u8,
    ) -> Result<()> {
        self.executor.execute(&SetLedConfig {
            mode,
            speed,
            color,
            cycles,
        })
    }

    pub fn led_on(&mut self) -> Result<()> {
        self.executor.execute(&LedOn)
    }

    pub fn led_off(&mut self) -> Result<()> {
        self.executor.execute(&LedOff)
    }

    // ========================================================================
    // Security
    // ========================================================================

    pub fn set_device_password(&mut self, password: u32) -> Result<()> {
        self.executor.execute(&SetDevicePassword {
            password: Sensitive::new(password),
        })?;
        self.config.password = password;
        Ok(())
    }

    pub fn verify_device_password(&mut self, password: u32) -> Result<()> {
        self.executor.execute(&VerifyDevicePassword {
            password: Sensitive::new(password),
        })
    }

    /// Address used in outgoing frames and expected in replies. The sensor
    /// itself is not reprogrammed.
    pub fn set_device_address(&mut self, address: u32) {
        self.config.address = address;
        self.executor.handler_mut().set_address(address);
    }

    // ========================================================================
    // Image and template operations
    // ========================================================================

    pub fn capture_image(&mut self) -> Result<()> {
        self.executor.execute(&CaptureImage)
    }

    pub fn extract_features(&mut self, buffer_id: u8) -> Result<()> {
        check_buffer(buffer_id)?;
        self.executor.execute(&ExtractFeatures { buffer_id })
    }

    pub fn create_model(&mut self) -> Result<()> {
        self.executor.execute(&CreateModel)
    }

    pub fn store_model(&mut self, page_id: u16, buffer_id: u8) -> Result<()> {
        check_buffer(buffer_id)?;
        debug!(page_id, buffer_id, "store model");
        self.executor.execute(&StoreModel { buffer_id, page_id })
    }

    pub fn load_model(&mut self, page_id: u16, buffer_id: u8) -> Result<()> {
        check_buffer(buffer_id)?;
        self.executor.execute(&LoadModel { buffer_id, page_id })
    }

    /// Send a template from the host into a character buffer.
    pub fn upload_model(&mut self, template: &Template, buffer_id: u8) -> Result<()> {
        check_buffer(buffer_id)?;
        self.executor
            .execute_with_upload(&UploadModel { buffer_id }, template.as_bytes())
    }

    /// Fetch a character buffer from the sensor.
    pub fn download_model(&mut self, buffer_id: u8) -> Result<Template> {
        check_buffer(buffer_id)?;
        let ((), data) = self
            .executor
            .execute_with_download(&DownloadModel { buffer_id })?;
        Template::from_bytes(data.as_slice())
    }

    /// Send a raw image into the image buffer.
    pub fn upload_image(&mut self, image: &[u8]) -> Result<()> {
        self.executor.execute_with_upload(&UploadImage, image)
    }

    /// Fetch the image buffer.
    pub fn download_image(&mut self) -> Result<SecureBuffer> {
        let ((), data) = self.executor.execute_with_download(&DownloadImage)?;
        Ok(data)
    }

    // ========================================================================
    // Library
    // ========================================================================

    pub fn erase_model(&mut self, page_id: u16, count: u16) -> Result<()> {
        debug!(page_id, count, "erase model");
        self.executor.execute(&EraseModel { page_id, count })
    }

    pub fn clear_database(&mut self) -> Result<()> {
        debug!("clear database");
        self.executor.execute(&ClearDatabase)
    }

    pub fn match_model(&mut self) -> Result<MatchResult> {
        self.executor.execute(&MatchModel)
    }

    pub fn search_model(&mut self, buffer_id: u8, start_page: u16, count: u16) -> Result<SearchResult> {
        check_buffer(buffer_id)?;
        self.executor.execute(&SearchModel {
            buffer_id,
            start_page,
            count,
        })
    }

    pub fn fast_search_model(
        &mut self,
        buffer_id: u8,
        start_page: u16,
        count: u16,
    ) -> Result<SearchResult> {
        check_buffer(buffer_id)?;
        self.executor.execute(&FastSearchModel {
            buffer_id,
            start_page,
            count,
        })
    }

    pub fn model_count(&mut self) -> Result<u16> {
        self.executor.execute(&CountModel)
    }

    pub fn read_index_table(&mut self, page: u8) -> Result<IndexTable> {
        self.executor.execute(&ReadIndexTable { page })
    }
}
