//! Simulated fingerprint sensor.
//!
//! [`SimulatedSensor`] answers command frames the way the optical module
//! does, backed by a small in-memory model: one image buffer, two character
//! buffers and a template library. Fingers are identified by a `u16` "print"
//! value; a template synthesised from a print starts with that value, so
//! templates survive upload and download round trips.
//!
//! ```text
//! place_finger(7) ─► CaptureImage ─► image = 7
//!                    ExtractFeatures{1} ─► char[0] = 7
//!                    FastSearchModel ─► library page holding print 7
//! ```

use super::transport::MockDevice;
use bytes::BufMut;
use carbio_core::constants::{DEFAULT_ADDRESS, DEFAULT_PASSWORD, TEMPLATE_SIZE};
use carbio_core::StatusCode;
use carbio_protocol::{
    BaudRate, CommandCode, DeviceSettingIndex, DeviceSettings, Frame, PacketId, PacketLength,
    SecurityLevel,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

/// Size of the synthetic image moved by `DownloadImage`.
pub const SIMULATED_IMAGE_SIZE: usize = 2048;

/// Library pages covered by one index table page.
const INDEX_PAGE_SPAN: u16 = 256;

/// Raw LED configuration as last written by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedState {
    pub on: bool,
    pub mode: u8,
    pub speed: u8,
    pub color: u8,
    pub cycles: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadTarget {
    Buffer(usize),
    Image,
}

#[derive(Debug)]
struct SimState {
    finger: Option<u16>,
    image: Option<u16>,
    buffers: [Option<u16>; 2],
    library: BTreeMap<u16, u16>,
    settings: DeviceSettings,
    password: u32,
    confidence: u16,
    led: LedState,
    faults: VecDeque<(CommandCode, Option<StatusCode>)>,
    log: Vec<CommandCode>,
    upload: Option<(UploadTarget, Vec<u8>)>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            finger: None,
            image: None,
            buffers: [None; 2],
            library: BTreeMap::new(),
            settings: DeviceSettings::default(),
            password: DEFAULT_PASSWORD,
            confidence: 200,
            led: LedState {
                on: false,
                mode: 0,
                speed: 0,
                color: 0,
                cycles: 0,
            },
            faults: VecDeque::new(),
            log: Vec::new(),
            upload: None,
        }
    }
}

/// Build the 512-byte template a print produces.
pub fn synthesize_template(print: u16) -> Vec<u8> {
    let mut template = Vec::with_capacity(TEMPLATE_SIZE);
    template.put_u16(print);
    let seed = (print as u8) ^ (print >> 8) as u8;
    template.extend((2..TEMPLATE_SIZE).map(|i| seed.wrapping_add(i as u8)));
    template
}

/// Build the synthetic image a print produces.
pub fn synthesize_image(print: u16) -> Vec<u8> {
    let mut image = Vec::with_capacity(SIMULATED_IMAGE_SIZE);
    image.put_u16(print);
    image.extend((2..SIMULATED_IMAGE_SIZE).map(|i| (i as u8) ^ print as u8));
    image
}

fn print_of(data: &[u8]) -> Option<u16> {
    match data {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

fn reply(id: PacketId, payload: &[u8]) -> Vec<Frame> {
    Frame::new(DEFAULT_ADDRESS, id, payload).into_iter().collect()
}

fn status(code: StatusCode) -> Vec<Frame> {
    reply(PacketId::Acknowledge, &[code.as_u8()])
}

fn ok_with(data: &[u8]) -> Vec<Frame> {
    let mut payload = Vec::with_capacity(data.len() + 1);
    payload.push(StatusCode::Success.as_u8());
    payload.extend_from_slice(data);
    reply(PacketId::Acknowledge, &payload)
}

fn buffer_index(id: u8) -> Option<usize> {
    match id {
        1 | 2 => Some(id as usize - 1),
        _ => None,
    }
}

impl SimState {
    fn handle(&mut self, frame: &Frame) -> Vec<Frame> {
        match frame.id() {
            PacketId::Command => self.handle_command(frame.payload()),
            PacketId::Data | PacketId::EndData => self.handle_data(frame),
            PacketId::Acknowledge => Vec::new(),
        }
    }

    fn handle_data(&mut self, frame: &Frame) -> Vec<Frame> {
        let Some((target, mut data)) = self.upload.take() else {
            return Vec::new();
        };
        data.extend_from_slice(frame.payload());
        if frame.id() == PacketId::Data {
            self.upload = Some((target, data));
            return Vec::new();
        }

        let print = print_of(&data);
        match target {
            UploadTarget::Buffer(index) => self.buffers[index] = print,
            UploadTarget::Image => self.image = print,
        }
        trace!(?target, bytes = data.len(), "simulated upload complete");
        Vec::new()
    }

    fn handle_command(&mut self, payload: &[u8]) -> Vec<Frame> {
        let Some((&code, params)) = payload.split_first() else {
            return status(StatusCode::FrameError);
        };
        let Ok(code) = CommandCode::from_u8(code) else {
            return status(StatusCode::IllegalDeviceRegister);
        };
        self.log.push(code);

        if let Some(pos) = self.faults.iter().position(|(c, _)| *c == code)
            && let Some((_, fault)) = self.faults.remove(pos)
        {
            trace!(%code, ?fault, "simulated fault");
            return fault.map(status).unwrap_or_default();
        }

        match code {
            CommandCode::CaptureImage => match self.finger {
                Some(print) => {
                    self.image = Some(print);
                    status(StatusCode::Success)
                }
                None => status(StatusCode::NoFinger),
            },
            CommandCode::ExtractFeatures => {
                let Some(index) = params.first().copied().and_then(buffer_index) else {
                    return status(StatusCode::IllegalDeviceRegister);
                };
                match self.image {
                    Some(print) => {
                        self.buffers[index] = Some(print);
                        status(StatusCode::Success)
                    }
                    None => status(StatusCode::InvalidImageFormat),
                }
            }
            CommandCode::MatchModel => match self.buffers {
                [Some(a), Some(b)] if a == b => ok_with(&self.confidence.to_be_bytes()),
                _ => status(StatusCode::NoMatch),
            },
            CommandCode::SearchModel | CommandCode::FastSearchModel => self.search(params),
            CommandCode::CreateModel => match self.buffers {
                [Some(a), Some(b)] if a == b => status(StatusCode::Success),
                _ => status(StatusCode::EnrollmentMismatch),
            },
            CommandCode::StoreModel => self.store(params),
            CommandCode::LoadModel => self.load(params),
            CommandCode::UploadModel => match params.first().copied().and_then(buffer_index) {
                Some(index) => {
                    self.upload = Some((UploadTarget::Buffer(index), Vec::new()));
                    status(StatusCode::Success)
                }
                None => status(StatusCode::IllegalDeviceRegister),
            },
            CommandCode::DownloadModel => {
                let Some(index) = params.first().copied().and_then(buffer_index) else {
                    return status(StatusCode::IllegalDeviceRegister);
                };
                match self.buffers[index] {
                    Some(print) => self.with_data(&synthesize_template(print)),
                    None => status(StatusCode::FeatureUploadFailed),
                }
            }
            CommandCode::UploadImage => {
                self.upload = Some((UploadTarget::Image, Vec::new()));
                status(StatusCode::Success)
            }
            CommandCode::DownloadImage => match self.image {
                Some(print) => self.with_data(&synthesize_image(print)),
                None => status(StatusCode::ImageUploadFailed),
            },
            CommandCode::EraseModel => self.erase(params),
            CommandCode::ClearDatabase => {
                self.library.clear();
                status(StatusCode::Success)
            }
            CommandCode::WriteSystemParameter => self.write_parameter(params),
            CommandCode::ReadSystemParameter => ok_with(&self.encode_settings()),
            CommandCode::SetDevicePassword => match params {
                [a, b, c, d, ..] => {
                    self.password = u32::from_be_bytes([*a, *b, *c, *d]);
                    status(StatusCode::Success)
                }
                _ => status(StatusCode::FrameError),
            },
            CommandCode::VerifyDevicePassword => match params {
                [a, b, c, d, ..] if u32::from_be_bytes([*a, *b, *c, *d]) == self.password => {
                    status(StatusCode::Success)
                }
                _ => status(StatusCode::PermissionDenied),
            },
            CommandCode::CountModel => ok_with(&(self.library.len() as u16).to_be_bytes()),
            CommandCode::ReadIndexTable => self.index_table(params),
            CommandCode::SetLedConfig => match params {
                [mode, speed, color, cycles, ..] => {
                    self.led = LedState {
                        on: *mode != 0x04,
                        mode: *mode,
                        speed: *speed,
                        color: *color,
                        cycles: *cycles,
                    };
                    status(StatusCode::Success)
                }
                _ => status(StatusCode::FrameError),
            },
            CommandCode::SoftReset => {
                self.image = None;
                self.buffers = [None; 2];
                self.upload = None;
                status(StatusCode::Success)
            }
            CommandCode::LedOn => {
                self.led.on = true;
                status(StatusCode::Success)
            }
            CommandCode::LedOff => {
                self.led.on = false;
                status(StatusCode::Success)
            }
        }
    }

    /// Acknowledge, then stream `data` as data packets.
    fn with_data(&self, data: &[u8]) -> Vec<Frame> {
        let mut frames = status(StatusCode::Success);
        let chunk = self.settings.packet_size();
        let total = data.len().div_ceil(chunk);
        for (i, part) in data.chunks(chunk).enumerate() {
            let id = if i + 1 == total {
                PacketId::EndData
            } else {
                PacketId::Data
            };
            frames.extend(reply(id, part));
        }
        frames
    }

    fn search(&self, params: &[u8]) -> Vec<Frame> {
        let [buffer, s0, s1, c0, c1, ..] = params else {
            return status(StatusCode::FrameError);
        };
        let Some(index) = buffer_index(*buffer) else {
            return status(StatusCode::IllegalDeviceRegister);
        };
        let start = u16::from_be_bytes([*s0, *s1]);
        let count = u16::from_be_bytes([*c0, *c1]);
        let Some(print) = self.buffers[index] else {
            return status(StatusCode::NotFound);
        };

        let end = start.saturating_add(count);
        match self
            .library
            .range(start..end)
            .find(|(_, stored)| **stored == print)
        {
            Some((page, _)) => {
                let mut data = Vec::with_capacity(4);
                data.put_u16(*page);
                data.put_u16(self.confidence);
                ok_with(&data)
            }
            None => status(StatusCode::NotFound),
        }
    }

    fn page_param(&self, params: &[u8]) -> Result<(usize, u16), StatusCode> {
        let [buffer, p0, p1, ..] = params else {
            return Err(StatusCode::FrameError);
        };
        let index = buffer_index(*buffer).ok_or(StatusCode::IllegalDeviceRegister)?;
        let page = u16::from_be_bytes([*p0, *p1]);
        if page >= self.settings.capacity {
            return Err(StatusCode::IndexOutOfRange);
        }
        Ok((index, page))
    }

    fn store(&mut self, params: &[u8]) -> Vec<Frame> {
        match self.page_param(params) {
            Ok((index, page)) => match self.buffers[index] {
                Some(print) => {
                    self.library.insert(page, print);
                    status(StatusCode::Success)
                }
                None => status(StatusCode::FlashWriteError),
            },
            Err(code) => status(code),
        }
    }

    fn load(&mut self, params: &[u8]) -> Vec<Frame> {
        match self.page_param(params) {
            Ok((index, page)) => match self.library.get(&page) {
                Some(print) => {
                    self.buffers[index] = Some(*print);
                    status(StatusCode::Success)
                }
                None => status(StatusCode::DatabaseAccessError),
            },
            Err(code) => status(code),
        }
    }

    fn erase(&mut self, params: &[u8]) -> Vec<Frame> {
        let [p0, p1, c0, c1, ..] = params else {
            return status(StatusCode::FrameError);
        };
        let page = u16::from_be_bytes([*p0, *p1]);
        let count = u16::from_be_bytes([*c0, *c1]);
        if page >= self.settings.capacity {
            return status(StatusCode::IndexOutOfRange);
        }
        let end = page.saturating_add(count);
        self.library.retain(|id, _| !(page..end).contains(id));
        status(StatusCode::Success)
    }

    fn write_parameter(&mut self, params: &[u8]) -> Vec<Frame> {
        let [index, value, ..] = params else {
            return status(StatusCode::FrameError);
        };
        let valid = match *index {
            i if i == DeviceSettingIndex::BaudRate as u8 => BaudRate::try_from(*value)
                .map(|_| self.settings.baud_rate = *value as u16)
                .is_ok(),
            i if i == DeviceSettingIndex::SecurityLevel as u8 => SecurityLevel::try_from(*value)
                .map(|_| self.settings.security_level = *value as u16)
                .is_ok(),
            i if i == DeviceSettingIndex::PacketLength as u8 => PacketLength::try_from(*value)
                .map(|_| self.settings.packet_length = *value as u16)
                .is_ok(),
            _ => return status(StatusCode::IllegalDeviceRegister),
        };
        if valid {
            status(StatusCode::Success)
        } else {
            status(StatusCode::InvalidDeviceConfiguration)
        }
    }

    fn index_table(&self, params: &[u8]) -> Vec<Frame> {
        let page = params.first().copied().unwrap_or(0) as u16;
        let base = page.saturating_mul(INDEX_PAGE_SPAN);
        let mut table = [0u8; 32];
        for id in self.library.keys() {
            if let Some(offset) = id.checked_sub(base)
                && offset < INDEX_PAGE_SPAN
            {
                table[(offset / 8) as usize] |= 1 << (offset % 8);
            }
        }
        ok_with(&table)
    }

    fn encode_settings(&self) -> Vec<u8> {
        let s = &self.settings;
        let mut data = Vec::with_capacity(16);
        data.put_u16(s.status);
        data.put_u16(s.system_id);
        data.put_u16(s.capacity);
        data.put_u16(s.security_level);
        data.put_u32(s.address);
        data.put_u16(s.packet_length);
        data.put_u16(s.baud_rate);
        data
    }
}

/// Simulated sensor, attached to a [`super::MockTransport`] as its device.
///
/// # Examples
///
/// ```
/// use carbio_hardware::mock::{MockTransport, SimulatedSensor};
///
/// let (sensor, handle) = SimulatedSensor::new();
/// handle.enroll(3, 42);
/// handle.place_finger(42);
///
/// let (transport, _wire) = MockTransport::with_device(sensor);
/// # drop(transport);
/// assert_eq!(handle.template_count(), 1);
/// ```
pub struct SimulatedSensor {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSensor {
    pub fn new() -> (Self, SimulatedSensorHandle) {
        let state = Arc::new(Mutex::new(SimState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimulatedSensorHandle { state },
        )
    }
}

impl MockDevice for SimulatedSensor {
    fn handle_frame(&mut self, frame: &Frame) -> Vec<Frame> {
        self.state.lock().handle(frame)
    }
}

/// Control side of a [`SimulatedSensor`].
#[derive(Clone)]
pub struct SimulatedSensorHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSensorHandle {
    /// Put a finger with the given print on the window.
    pub fn place_finger(&self, print: u16) {
        self.state.lock().finger = Some(print);
    }

    pub fn remove_finger(&self) {
        self.state.lock().finger = None;
    }

    pub fn finger(&self) -> Option<u16> {
        self.state.lock().finger
    }

    /// Store `print` directly in library page `page`.
    pub fn enroll(&self, page: u16, print: u16) {
        self.state.lock().library.insert(page, print);
    }

    /// Print stored at `page`, if any.
    pub fn template(&self, page: u16) -> Option<u16> {
        self.state.lock().library.get(&page).copied()
    }

    pub fn template_count(&self) -> usize {
        self.state.lock().library.len()
    }

    /// Print held by character buffer 1 or 2.
    pub fn char_buffer(&self, buffer_id: u8) -> Option<u16> {
        buffer_index(buffer_id).and_then(|i| self.state.lock().buffers[i])
    }

    pub fn image(&self) -> Option<u16> {
        self.state.lock().image
    }

    /// Confidence reported by successful matches and searches.
    pub fn set_confidence(&self, confidence: u16) {
        self.state.lock().confidence = confidence;
    }

    /// Fail the next `code` command with `status`.
    pub fn fail_next(&self, code: CommandCode, status: StatusCode) {
        self.state.lock().faults.push_back((code, Some(status)));
    }

    /// Swallow the next `code` command without replying.
    pub fn silence_next(&self, code: CommandCode) {
        self.state.lock().faults.push_back((code, None));
    }

    pub fn set_password(&self, password: u32) {
        self.state.lock().password = password;
    }

    pub fn password(&self) -> u32 {
        self.state.lock().password
    }

    pub fn settings(&self) -> DeviceSettings {
        self.state.lock().settings
    }

    pub fn set_capacity(&self, capacity: u16) {
        self.state.lock().settings.capacity = capacity;
    }

    pub fn led(&self) -> LedState {
        self.state.lock().led
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<CommandCode> {
        self.state.lock().log.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().log.clear();
    }

    /// How many times `code` has been received.
    pub fn count_of(&self, code: CommandCode) -> usize {
        self.state.lock().log.iter().filter(|c| **c == code).count()
    }
}
