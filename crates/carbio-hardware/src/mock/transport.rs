//! In-memory transport for tests and development.
//!
//! [`MockTransport`] stands in for the UART. Bytes written by the host are cut
//! into frames with the stream codec; each command frame is answered either
//! from a queue of scripted replies or by an attached [`MockDevice`] such as
//! the simulated sensor. Reads never block: when the reply bytes run out the
//! read returns a short count, which is exactly what a real timeout looks
//! like to the layers above.

use crate::transport::Transport;
use bytes::BytesMut;
use carbio_core::constants::DEFAULT_ADDRESS;
use carbio_core::{Error, Result, StatusCode};
use carbio_protocol::{Frame, PacketId, SensorCodec};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::codec::Decoder;

/// Something that answers frames written to a [`MockTransport`].
pub trait MockDevice: Send {
    /// Handle one frame from the host and return the frames sent back.
    fn handle_frame(&mut self, frame: &Frame) -> Vec<Frame>;
}

#[derive(Default)]
struct MockState {
    open: bool,
    path: String,
    baud_rate: u32,
    responsive_bauds: Option<Vec<u32>>,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    pending: BytesMut,
    replies: VecDeque<Vec<u8>>,
    device: Option<Box<dyn MockDevice>>,
    write_limit: Option<usize>,
    fail_open: bool,
    reads: usize,
    writes: usize,
    flushes: usize,
    drains: usize,
    opens: usize,
}

/// Scriptable in-memory [`Transport`].
///
/// # Examples
///
/// ```
/// use carbio_core::StatusCode;
/// use carbio_hardware::mock::MockTransport;
/// use carbio_hardware::Transport;
/// use std::time::Duration;
///
/// let (mut transport, handle) = MockTransport::new();
/// transport.open("/dev/mock").unwrap();
///
/// handle.queue_ack(StatusCode::Success, &[]);
/// transport.write_exact(&[0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05], Duration::ZERO);
///
/// let mut reply = [0u8; 12];
/// assert_eq!(transport.read_exact(&mut reply, Duration::ZERO), 12);
/// assert_eq!(reply[6], 0x07);
/// ```
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a transport with no device attached; replies must be queued
    /// through the returned handle.
    pub fn new() -> (Self, MockTransportHandle) {
        let state = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockTransportHandle { state },
        )
    }

    /// Create a transport answered by `device` whenever no scripted reply is
    /// queued.
    pub fn with_device(device: impl MockDevice + 'static) -> (Self, MockTransportHandle) {
        let (transport, handle) = Self::new();
        transport.state.lock().device = Some(Box::new(device));
        (transport, handle)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockTransport")
            .field("open", &state.open)
            .field("baud_rate", &state.baud_rate)
            .field("rx", &state.rx.len())
            .finish()
    }
}

impl MockState {
    fn answers_at_current_baud(&self) -> bool {
        self.responsive_bauds
            .as_ref()
            .is_none_or(|bauds| bauds.contains(&self.baud_rate))
    }

    fn dispatch(&mut self, frame: &Frame) {
        if !self.answers_at_current_baud() {
            return;
        }

        if frame.id() == PacketId::Command
            && let Some(reply) = self.replies.pop_front()
        {
            self.rx.extend(reply);
            return;
        }

        if let Some(device) = self.device.as_mut() {
            for reply in device.handle_frame(frame) {
                self.rx.extend(reply.to_bytes().iter().copied());
            }
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self, path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.opens += 1;
        if state.fail_open {
            return Err(Error::serial(format!("{path}: no such device")));
        }
        state.open = true;
        state.path = path.to_string();
        if state.baud_rate == 0 {
            state.baud_rate = carbio_core::constants::DEFAULT_BAUD_RATE;
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.open = false;
        state.rx.clear();
        state.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotOpen);
        }
        state.baud_rate = baud_rate;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> usize {
        let mut state = self.state.lock();
        state.reads += 1;
        if !state.open {
            return 0;
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn write_exact(&mut self, buf: &[u8], _timeout: Duration) -> usize {
        let mut state = self.state.lock();
        state.writes += 1;
        if !state.open {
            return 0;
        }

        let n = state.write_limit.map_or(buf.len(), |limit| buf.len().min(limit));
        state.tx.extend_from_slice(&buf[..n]);
        state.pending.extend_from_slice(&buf[..n]);

        let mut codec = SensorCodec::new(DEFAULT_ADDRESS);
        loop {
            let mut pending = std::mem::take(&mut state.pending);
            let decoded = codec.decode(&mut pending);
            state.pending = pending;
            match decoded {
                Ok(Some(frame)) => state.dispatch(&frame),
                Ok(None) => break,
                // Frames for other addresses or corrupt frames are dropped,
                // like a real sensor would ignore them.
                Err(_) => continue,
            }
        }
        n
    }

    fn flush(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotOpen);
        }
        state.flushes += 1;
        state.rx.clear();
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::NotOpen);
        }
        state.drains += 1;
        Ok(())
    }

    fn available(&self) -> usize {
        self.state.lock().rx.len()
    }
}

/// Handle for scripting and inspecting a [`MockTransport`].
#[derive(Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransportHandle {
    /// Queue raw bytes as the reply to the next command frame.
    pub fn queue_reply(&self, bytes: impl Into<Vec<u8>>) {
        self.state.lock().replies.push_back(bytes.into());
    }

    /// Queue an acknowledge frame `[status, data...]` as the next reply.
    pub fn queue_ack(&self, status: StatusCode, data: &[u8]) {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(status.as_u8());
        payload.extend_from_slice(data);
        self.queue_frame(PacketId::Acknowledge, &payload);
    }

    /// Queue any frame as the next reply.
    pub fn queue_frame(&self, id: PacketId, payload: &[u8]) {
        if let Ok(frame) = Frame::new(DEFAULT_ADDRESS, id, payload) {
            self.queue_reply(frame.to_bytes().to_vec());
        }
    }

    /// Append bytes to the receive side right now, before any command.
    pub fn inject_rx(&self, bytes: &[u8]) {
        self.state.lock().rx.extend(bytes.iter().copied());
    }

    /// Accept at most `limit` bytes per write call.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state.lock().write_limit = limit;
    }

    /// Only answer while the line runs at one of `bauds`.
    pub fn set_responsive_bauds(&self, bauds: Option<Vec<u32>>) {
        self.state.lock().responsive_bauds = bauds;
    }

    /// Make every `open` call fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Every byte the host has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.lock().tx.clone()
    }

    /// Written bytes decoded as frames.
    pub fn written_frames(&self) -> Vec<Frame> {
        let mut codec = SensorCodec::new(DEFAULT_ADDRESS);
        let mut buf = BytesMut::from(&self.written()[..]);
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = codec.decode(&mut buf) {
            frames.push(frame);
        }
        frames
    }

    /// Command bytes of every command frame written, in order.
    pub fn written_commands(&self) -> Vec<u8> {
        self.written_frames()
            .iter()
            .filter(|f| f.id() == PacketId::Command)
            .filter_map(|f| f.payload().first().copied())
            .collect()
    }

    pub fn clear_written(&self) {
        self.state.lock().tx.clear();
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub fn path(&self) -> String {
        self.state.lock().path.clone()
    }

    pub fn baud_rate(&self) -> u32 {
        self.state.lock().baud_rate
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn drain_count(&self) -> usize {
        self.state.lock().drains
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Scripted replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.state.lock().replies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl MockDevice for Echo {
        fn handle_frame(&mut self, frame: &Frame) -> Vec<Frame> {
            let payload = [0x00, frame.payload()[0]];
            vec![Frame::new(DEFAULT_ADDRESS, PacketId::Acknowledge, &payload).unwrap()]
        }
    }

    fn command(code: u8) -> Vec<u8> {
        Frame::new(DEFAULT_ADDRESS, PacketId::Command, &[code])
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn test_closed_transport_moves_nothing() {
        let (mut transport, handle) = MockTransport::new();
        assert_eq!(transport.write_exact(&command(1), Duration::ZERO), 0);
        assert_eq!(transport.read_exact(&mut [0u8; 4], Duration::ZERO), 0);
        assert!(handle.written().is_empty());
        assert!(transport.flush().is_err());
    }

    #[test]
    fn test_scripted_reply_beats_device() {
        let (mut transport, handle) = MockTransport::with_device(Echo);
        transport.open("/dev/mock").unwrap();
        handle.queue_ack(StatusCode::NoFinger, &[]);

        transport.write_exact(&command(0x01), Duration::ZERO);
        let mut buf = [0u8; 12];
        assert_eq!(transport.read_exact(&mut buf, Duration::ZERO), 12);
        assert_eq!(buf[9], StatusCode::NoFinger.as_u8());

        transport.write_exact(&command(0x1D), Duration::ZERO);
        let mut buf = [0u8; 13];
        assert_eq!(transport.read_exact(&mut buf, Duration::ZERO), 13);
        assert_eq!(&buf[9..11], &[0x00, 0x1D]);
    }

    #[test]
    fn test_short_read_when_empty() {
        let (mut transport, handle) = MockTransport::new();
        transport.open("/dev/mock").unwrap();
        handle.inject_rx(&[1, 2, 3]);
        let mut buf = [0u8; 9];
        assert_eq!(transport.available(), 3);
        assert_eq!(transport.read_exact(&mut buf, Duration::ZERO), 3);
    }

    #[test]
    fn test_write_limit_and_split_frames() {
        let (mut transport, handle) = MockTransport::with_device(Echo);
        transport.open("/dev/mock").unwrap();
        handle.set_write_limit(Some(5));

        let bytes = command(0x03);
        assert_eq!(transport.write_exact(&bytes, Duration::ZERO), 5);
        assert_eq!(transport.available(), 0);

        handle.set_write_limit(None);
        assert_eq!(transport.write_exact(&bytes[5..], Duration::ZERO), bytes.len() - 5);
        assert_eq!(transport.available(), 13);
        assert_eq!(handle.written_commands(), vec![0x03]);
    }

    #[test]
    fn test_flush_discards_stale_input() {
        let (mut transport, handle) = MockTransport::new();
        transport.open("/dev/mock").unwrap();
        handle.inject_rx(&[0xAA; 4]);
        transport.flush().unwrap();
        assert_eq!(transport.available(), 0);
        assert_eq!(handle.flush_count(), 1);
    }

    #[test]
    fn test_silent_at_wrong_baud() {
        let (mut transport, handle) = MockTransport::with_device(Echo);
        transport.open("/dev/mock").unwrap();
        handle.set_responsive_bauds(Some(vec![115_200]));

        transport.write_exact(&command(0x01), Duration::ZERO);
        assert_eq!(transport.available(), 0);

        transport.set_baud_rate(115_200).unwrap();
        transport.write_exact(&command(0x01), Duration::ZERO);
        assert!(transport.available() > 0);
    }
}
