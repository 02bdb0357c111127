//! Synchronous command execution over a [`Transport`].
//!
//! One command is one exchange:
//!
//! ```text
//! flush ─► write command frame ─► drain ─► read 9-byte header
//!                                            │
//!                       read length bytes ◄──┘
//!                            │
//!                   decode + check ack status ─► typed response
//! ```
//!
//! Bulk transfers add a data phase after the acknowledgement: outgoing data
//! is written as `Data`/`EndData` frames, incoming data is read frame by
//! frame until the `EndData` marker arrives.

use crate::transport::Transport;
use carbio_core::constants::{HEADER_SIZE, LENGTH_OFFSET, MAX_PAYLOAD_SIZE};
use carbio_core::{Error, Result, SecureBuffer, StatusCode};
use carbio_protocol::{Command, CommandCode, Frame, ProtocolHandler};
use std::time::Duration;
use tracing::{debug, trace};
use zeroize::Zeroize;

/// Upper bound on a reassembled data phase.
pub const MAX_TRANSFER_SIZE: usize = 128 * 1024;

pub struct CommandExecutor<T: Transport> {
    transport: T,
    handler: ProtocolHandler,
    timeout: Duration,
}

impl<T: Transport> CommandExecutor<T> {
    pub fn new(transport: T, handler: ProtocolHandler, timeout: Duration) -> Self {
        Self {
            transport,
            handler,
            timeout,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn handler(&self) -> &ProtocolHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut ProtocolHandler {
        &mut self.handler
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Send `command` and decode its acknowledgement.
    pub fn execute<C: Command>(&mut self, command: &C) -> Result<C::Response> {
        let payload = self.exchange(C::CODE, command)?;
        C::deserialize_response(payload.as_slice())
    }

    /// Send `command`, then stream `data` to the sensor once it acknowledges.
    pub fn execute_with_upload<C: Command>(&mut self, command: &C, data: &[u8]) -> Result<C::Response> {
        if data.is_empty() {
            return Err(Error::invalid_argument(format!(
                "{} without data",
                C::CODE.as_str()
            )));
        }
        let payload = self.exchange(C::CODE, command)?;
        let response = C::deserialize_response(payload.as_slice())?;
        self.send_data_packets(data)?;
        Ok(response)
    }

    /// Send `command`, then collect the data phase the sensor streams back.
    pub fn execute_with_download<C: Command>(
        &mut self,
        command: &C,
    ) -> Result<(C::Response, SecureBuffer)> {
        let payload = self.exchange(C::CODE, command)?;
        let response = C::deserialize_response(payload.as_slice())?;
        let data = self.receive_data_packets()?;
        Ok((response, data))
    }

    fn exchange<C: Command>(&mut self, code: CommandCode, command: &C) -> Result<SecureBuffer> {
        if !self.transport.is_open() {
            return Err(Error::NotOpen);
        }
        self.transport.flush()?;

        let mut params = Vec::with_capacity(MAX_PAYLOAD_SIZE);
        command.serialize_request(&mut params);
        let frame = self.handler.construct_command_packet(code, &params);
        params.zeroize();
        let frame = frame?;

        trace!(%code, "sending command");
        self.write_frame(&frame)?;
        self.transport.drain()?;

        let reply = self.read_frame()?;
        let result = self.handler.parse_acknowledge_frame(&reply);
        if let Err(err) = &result {
            debug!(%code, error = %err, "command failed");
        }
        result
    }

    /// Encode and write one frame. A short write is a `Timeout`.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let mut bytes = Vec::with_capacity(frame.encoded_len());
        frame.encode_to(&mut bytes);
        let written = self.transport.write_exact(&bytes, self.timeout);
        bytes.zeroize();

        if written != frame.encoded_len() {
            debug!(written, expected = frame.encoded_len(), "short write");
            return Err(StatusCode::Timeout.into());
        }
        Ok(())
    }

    /// Read one complete frame: the fixed header first, then the number of
    /// bytes its length field announces.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        let n = self.transport.read_exact(&mut header, self.timeout);
        if n != HEADER_SIZE {
            trace!(received = n, "short header");
            return Err(StatusCode::FrameError.into());
        }

        let length =
            u16::from_be_bytes([header[LENGTH_OFFSET], header[LENGTH_OFFSET + 1]]) as usize;
        if !(2..=MAX_PAYLOAD_SIZE + 2).contains(&length) {
            return Err(StatusCode::BadPacket.into());
        }

        let mut buf = vec![0u8; HEADER_SIZE + length];
        buf[..HEADER_SIZE].copy_from_slice(&header);
        let n = self.transport.read_exact(&mut buf[HEADER_SIZE..], self.timeout);
        let frame = if n == length {
            self.handler.decode(&buf)
        } else {
            trace!(received = n, expected = length, "short body");
            Err(StatusCode::FrameError.into())
        };
        buf.zeroize();
        header.zeroize();
        frame
    }

    /// Split `data` by the negotiated packet length and write every frame.
    pub fn send_data_packets(&mut self, data: &[u8]) -> Result<()> {
        let frames = self.handler.construct_data_packets(data)?;
        trace!(frames = frames.len(), bytes = data.len(), "sending data phase");
        for frame in &frames {
            self.write_frame(frame)?;
        }
        self.transport.drain()
    }

    /// Read data frames until `EndData` and return their concatenated payloads.
    pub fn receive_data_packets(&mut self) -> Result<SecureBuffer> {
        let mut out = SecureBuffer::with_capacity(self.handler.packet_length() * 4);
        loop {
            let frame = self.read_frame()?;
            if self.handler.parse_data_packet(&frame, &mut out)? {
                trace!(bytes = out.len(), "data phase complete");
                return Ok(out);
            }
            if out.len() > MAX_TRANSFER_SIZE {
                return Err(StatusCode::BadPacket.into());
            }
        }
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for CommandExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("transport", &self.transport)
            .field("handler", &self.handler)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use carbio_core::constants::DEFAULT_ADDRESS;
    use carbio_protocol::PacketId;
    use carbio_protocol::commands::{CaptureImage, CountModel, DownloadModel, UploadModel};

    fn executor() -> (CommandExecutor<MockTransport>, crate::mock::MockTransportHandle) {
        let (mut transport, handle) = MockTransport::new();
        transport.open("/dev/mock").unwrap();
        let executor = CommandExecutor::new(
            transport,
            ProtocolHandler::new(DEFAULT_ADDRESS),
            Duration::from_millis(10),
        );
        (executor, handle)
    }

    #[test]
    fn test_execute_writes_exact_frame() {
        let (mut executor, handle) = executor();
        handle.queue_ack(StatusCode::Success, &[]);

        executor.execute(&CaptureImage).unwrap();
        assert_eq!(
            handle.written(),
            vec![0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05]
        );
        assert_eq!(handle.flush_count(), 1);
        assert_eq!(handle.drain_count(), 1);
    }

    #[test]
    fn test_execute_decodes_response() {
        let (mut executor, handle) = executor();
        handle.queue_ack(StatusCode::Success, &[0x00, 0x2A]);
        assert_eq!(executor.execute(&CountModel).unwrap(), 42);
    }

    #[test]
    fn test_status_surfaces() {
        let (mut executor, handle) = executor();
        handle.queue_ack(StatusCode::NoFinger, &[]);
        let err = executor.execute(&CaptureImage).unwrap_err();
        assert!(err.is(StatusCode::NoFinger));
    }

    #[test]
    fn test_short_write_is_timeout_without_read() {
        let (mut executor, handle) = executor();
        handle.set_write_limit(Some(4));
        let reads = handle.read_count();

        let err = executor.execute(&CaptureImage).unwrap_err();
        assert!(err.is(StatusCode::Timeout));
        assert_eq!(handle.read_count(), reads);
    }

    #[test]
    fn test_silence_is_frame_error() {
        let (mut executor, _handle) = executor();
        let err = executor.execute(&CaptureImage).unwrap_err();
        assert!(err.is(StatusCode::FrameError));
    }

    #[test]
    fn test_truncated_body_is_frame_error() {
        let (mut executor, handle) = executor();
        handle.queue_reply(vec![0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x00, 0x03, 0x00]);
        let err = executor.execute(&CaptureImage).unwrap_err();
        assert!(err.is(StatusCode::FrameError));
    }

    #[test]
    fn test_oversized_length_is_bad_packet() {
        let (mut executor, handle) = executor();
        handle.queue_reply(vec![0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x01, 0x03]);
        let err = executor.execute(&CaptureImage).unwrap_err();
        assert!(err.is(StatusCode::BadPacket));
    }

    #[test]
    fn test_closed_transport() {
        let (transport, _handle) = MockTransport::new();
        let mut executor =
            CommandExecutor::new(transport, ProtocolHandler::default(), Duration::from_millis(1));
        assert!(matches!(executor.execute(&CaptureImage), Err(Error::NotOpen)));
    }

    #[test]
    fn test_upload_streams_after_ack() {
        let (mut executor, handle) = executor();
        executor.handler_mut().set_packet_length(128);
        handle.queue_ack(StatusCode::Success, &[]);

        executor
            .execute_with_upload(&UploadModel { buffer_id: 1 }, &[0x33; 512])
            .unwrap();

        let frames = handle.written_frames();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0].id(), PacketId::Command);
        assert!(frames[1..4].iter().all(|f| f.id() == PacketId::Data));
        assert_eq!(frames[4].id(), PacketId::EndData);
    }

    #[test]
    fn test_upload_rejected_ack_sends_no_data() {
        let (mut executor, handle) = executor();
        handle.queue_ack(StatusCode::FeatureUploadFailed, &[]);

        let err = executor
            .execute_with_upload(&UploadModel { buffer_id: 1 }, &[0x33; 512])
            .unwrap_err();
        assert!(err.is(StatusCode::FeatureUploadFailed));
        assert_eq!(handle.written_frames().len(), 1);
    }

    #[test]
    fn test_download_collects_until_end_data() {
        let (mut executor, handle) = executor();
        let mut reply = Vec::new();
        for (id, payload) in [
            (PacketId::Acknowledge, vec![0x00]),
            (PacketId::Data, vec![1u8; 256]),
            (PacketId::EndData, vec![2u8; 256]),
        ] {
            reply.extend_from_slice(&Frame::new(DEFAULT_ADDRESS, id, &payload).unwrap().to_bytes());
        }
        handle.queue_reply(reply);

        let ((), data) = executor
            .execute_with_download(&DownloadModel { buffer_id: 1 })
            .unwrap();
        assert_eq!(data.len(), 512);
        assert_eq!(data[0], 1);
        assert_eq!(data[511], 2);
    }

    #[test]
    fn test_download_missing_end_data() {
        let (mut executor, handle) = executor();
        let mut reply = Frame::new(DEFAULT_ADDRESS, PacketId::Acknowledge, &[0x00])
            .unwrap()
            .to_bytes()
            .to_vec();
        reply.extend_from_slice(
            &Frame::new(DEFAULT_ADDRESS, PacketId::Data, &[1u8; 32]).unwrap().to_bytes(),
        );
        handle.queue_reply(reply);

        let err = executor
            .execute_with_download(&DownloadModel { buffer_id: 1 })
            .unwrap_err();
        assert!(err.is(StatusCode::FrameError));
    }
}
