//! Integration tests for SensorCodec with Tokio streams.
//!
//! These tests push frames through an in-memory duplex pipe to check that the
//! codec copes with partial reads, back-to-back frames, leading noise and
//! frames for another device.

mod common;

use carbio_core::StatusCode;
use carbio_protocol::{CommandCode, Frame, PacketId, ProtocolHandler, SensorCodec};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::{Framed, FramedRead};

const ADDRESS: u32 = 0xFFFF_FFFF;

/// Helper function to create a framed duplex stream for testing.
fn create_framed_duplex(
    buffer_size: usize,
) -> (
    Framed<DuplexStream, SensorCodec>,
    Framed<DuplexStream, SensorCodec>,
) {
    let (host, sensor) = tokio::io::duplex(buffer_size);
    (
        Framed::new(host, SensorCodec::new(ADDRESS)),
        Framed::new(sensor, SensorCodec::new(ADDRESS)),
    )
}

#[tokio::test]
async fn test_codec_roundtrip_command() {
    let (mut host, mut sensor) = create_framed_duplex(1024);
    let handler = ProtocolHandler::new(ADDRESS);

    let frame = handler
        .construct_command_packet(CommandCode::CaptureImage, &[])
        .unwrap();
    host.send(&frame).await.unwrap();

    let received = sensor.next().await.unwrap().unwrap();
    assert_eq!(received, frame);
    assert_eq!(received.payload(), &[0x01]);
}

#[tokio::test]
async fn test_codec_command_and_acknowledge() {
    let (mut host, mut sensor) = create_framed_duplex(1024);
    let handler = ProtocolHandler::new(ADDRESS);

    let command = handler
        .construct_command_packet(CommandCode::CountModel, &[])
        .unwrap();
    host.send(&command).await.unwrap();

    let request = sensor.next().await.unwrap().unwrap();
    assert_eq!(request.payload()[0], CommandCode::CountModel.as_u8());

    let ack = Frame::new(ADDRESS, PacketId::Acknowledge, &[0x00, 0x00, 0x11]).unwrap();
    sensor.send(&ack).await.unwrap();

    let reply = host.next().await.unwrap().unwrap();
    let data = handler.parse_acknowledge_frame(&reply).unwrap();
    assert_eq!(data.as_slice(), &[0x00, 0x11]);
}

#[tokio::test]
async fn test_codec_template_transfer_small_pipe() {
    // A 16-byte pipe forces every frame to arrive in several reads.
    let (mut host, mut sensor) = create_framed_duplex(16);
    let mut handler = ProtocolHandler::new(ADDRESS);
    handler.set_packet_length(64);

    let template: Vec<u8> = (0..512u32).map(|i| (i * 7) as u8).collect();
    let frames = handler.construct_data_packets(&template).unwrap();
    let count = frames.len();

    let sender = tokio::spawn(async move {
        for frame in &frames {
            sensor.send(frame).await.unwrap();
        }
    });

    let mut received = Vec::new();
    while received.len() < count {
        received.push(host.next().await.unwrap().unwrap());
    }
    sender.await.unwrap();

    assert_eq!(received.len(), 8);
    let data = handler.parse_data_packets(&received).unwrap();
    assert_eq!(data.as_slice(), template.as_slice());
}

#[tokio::test]
async fn test_codec_skips_leading_noise() {
    let (mut raw, sensor) = tokio::io::duplex(256);
    let mut sensor = FramedRead::new(sensor, SensorCodec::new(ADDRESS));

    let frame = Frame::new(ADDRESS, PacketId::Command, &[0x1D]).unwrap();
    let mut bytes = vec![0x00, 0x13, 0xEF, 0x55];
    bytes.extend_from_slice(&frame.to_bytes());
    raw.write_all(&bytes).await.unwrap();

    assert_eq!(sensor.next().await.unwrap().unwrap(), frame);
}

#[tokio::test]
async fn test_codec_rejects_foreign_address() {
    let (mut host, sensor) = tokio::io::duplex(256);
    let mut sensor = FramedRead::new(sensor, SensorCodec::new(0x0000_0001));

    let frame = Frame::new(ADDRESS, PacketId::Command, &[0x01]).unwrap();
    host.write_all(&frame.to_bytes()).await.unwrap();

    let err = sensor.next().await.unwrap().unwrap_err();
    assert!(err.is(StatusCode::IllegalDeviceAddress));
}

#[tokio::test]
async fn test_codec_handles_rapid_frames() {
    let (mut host, mut sensor) = create_framed_duplex(64);
    let handler = ProtocolHandler::new(ADDRESS);

    let sender = tokio::spawn(async move {
        for page in 0..100u16 {
            let mut params = vec![0x01u8];
            params.extend_from_slice(&page.to_be_bytes());
            let frame = handler
                .construct_command_packet(CommandCode::LoadModel, &params)
                .unwrap();
            host.send(&frame).await.unwrap();
        }
    });

    for page in 0..100u16 {
        let frame = sensor.next().await.unwrap().unwrap();
        assert_eq!(&frame.payload()[2..4], &page.to_be_bytes());
    }
    sender.await.unwrap();
}

#[tokio::test]
async fn test_codec_stream_of_encoded_frames() {
    let handler = ProtocolHandler::new(ADDRESS);
    let frames = handler.construct_data_packets(&[0xA5; 300]).unwrap();
    let bytes = common::encode_all(&frames);

    let (mut raw, sensor) = tokio::io::duplex(32);
    let mut sensor = FramedRead::new(sensor, SensorCodec::new(ADDRESS));
    tokio::spawn(async move {
        raw.write_all(&bytes).await.unwrap();
    });

    let mut received = Vec::new();
    for _ in 0..frames.len() {
        received.push(sensor.next().await.unwrap().unwrap());
    }
    assert_eq!(received, frames);
}
