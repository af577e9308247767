//! Outbound frame serialization.

use bytes::BytesMut;
use tokio::io::AsyncWrite;

use crate::error::{Error, Result};
use crate::protocol::frame::{Frame, PROTOCOL_HEADER};
use crate::transport::TimeoutWriter;

/// Serializes one frame at a time to the transport.
///
/// The connection wraps this in an exclusive lock so multi-frame
/// publishes never interleave with heartbeats or other channels'
/// frames. Each frame is built into one contiguous buffer and written
/// with a single call.
pub(crate) struct FrameWriter<W> {
    io: TimeoutWriter<W>,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub(crate) fn new(io: TimeoutWriter<W>) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Send the protocol preamble that opens version negotiation.
    pub(crate) async fn write_protocol_header(&mut self) -> Result<()> {
        self.io
            .write_all(&PROTOCOL_HEADER)
            .await
            .map_err(|e| Error::frame(e.to_string()))
    }

    pub(crate) async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.buf.clear();
        frame.encode(&mut self.buf)?;
        self.io
            .write_all(&self.buf)
            .await
            .map_err(|e| Error::frame(e.to_string()))
    }

    /// Close the transport's write side.
    pub(crate) async fn shutdown(&mut self) -> std::io::Result<()> {
        self.io.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::protocol::frame::{FRAME_END, FRAME_HEARTBEAT};
    use crate::protocol::method::Method;

    fn writer_for(
        stream: tokio::io::DuplexStream,
    ) -> FrameWriter<tokio::io::WriteHalf<tokio::io::DuplexStream>> {
        let (_read_half, write_half) = tokio::io::split(stream);
        FrameWriter::new(TimeoutWriter::new(write_half, Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn protocol_header_bytes() {
        let (client, server) = tokio::io::duplex(64);
        let (mut peer, _w) = tokio::io::split(server);

        let mut writer = writer_for(client);
        writer.write_protocol_header().await.unwrap();

        let mut buf = [0u8; 8];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"AMQP\x00\x00\x09\x01");
    }

    #[tokio::test]
    async fn heartbeat_envelope() {
        let (client, server) = tokio::io::duplex(64);
        let (mut peer, _w) = tokio::io::split(server);

        let mut writer = writer_for(client);
        writer.write_frame(&Frame::Heartbeat).await.unwrap();

        let mut buf = [0u8; 8];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [FRAME_HEARTBEAT, 0, 0, 0, 0, 0, 0, FRAME_END]);
    }

    #[tokio::test]
    async fn write_after_peer_drop_fails() {
        let (client, server) = tokio::io::duplex(16);
        drop(server);

        let mut writer = writer_for(client);
        let frame = Frame::Method {
            channel_id: 0,
            method: Method::ConnectionCloseOk,
        };
        assert!(writer.write_frame(&frame).await.is_err());
    }
}
