//! One-frame-at-a-time reader over the timeout transport.

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::protocol::frame::{Frame, FRAME_END, FRAME_PREFIX_SIZE};
use crate::transport::TimeoutReader;

/// Reads exactly one frame per call, blocking until a full frame
/// arrives or the transport fails. Every failure on this path is
/// fatal to the connection, so all errors carry the frame kind.
pub(crate) struct FrameReader<R> {
    io: TimeoutReader<R>,
    /// Upper bound on payload size; 0 means unbounded.
    max_frame: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(io: TimeoutReader<R>, max_frame: u32) -> Self {
        Self { io, max_frame }
    }

    pub(crate) async fn read_frame(&mut self) -> Result<Frame> {
        let mut prefix = [0u8; FRAME_PREFIX_SIZE];
        self.io
            .read_exact(&mut prefix)
            .await
            .map_err(|e| Error::frame(e.to_string()))?;

        let frame_type = prefix[0];
        let channel_id = u16::from_be_bytes([prefix[1], prefix[2]]);
        let size = u32::from_be_bytes([prefix[3], prefix[4], prefix[5], prefix[6]]);

        if self.max_frame > 0 && size > self.max_frame {
            return Err(Error::frame(format!(
                "frame of {size} bytes exceeds maximum {}",
                self.max_frame
            )));
        }

        // Payload plus the end marker in one read.
        let mut payload = vec![0u8; size as usize + 1];
        self.io
            .read_exact(&mut payload)
            .await
            .map_err(|e| Error::frame(e.to_string()))?;

        if payload[size as usize] != FRAME_END {
            return Err(Error::frame("missing frame end marker"));
        }
        payload.truncate(size as usize);

        Frame::decode(frame_type, channel_id, Bytes::from(payload))
    }
}
