//! Frame envelope encoding and decoding.
//!
//! Every frame on the wire is:
//! ```text
//! ┌──────────┬───────────┬──────────┬─────────┬──────────┐
//! │ Type     │ Channel   │ Size     │ Payload │ End      │
//! │ 1 byte   │ 2 bytes BE│ 4 bytes BE│ N bytes│ 1 byte   │
//! └──────────┴───────────┴──────────┴─────────┴──────────┘
//! ```
//! The end byte is always `0xCE`. Channel 0 is reserved for
//! connection-level control.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::method::Method;

/// The 8-byte preamble that opens protocol negotiation.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// Frame type: method.
pub const FRAME_METHOD: u8 = 1;
/// Frame type: content header.
pub const FRAME_HEADER: u8 = 2;
/// Frame type: content body chunk.
pub const FRAME_BODY: u8 = 3;
/// Frame type: heartbeat.
pub const FRAME_HEARTBEAT: u8 = 8;
/// Frame end marker.
pub const FRAME_END: u8 = 0xCE;

/// Envelope prefix size: type + channel + size.
pub const FRAME_PREFIX_SIZE: usize = 7;

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A method and its arguments on some channel.
    Method { channel_id: u16, method: Method },
    /// Content header opening a message body. Property flags and fields
    /// are carried opaquely; the content layer owns their codec.
    Header {
        channel_id: u16,
        class_id: u16,
        body_size: u64,
        properties: Bytes,
    },
    /// One chunk of a message body.
    Body { channel_id: u16, payload: Bytes },
    /// Liveness marker; always travels on channel 0.
    Heartbeat,
}

impl Frame {
    /// The channel this frame belongs to. Heartbeats report 0.
    pub fn channel_id(&self) -> u16 {
        match self {
            Frame::Method { channel_id, .. }
            | Frame::Header { channel_id, .. }
            | Frame::Body { channel_id, .. } => *channel_id,
            Frame::Heartbeat => 0,
        }
    }

    /// Encode the full envelope (prefix, payload, end byte) into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut payload = BytesMut::new();
        let (frame_type, channel_id) = match self {
            Frame::Method { channel_id, method } => {
                method.encode(&mut payload)?;
                (FRAME_METHOD, *channel_id)
            }
            Frame::Header {
                channel_id,
                class_id,
                body_size,
                properties,
            } => {
                payload.put_u16(*class_id);
                payload.put_u16(0); // weight, always zero
                payload.put_u64(*body_size);
                payload.put_slice(properties);
                (FRAME_HEADER, *channel_id)
            }
            Frame::Body {
                channel_id,
                payload: body,
            } => {
                payload.put_slice(body);
                (FRAME_BODY, *channel_id)
            }
            Frame::Heartbeat => (FRAME_HEARTBEAT, 0),
        };

        buf.put_u8(frame_type);
        buf.put_u16(channel_id);
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        buf.put_u8(FRAME_END);
        Ok(())
    }

    /// Decode a frame from an already-extracted envelope payload.
    pub fn decode(frame_type: u8, channel_id: u16, mut payload: Bytes) -> Result<Frame> {
        match frame_type {
            FRAME_METHOD => {
                if payload.remaining() < 4 {
                    return Err(Error::frame("method frame shorter than class/method ids"));
                }
                let class_id = payload.get_u16();
                let method_id = payload.get_u16();
                let method = Method::decode(class_id, method_id, payload)?;
                Ok(Frame::Method { channel_id, method })
            }
            FRAME_HEADER => {
                if payload.remaining() < 12 {
                    return Err(Error::frame("header frame shorter than its fixed fields"));
                }
                let class_id = payload.get_u16();
                let _weight = payload.get_u16();
                let body_size = payload.get_u64();
                Ok(Frame::Header {
                    channel_id,
                    class_id,
                    body_size,
                    properties: payload,
                })
            }
            FRAME_BODY => Ok(Frame::Body {
                channel_id,
                payload,
            }),
            FRAME_HEARTBEAT => Ok(Frame::Heartbeat),
            other => Err(Error::frame(format!("unknown frame type {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) -> Frame {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();

        let frame_type = bytes.get_u8();
        let channel_id = bytes.get_u16();
        let size = bytes.get_u32() as usize;
        let payload = bytes.split_to(size);
        assert_eq!(bytes.get_u8(), FRAME_END);
        assert!(bytes.is_empty());
        Frame::decode(frame_type, channel_id, payload).unwrap()
    }

    #[test]
    fn method_frame_roundtrip() {
        let frame = Frame::Method {
            channel_id: 3,
            method: Method::ConnectionTuneOk {
                channel_max: 11,
                frame_max: 4096,
                heartbeat: 10,
            },
        };
        assert_eq!(roundtrip(frame.clone()), frame);
        assert_eq!(frame.channel_id(), 3);
    }

    #[test]
    fn heartbeat_is_channel_zero_and_empty() {
        let mut buf = BytesMut::new();
        Frame::Heartbeat.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[FRAME_HEARTBEAT, 0, 0, 0, 0, 0, 0, FRAME_END]);
        assert_eq!(Frame::Heartbeat.channel_id(), 0);
    }

    #[test]
    fn header_frame_keeps_properties_opaque() {
        let frame = Frame::Header {
            channel_id: 1,
            class_id: 60,
            body_size: 10_000,
            properties: Bytes::from_static(&[0x80, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o']),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn body_frame_roundtrip() {
        let frame = Frame::Body {
            channel_id: 9,
            payload: Bytes::from_static(b"chunk"),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn unknown_frame_type_rejected() {
        let err = Frame::decode(4, 0, Bytes::new()).unwrap_err();
        assert!(err.reason.contains("unknown frame type"));
    }

    #[test]
    fn truncated_header_frame_rejected() {
        assert!(Frame::decode(FRAME_HEADER, 1, Bytes::from_static(&[0, 60])).is_err());
    }
}
