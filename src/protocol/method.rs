//! Method payload codec.
//!
//! Methods the connection layer acts on are decoded into dedicated
//! variants; everything else round-trips through [`Method::Other`] with
//! its arguments untouched, so higher layers can own their own codecs.
//! RPC matching is by [`MethodKind`], the fieldless discriminator.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Result;
use crate::protocol::codec::{
    put_long_str, put_short_str, take_long_str, take_short_str, take_u16, take_u32, take_u8,
};
use crate::protocol::table::{put_table, take_table, Table};

pub(crate) const CLASS_CONNECTION: u16 = 10;
pub(crate) const CLASS_CHANNEL: u16 = 20;

const CONNECTION_START: u16 = 10;
const CONNECTION_START_OK: u16 = 11;
const CONNECTION_SECURE: u16 = 20;
const CONNECTION_SECURE_OK: u16 = 21;
const CONNECTION_TUNE: u16 = 30;
const CONNECTION_TUNE_OK: u16 = 31;
const CONNECTION_OPEN: u16 = 40;
const CONNECTION_OPEN_OK: u16 = 41;
const CONNECTION_CLOSE: u16 = 50;
const CONNECTION_CLOSE_OK: u16 = 51;
const CONNECTION_BLOCKED: u16 = 60;
const CONNECTION_UNBLOCKED: u16 = 61;

const CHANNEL_OPEN: u16 = 10;
const CHANNEL_OPEN_OK: u16 = 11;
const CHANNEL_CLOSE: u16 = 40;
const CHANNEL_CLOSE_OK: u16 = 41;

/// A protocol method, decoded from or encoded into a method frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    ConnectionStart {
        version_major: u8,
        version_minor: u8,
        server_properties: Table,
        /// Space-separated mechanism names.
        mechanisms: String,
        locales: String,
    },
    ConnectionStartOk {
        client_properties: Table,
        mechanism: String,
        response: String,
        locale: String,
    },
    ConnectionSecure {
        challenge: String,
    },
    ConnectionSecureOk {
        response: String,
    },
    ConnectionTune {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionTuneOk {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionOpen {
        vhost: String,
    },
    ConnectionOpenOk,
    ConnectionClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    ConnectionCloseOk,
    ConnectionBlocked {
        reason: String,
    },
    ConnectionUnblocked,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    ChannelCloseOk,
    /// Any method this layer does not interpret, carried opaquely.
    Other {
        class_id: u16,
        method_id: u16,
        arguments: Bytes,
    },
}

/// Fieldless discriminator for [`Method`], used to express RPC reply
/// expectations without constructing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    ConnectionStart,
    ConnectionStartOk,
    ConnectionSecure,
    ConnectionSecureOk,
    ConnectionTune,
    ConnectionTuneOk,
    ConnectionOpen,
    ConnectionOpenOk,
    ConnectionClose,
    ConnectionCloseOk,
    ConnectionBlocked,
    ConnectionUnblocked,
    ChannelOpen,
    ChannelOpenOk,
    ChannelClose,
    ChannelCloseOk,
    Other,
}

impl Method {
    /// Discriminator for RPC expectation matching.
    pub fn kind(&self) -> MethodKind {
        match self {
            Method::ConnectionStart { .. } => MethodKind::ConnectionStart,
            Method::ConnectionStartOk { .. } => MethodKind::ConnectionStartOk,
            Method::ConnectionSecure { .. } => MethodKind::ConnectionSecure,
            Method::ConnectionSecureOk { .. } => MethodKind::ConnectionSecureOk,
            Method::ConnectionTune { .. } => MethodKind::ConnectionTune,
            Method::ConnectionTuneOk { .. } => MethodKind::ConnectionTuneOk,
            Method::ConnectionOpen { .. } => MethodKind::ConnectionOpen,
            Method::ConnectionOpenOk => MethodKind::ConnectionOpenOk,
            Method::ConnectionClose { .. } => MethodKind::ConnectionClose,
            Method::ConnectionCloseOk => MethodKind::ConnectionCloseOk,
            Method::ConnectionBlocked { .. } => MethodKind::ConnectionBlocked,
            Method::ConnectionUnblocked => MethodKind::ConnectionUnblocked,
            Method::ChannelOpen => MethodKind::ChannelOpen,
            Method::ChannelOpenOk => MethodKind::ChannelOpenOk,
            Method::ChannelClose { .. } => MethodKind::ChannelClose,
            Method::ChannelCloseOk => MethodKind::ChannelCloseOk,
            Method::Other { .. } => MethodKind::Other,
        }
    }

    /// Wire identity as `(class_id, method_id)`.
    pub fn class_method(&self) -> (u16, u16) {
        match self {
            Method::ConnectionStart { .. } => (CLASS_CONNECTION, CONNECTION_START),
            Method::ConnectionStartOk { .. } => (CLASS_CONNECTION, CONNECTION_START_OK),
            Method::ConnectionSecure { .. } => (CLASS_CONNECTION, CONNECTION_SECURE),
            Method::ConnectionSecureOk { .. } => (CLASS_CONNECTION, CONNECTION_SECURE_OK),
            Method::ConnectionTune { .. } => (CLASS_CONNECTION, CONNECTION_TUNE),
            Method::ConnectionTuneOk { .. } => (CLASS_CONNECTION, CONNECTION_TUNE_OK),
            Method::ConnectionOpen { .. } => (CLASS_CONNECTION, CONNECTION_OPEN),
            Method::ConnectionOpenOk => (CLASS_CONNECTION, CONNECTION_OPEN_OK),
            Method::ConnectionClose { .. } => (CLASS_CONNECTION, CONNECTION_CLOSE),
            Method::ConnectionCloseOk => (CLASS_CONNECTION, CONNECTION_CLOSE_OK),
            Method::ConnectionBlocked { .. } => (CLASS_CONNECTION, CONNECTION_BLOCKED),
            Method::ConnectionUnblocked => (CLASS_CONNECTION, CONNECTION_UNBLOCKED),
            Method::ChannelOpen => (CLASS_CHANNEL, CHANNEL_OPEN),
            Method::ChannelOpenOk => (CLASS_CHANNEL, CHANNEL_OPEN_OK),
            Method::ChannelClose { .. } => (CLASS_CHANNEL, CHANNEL_CLOSE),
            Method::ChannelCloseOk => (CLASS_CHANNEL, CHANNEL_CLOSE_OK),
            Method::Other {
                class_id,
                method_id,
                ..
            } => (*class_id, *method_id),
        }
    }

    /// Encode the method payload (class, method, arguments) into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let (class_id, method_id) = self.class_method();
        buf.put_u16(class_id);
        buf.put_u16(method_id);

        match self {
            Method::ConnectionStart {
                version_major,
                version_minor,
                server_properties,
                mechanisms,
                locales,
            } => {
                buf.put_u8(*version_major);
                buf.put_u8(*version_minor);
                put_table(buf, server_properties)?;
                put_long_str(buf, mechanisms);
                put_long_str(buf, locales);
            }
            Method::ConnectionStartOk {
                client_properties,
                mechanism,
                response,
                locale,
            } => {
                put_table(buf, client_properties)?;
                put_short_str(buf, mechanism)?;
                put_long_str(buf, response);
                put_short_str(buf, locale)?;
            }
            Method::ConnectionSecure { challenge } => put_long_str(buf, challenge),
            Method::ConnectionSecureOk { response } => put_long_str(buf, response),
            Method::ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            }
            | Method::ConnectionTuneOk {
                channel_max,
                frame_max,
                heartbeat,
            } => {
                buf.put_u16(*channel_max);
                buf.put_u32(*frame_max);
                buf.put_u16(*heartbeat);
            }
            Method::ConnectionOpen { vhost } => {
                put_short_str(buf, vhost)?;
                put_short_str(buf, "")?; // reserved (capabilities)
                buf.put_u8(0); // reserved (insist)
            }
            Method::ConnectionOpenOk => put_short_str(buf, "")?, // reserved
            Method::ConnectionClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            }
            | Method::ChannelClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            } => {
                buf.put_u16(*reply_code);
                put_short_str(buf, reply_text)?;
                buf.put_u16(*class_id);
                buf.put_u16(*method_id);
            }
            Method::ConnectionCloseOk | Method::ChannelCloseOk | Method::ConnectionUnblocked => {}
            Method::ConnectionBlocked { reason } => put_short_str(buf, reason)?,
            Method::ChannelOpen => put_short_str(buf, "")?, // reserved
            Method::ChannelOpenOk => put_long_str(buf, ""), // reserved
            Method::Other { arguments, .. } => buf.put_slice(arguments),
        }
        Ok(())
    }

    /// Decode a method payload. `args` holds everything after the
    /// class and method identifiers.
    pub fn decode(class_id: u16, method_id: u16, mut args: Bytes) -> Result<Method> {
        let method = match (class_id, method_id) {
            (CLASS_CONNECTION, CONNECTION_START) => Method::ConnectionStart {
                version_major: take_u8(&mut args)?,
                version_minor: take_u8(&mut args)?,
                server_properties: take_table(&mut args)?,
                mechanisms: take_long_str(&mut args)?,
                locales: take_long_str(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_START_OK) => Method::ConnectionStartOk {
                client_properties: take_table(&mut args)?,
                mechanism: take_short_str(&mut args)?,
                response: take_long_str(&mut args)?,
                locale: take_short_str(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_SECURE) => Method::ConnectionSecure {
                challenge: take_long_str(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_SECURE_OK) => Method::ConnectionSecureOk {
                response: take_long_str(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_TUNE) => Method::ConnectionTune {
                channel_max: take_u16(&mut args)?,
                frame_max: take_u32(&mut args)?,
                heartbeat: take_u16(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_TUNE_OK) => Method::ConnectionTuneOk {
                channel_max: take_u16(&mut args)?,
                frame_max: take_u32(&mut args)?,
                heartbeat: take_u16(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_OPEN) => {
                let vhost = take_short_str(&mut args)?;
                if args.has_remaining() {
                    take_short_str(&mut args)?; // reserved
                }
                if args.has_remaining() {
                    take_u8(&mut args)?; // reserved
                }
                Method::ConnectionOpen { vhost }
            }
            (CLASS_CONNECTION, CONNECTION_OPEN_OK) => {
                if args.has_remaining() {
                    take_short_str(&mut args)?; // reserved
                }
                Method::ConnectionOpenOk
            }
            (CLASS_CONNECTION, CONNECTION_CLOSE) => Method::ConnectionClose {
                reply_code: take_u16(&mut args)?,
                reply_text: take_short_str(&mut args)?,
                class_id: take_u16(&mut args)?,
                method_id: take_u16(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_CLOSE_OK) => Method::ConnectionCloseOk,
            (CLASS_CONNECTION, CONNECTION_BLOCKED) => Method::ConnectionBlocked {
                reason: take_short_str(&mut args)?,
            },
            (CLASS_CONNECTION, CONNECTION_UNBLOCKED) => Method::ConnectionUnblocked,
            (CLASS_CHANNEL, CHANNEL_OPEN) => {
                if args.has_remaining() {
                    take_short_str(&mut args)?; // reserved
                }
                Method::ChannelOpen
            }
            (CLASS_CHANNEL, CHANNEL_OPEN_OK) => {
                if args.has_remaining() {
                    take_long_str(&mut args)?; // reserved
                }
                Method::ChannelOpenOk
            }
            (CLASS_CHANNEL, CHANNEL_CLOSE) => Method::ChannelClose {
                reply_code: take_u16(&mut args)?,
                reply_text: take_short_str(&mut args)?,
                class_id: take_u16(&mut args)?,
                method_id: take_u16(&mut args)?,
            },
            (CLASS_CHANNEL, CHANNEL_CLOSE_OK) => Method::ChannelCloseOk,
            _ => Method::Other {
                class_id,
                method_id,
                arguments: args,
            },
        };
        Ok(method)
    }
}
