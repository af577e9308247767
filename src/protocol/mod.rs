//! Protocol module - wire format, framing, and frame I/O.
//!
//! This module implements the binary protocol:
//! - frame envelope encoding/decoding (`type | channel | size | payload | end`)
//! - method payload codecs for the connection and channel classes
//! - the field-table codec used for properties and capabilities
//! - one-frame-at-a-time reader and writer over the timeout transport

mod codec;
mod frame;
mod method;
mod reader;
mod writer;
mod table;

pub use frame::{
    Frame, FRAME_BODY, FRAME_END, FRAME_HEADER, FRAME_HEARTBEAT, FRAME_METHOD, FRAME_PREFIX_SIZE,
    PROTOCOL_HEADER,
};
pub use method::{Method, MethodKind};
pub use table::{put_table, take_table, FieldValue, Table};

pub(crate) use reader::FrameReader;
pub(crate) use writer::FrameWriter;
