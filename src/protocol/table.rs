//! Field table codec.
//!
//! Tables carry server and client properties during the handshake and
//! capability discovery afterwards. Keys are short strings; values are
//! tagged with a single type byte. Nested tables and arrays are
//! supported.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::codec::{
    put_short_str, take_bytes, take_short_str, take_u32, take_u64, take_u8,
};

/// A field table: short-string keys mapped to typed values.
pub type Table = BTreeMap<String, FieldValue>;

/// Maximum table/array nesting depth accepted by the decoder.
///
/// The server properties in `connection.start` are decoded before the
/// peer has authenticated; without a bound, a crafted frame nesting a
/// few thousand tables would exhaust the stack instead of failing like
/// every other malformed input.
const MAX_NESTING_DEPTH: usize = 32;

/// A single typed value inside a [`Table`] or field array.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal { scale: u8, value: u32 },
    LongString(String),
    Bytes(Bytes),
    Array(Vec<FieldValue>),
    Timestamp(u64),
    Table(Table),
    Void,
}

/// Encode a table with its 4-byte size prefix.
pub fn put_table(buf: &mut BytesMut, table: &Table) -> Result<()> {
    let mut body = BytesMut::new();
    for (key, value) in table {
        put_short_str(&mut body, key)?;
        put_field(&mut body, value)?;
    }
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(())
}

/// Decode a size-prefixed table.
pub fn take_table(buf: &mut Bytes) -> Result<Table> {
    take_table_at(buf, 0)
}

fn take_table_at(buf: &mut Bytes, depth: usize) -> Result<Table> {
    let len = take_u32(buf)? as usize;
    let mut body = take_bytes(buf, len)?;

    let mut table = Table::new();
    while body.has_remaining() {
        let key = take_short_str(&mut body)?;
        let value = take_field(&mut body, depth)?;
        table.insert(key, value);
    }
    Ok(table)
}

fn put_field(buf: &mut BytesMut, value: &FieldValue) -> Result<()> {
    match value {
        FieldValue::Bool(v) => {
            buf.put_u8(b't');
            buf.put_u8(u8::from(*v));
        }
        FieldValue::I8(v) => {
            buf.put_u8(b'b');
            buf.put_i8(*v);
        }
        FieldValue::I16(v) => {
            buf.put_u8(b's');
            buf.put_i16(*v);
        }
        FieldValue::I32(v) => {
            buf.put_u8(b'I');
            buf.put_i32(*v);
        }
        FieldValue::I64(v) => {
            buf.put_u8(b'l');
            buf.put_i64(*v);
        }
        FieldValue::F32(v) => {
            buf.put_u8(b'f');
            buf.put_f32(*v);
        }
        FieldValue::F64(v) => {
            buf.put_u8(b'd');
            buf.put_f64(*v);
        }
        FieldValue::Decimal { scale, value } => {
            buf.put_u8(b'D');
            buf.put_u8(*scale);
            buf.put_u32(*value);
        }
        FieldValue::LongString(v) => {
            buf.put_u8(b'S');
            buf.put_u32(v.len() as u32);
            buf.put_slice(v.as_bytes());
        }
        FieldValue::Bytes(v) => {
            buf.put_u8(b'x');
            buf.put_u32(v.len() as u32);
            buf.put_slice(v);
        }
        FieldValue::Array(items) => {
            buf.put_u8(b'A');
            let mut body = BytesMut::new();
            for item in items {
                put_field(&mut body, item)?;
            }
            buf.put_u32(body.len() as u32);
            buf.put_slice(&body);
        }
        FieldValue::Timestamp(v) => {
            buf.put_u8(b'T');
            buf.put_u64(*v);
        }
        FieldValue::Table(t) => {
            buf.put_u8(b'F');
            put_table(buf, t)?;
        }
        FieldValue::Void => buf.put_u8(b'V'),
    }
    Ok(())
}

fn take_field(buf: &mut Bytes, depth: usize) -> Result<FieldValue> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::syntax("field table nesting too deep"));
    }
    let tag = take_u8(buf)?;
    let value = match tag {
        b't' => FieldValue::Bool(take_u8(buf)? != 0),
        b'b' => FieldValue::I8(take_u8(buf)? as i8),
        b's' => FieldValue::I16(take_u16_i(buf)?),
        b'I' => FieldValue::I32(take_u32(buf)? as i32),
        b'l' => FieldValue::I64(take_u64(buf)? as i64),
        b'f' => FieldValue::F32(f32::from_bits(take_u32(buf)?)),
        b'd' => FieldValue::F64(f64::from_bits(take_u64(buf)?)),
        b'D' => FieldValue::Decimal {
            scale: take_u8(buf)?,
            value: take_u32(buf)?,
        },
        b'S' => {
            let len = take_u32(buf)? as usize;
            let raw = take_bytes(buf, len)?;
            match String::from_utf8(raw.to_vec()) {
                Ok(s) => FieldValue::LongString(s),
                // Some peers put raw octets into 'S'; keep them.
                Err(e) => FieldValue::Bytes(Bytes::from(e.into_bytes())),
            }
        }
        b'x' => {
            let len = take_u32(buf)? as usize;
            FieldValue::Bytes(take_bytes(buf, len)?)
        }
        b'A' => {
            let len = take_u32(buf)? as usize;
            let mut body = take_bytes(buf, len)?;
            let mut items = Vec::new();
            while body.has_remaining() {
                items.push(take_field(&mut body, depth + 1)?);
            }
            FieldValue::Array(items)
        }
        b'T' => FieldValue::Timestamp(take_u64(buf)?),
        b'F' => FieldValue::Table(take_table_at(buf, depth + 1)?),
        b'V' => FieldValue::Void,
        other => {
            return Err(Error::syntax(format!(
                "unknown field type tag 0x{other:02x}"
            )))
        }
    };
    Ok(value)
}

fn take_u16_i(buf: &mut Bytes) -> Result<i16> {
    let mut raw = take_bytes(buf, 2)?;
    Ok(raw.get_i16())
}
