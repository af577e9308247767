//! Primitive read/write helpers for the wire codec.
//!
//! All multi-byte integers are Big Endian. Readers take from a `Bytes`
//! cursor and fail with a syntax error instead of panicking when the
//! buffer runs short.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Maximum length of a short string (single length byte).
pub(crate) const MAX_SHORT_STR: usize = 255;

pub(crate) fn take_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn take_u16(buf: &mut Bytes) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

pub(crate) fn take_u32(buf: &mut Bytes) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

pub(crate) fn take_u64(buf: &mut Bytes) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

pub(crate) fn take_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

/// Short string: 1-byte length prefix, UTF-8 contents.
pub(crate) fn take_short_str(buf: &mut Bytes) -> Result<String> {
    let len = take_u8(buf)? as usize;
    let raw = take_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::syntax("short string is not valid UTF-8"))
}

/// Long string: 4-byte length prefix. Returned as a `String`; the
/// protocol treats these as octet sequences, but every field this layer
/// reads (mechanism lists, locales, challenges) is textual.
pub(crate) fn take_long_str(buf: &mut Bytes) -> Result<String> {
    let len = take_u32(buf)? as usize;
    let raw = take_bytes(buf, len)?;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::syntax("long string is not valid UTF-8"))
}

pub(crate) fn put_short_str(buf: &mut BytesMut, s: &str) -> Result<()> {
    if s.len() > MAX_SHORT_STR {
        return Err(Error::syntax(format!(
            "short string too long: {} bytes (max {})",
            s.len(),
            MAX_SHORT_STR
        )));
    }
    buf.put_u8(s.len() as u8);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn put_long_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn ensure(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::syntax(format!(
            "truncated field: need {} bytes, have {}",
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_str_roundtrip() {
        let mut buf = BytesMut::new();
        put_short_str(&mut buf, "PLAIN").unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(take_short_str(&mut bytes).unwrap(), "PLAIN");
        assert!(bytes.is_empty());
    }

    #[test]
    fn long_str_roundtrip() {
        let mut buf = BytesMut::new();
        put_long_str(&mut buf, "\u{0}guest\u{0}guest");
        let mut bytes = buf.freeze();
        assert_eq!(take_long_str(&mut bytes).unwrap(), "\u{0}guest\u{0}guest");
    }

    #[test]
    fn overlong_short_str_rejected() {
        let mut buf = BytesMut::new();
        let s = "x".repeat(MAX_SHORT_STR + 1);
        assert!(put_short_str(&mut buf, &s).is_err());
    }

    #[test]
    fn truncated_read_is_an_error_not_a_panic() {
        let mut bytes = Bytes::from_static(&[0x00]);
        assert!(take_u32(&mut bytes).is_err());
    }

    #[test]
    fn short_str_length_is_honoured() {
        // Length byte claims 5, only 3 bytes follow.
        let mut bytes = Bytes::from_static(&[5, b'a', b'b', b'c']);
        assert!(take_short_str(&mut bytes).is_err());
    }
}
