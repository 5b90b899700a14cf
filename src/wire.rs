//! MessagePack plumbing shared by every message kind
//!
//! Values are built and parsed with `rmpv`. The [`Unpacker`] adds what
//! `rmpv` lacks for streaming: it accumulates arbitrary fragments and hands
//! back each top-level value once all of its bytes have arrived. Completeness
//! is decided by walking markers with `rmp`, skipping over binary and string
//! bodies by their declared length, so a large chunk is not re-parsed every
//! time another fragment of it shows up.

use rmp::Marker;
use rmpv::Value;

use crate::error::{ErrorCategory, ErrorKind, Result, SaltpackError};

/// Serialize one value into a fresh buffer.
pub(crate) fn pack(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, value).map_err(|e| {
        SaltpackError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "failed to serialize value",
            e,
        )
    })?;
    Ok(out)
}

/// Serialize one value, appending to `out`.
pub(crate) fn pack_into(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    out.extend_from_slice(&pack(value)?);
    Ok(())
}

/// Parse exactly one value occupying all of `bytes`.
pub(crate) fn unpack_exact(bytes: &[u8]) -> Result<Value> {
    match value_len(bytes)? {
        Some(len) if len == bytes.len() => read_value(bytes),
        Some(_) => Err(SaltpackError::framing(
            ErrorKind::WireFormat,
            "unexpected data after serialized value",
        )),
        None => Err(SaltpackError::framing(
            ErrorKind::TruncatedInput,
            "serialized value is truncated",
        )),
    }
}

/// Parse every complete value in `bytes`, which must hold nothing else.
pub(crate) fn unpack_all(bytes: &[u8]) -> Result<Vec<Value>> {
    let mut unpacker = Unpacker::new();
    unpacker.push(bytes);
    let values = unpacker.drain_values()?;
    unpacker.finish()?;
    Ok(values)
}

fn read_value(bytes: &[u8]) -> Result<Value> {
    let mut cursor = bytes;
    rmpv::decode::read_value(&mut cursor).map_err(|e| {
        SaltpackError::with_kind_and_source(
            ErrorCategory::MalformedFraming,
            ErrorKind::WireFormat,
            "invalid MessagePack data",
            e,
        )
    })
}

/// Incremental decoder for a concatenation of top-level values.
#[derive(Debug, Default)]
pub(crate) struct Unpacker {
    buffer: Vec<u8>,
}

impl Unpacker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Remove and return every value that is complete so far.
    pub(crate) fn drain_values(&mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        let mut offset = 0;
        while let Some(len) = value_len(&self.buffer[offset..])? {
            values.push(read_value(&self.buffer[offset..offset + len])?);
            offset += len;
        }
        self.buffer.drain(..offset);
        Ok(values)
    }

    /// Fails if a partial value is still buffered.
    pub(crate) fn finish(&self) -> Result<()> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(SaltpackError::framing(
                ErrorKind::TruncatedInput,
                format!(
                    "input ended inside a serialized value ({} bytes left over)",
                    self.buffer.len()
                ),
            ))
        }
    }
}

/// Length of the first complete value in `buf`, or `None` if more bytes are
/// needed to tell.
fn value_len(buf: &[u8]) -> Result<Option<usize>> {
    let mut pos = 0usize;
    let mut pending = 1usize;

    while pending > 0 {
        pending -= 1;
        let Some(&byte) = buf.get(pos) else {
            return Ok(None);
        };
        pos += 1;

        let (body, children) = match Marker::from_u8(byte) {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
                (0, 0)
            }
            Marker::U8 | Marker::I8 => (1, 0),
            Marker::U16 | Marker::I16 | Marker::FixExt1 => (2, 0),
            Marker::FixExt2 => (3, 0),
            Marker::U32 | Marker::I32 | Marker::F32 => (4, 0),
            Marker::FixExt4 => (5, 0),
            Marker::U64 | Marker::I64 | Marker::F64 => (8, 0),
            Marker::FixExt8 => (9, 0),
            Marker::FixExt16 => (17, 0),
            Marker::FixStr(len) => (usize::from(len), 0),
            Marker::Str8 | Marker::Bin8 => match read_len(buf, &mut pos, 1) {
                Some(len) => (len, 0),
                None => return Ok(None),
            },
            Marker::Str16 | Marker::Bin16 => match read_len(buf, &mut pos, 2) {
                Some(len) => (len, 0),
                None => return Ok(None),
            },
            Marker::Str32 | Marker::Bin32 => match read_len(buf, &mut pos, 4) {
                Some(len) => (len, 0),
                None => return Ok(None),
            },
            Marker::Ext8 => match read_len(buf, &mut pos, 1) {
                Some(len) => (len + 1, 0),
                None => return Ok(None),
            },
            Marker::Ext16 => match read_len(buf, &mut pos, 2) {
                Some(len) => (len + 1, 0),
                None => return Ok(None),
            },
            Marker::Ext32 => match read_len(buf, &mut pos, 4) {
                Some(len) => (len + 1, 0),
                None => return Ok(None),
            },
            Marker::FixArray(len) => (0, usize::from(len)),
            Marker::Array16 => match read_len(buf, &mut pos, 2) {
                Some(len) => (0, len),
                None => return Ok(None),
            },
            Marker::Array32 => match read_len(buf, &mut pos, 4) {
                Some(len) => (0, len),
                None => return Ok(None),
            },
            Marker::FixMap(len) => (0, 2 * usize::from(len)),
            Marker::Map16 => match read_len(buf, &mut pos, 2) {
                Some(len) => (0, 2 * len),
                None => return Ok(None),
            },
            Marker::Map32 => match read_len(buf, &mut pos, 4) {
                Some(len) => (0, len.saturating_mul(2)),
                None => return Ok(None),
            },
            Marker::Reserved => {
                return Err(SaltpackError::framing(
                    ErrorKind::WireFormat,
                    format!("reserved MessagePack marker 0x{:02x}", byte),
                ));
            }
        };

        pos = pos.saturating_add(body);
        if pos > buf.len() {
            return Ok(None);
        }
        pending = pending.saturating_add(children);
    }

    Ok(Some(pos))
}

fn read_len(buf: &[u8], pos: &mut usize, width: usize) -> Option<usize> {
    let bytes = buf.get(*pos..*pos + width)?;
    *pos += width;
    Some(bytes.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b)))
}

/// Wrap raw bytes as a MessagePack `bin` value.
pub(crate) fn bin(bytes: &[u8]) -> Value {
    Value::Binary(bytes.to_vec())
}

/// Borrow the bytes of a `bin` value. `str` values are accepted too, since
/// some encoders pick `str` for byte fields that happen to be valid UTF-8.
pub(crate) fn as_bytes<'a>(value: &'a Value, what: &str) -> Result<&'a [u8]> {
    match value {
        Value::Binary(bytes) => Ok(bytes),
        Value::String(s) => Ok(s.as_bytes()),
        _ => Err(SaltpackError::framing(
            ErrorKind::WireFormat,
            format!("{} must be binary data", what),
        )),
    }
}

/// Like [`as_bytes`], additionally requiring an exact length.
pub(crate) fn as_fixed<const N: usize>(value: &Value, what: &str) -> Result<[u8; N]> {
    let bytes = as_bytes(value, what)?;
    <[u8; N]>::try_from(bytes).map_err(|_| {
        SaltpackError::framing(
            ErrorKind::WireFormat,
            format!("{} must be {} bytes, got {}", what, N, bytes.len()),
        )
    })
}

pub(crate) fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(SaltpackError::framing(
            ErrorKind::WireFormat,
            format!("{} must be an array", what),
        )),
    }
}

/// Borrow an array that must hold exactly `len` items.
pub(crate) fn as_tuple<'a>(value: &'a Value, len: usize, what: &str) -> Result<&'a [Value]> {
    let items = as_array(value, what)?;
    if items.len() != len {
        return Err(SaltpackError::framing(
            ErrorKind::WireFormat,
            format!("{} must have {} items, got {}", what, len, items.len()),
        ));
    }
    Ok(items)
}

pub(crate) fn as_bool(value: &Value, what: &str) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        SaltpackError::framing(ErrorKind::WireFormat, format!("{} must be a boolean", what))
    })
}
