//! The envelope every saltpack message starts with
//!
//! A header is the MessagePack array
//! `["saltpack", [2, 0], mode, ...mode-specific fields]`. It is serialized
//! once, the SHA-512 of those inner bytes becomes the header hash, and the
//! inner bytes are then wrapped as a single MessagePack `bin` for the wire.
//! Receivers hash the inner bytes exactly as they arrived, never a
//! re-serialization.

use std::fmt;

use rmpv::Value;
use tracing::trace;

use crate::error::{ErrorKind, Result, SaltpackError};
use crate::primitives::{HASH_LEN, sha512};
use crate::wire;

/// Format tag at the start of every header.
pub const FORMAT_NAME: &str = "saltpack";

/// Major and minor version this crate reads and writes.
pub const VERSION: (u64, u64) = (2, 0);

/// SHA-512 of a header's inner serialization.
pub type HeaderHash = [u8; HASH_LEN];

/// Message kind recorded in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Encryption = 0,
    AttachedSigning = 1,
    DetachedSigning = 2,
    Signcryption = 3,
}

impl Mode {
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            0 => Some(Mode::Encryption),
            1 => Some(Mode::AttachedSigning),
            2 => Some(Mode::DetachedSigning),
            3 => Some(Mode::Signcryption),
            _ => None,
        }
    }

    pub fn as_wire(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Encryption => "encryption",
            Mode::AttachedSigning => "attached signing",
            Mode::DetachedSigning => "detached signing",
            Mode::Signcryption => "signcryption",
        };
        f.write_str(name)
    }
}

/// A header in its final wire form, with its hash computed once.
#[derive(Clone)]
pub struct EncodedHeader {
    inner: Vec<u8>,
    hash: HeaderHash,
    wrapped: Vec<u8>,
}

impl EncodedHeader {
    /// Serialize a new header of the given mode followed by `fields`.
    pub(crate) fn build(mode: Mode, fields: Vec<Value>) -> Result<Self> {
        let mut items = Vec::with_capacity(3 + fields.len());
        items.push(Value::from(FORMAT_NAME));
        items.push(Value::Array(vec![
            Value::from(VERSION.0),
            Value::from(VERSION.1),
        ]));
        items.push(Value::from(mode.as_wire()));
        items.extend(fields);

        let inner = wire::pack(&Value::Array(items))?;
        Self::from_inner(inner)
    }

    fn from_inner(inner: Vec<u8>) -> Result<Self> {
        let hash = sha512(&[&inner]);
        let wrapped = wire::pack(&wire::bin(&inner))?;
        Ok(Self {
            inner,
            hash,
            wrapped,
        })
    }

    pub fn hash(&self) -> &HeaderHash {
        &self.hash
    }

    /// The inner serialization the hash covers.
    pub fn inner(&self) -> &[u8] {
        &self.inner
    }

    /// The header as it appears on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.wrapped
    }
}

impl fmt::Debug for EncodedHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedHeader")
            .field("hash", &hex::encode(self.hash))
            .field("len", &self.wrapped.len())
            .finish()
    }
}

/// A header read from the wire, before mode-specific interpretation.
#[derive(Debug, Clone)]
pub struct DecodedHeader {
    pub encoded: EncodedHeader,
    pub mode: Mode,
    /// Everything after the mode field.
    pub fields: Vec<Value>,
}

/// Decode a wire header, returning its hash and mode-specific fields.
pub fn decode(bytes: &[u8]) -> Result<(HeaderHash, Vec<Value>)> {
    let outer = wire::unpack_exact(bytes)?;
    let decoded = decode_value(&outer)?;
    Ok((*decoded.encoded.hash(), decoded.fields))
}

/// Decode the first value of a message, which must be the wrapped header.
pub(crate) fn decode_value(outer: &Value) -> Result<DecodedHeader> {
    let inner = wire::as_bytes(outer, "wrapped header").map_err(|_| {
        SaltpackError::framing(
            ErrorKind::WireFormat,
            "header must be a serialized array wrapped in binary data",
        )
    })?;
    let encoded = EncodedHeader::from_inner(inner.to_vec())?;
    let value = wire::unpack_exact(inner)?;
    let items = wire::as_array(&value, "header")?;
    if items.len() < 3 {
        return Err(SaltpackError::framing(
            ErrorKind::WireFormat,
            format!("header has {} items, expected at least 3", items.len()),
        ));
    }

    if items[0].as_str() != Some(FORMAT_NAME) {
        return Err(SaltpackError::framing(
            ErrorKind::FormatTag,
            "input is not a saltpack message (wrong format name)",
        ));
    }

    let version = wire::as_tuple(&items[1], 2, "header version")?;
    let (major, minor) = (version[0].as_u64(), version[1].as_u64());
    if (major, minor) != (Some(VERSION.0), Some(VERSION.1)) {
        return Err(SaltpackError::framing(
            ErrorKind::UnsupportedVersion,
            format!("unsupported saltpack version {}.{}", version[0], version[1]),
        ));
    }

    let mode = items[2]
        .as_u64()
        .and_then(Mode::from_wire)
        .ok_or_else(|| {
            SaltpackError::framing(
                ErrorKind::UnexpectedMode,
                format!("unknown header mode {}", items[2]),
            )
        })?;

    trace!(%mode, header_len = inner.len(), "decoded saltpack header");

    Ok(DecodedHeader {
        encoded,
        mode,
        fields: items[3..].to_vec(),
    })
}

/// Decode a header and insist on one of the `expected` modes.
pub(crate) fn decode_value_for(outer: &Value, expected: &[Mode]) -> Result<DecodedHeader> {
    let decoded = decode_value(outer)?;
    if !expected.contains(&decoded.mode) {
        return Err(SaltpackError::framing(
            ErrorKind::UnexpectedMode,
            format!("expected a {} message, found {}", expected[0], decoded.mode),
        ));
    }
    Ok(decoded)
}
