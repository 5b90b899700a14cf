//! Push-based incremental transforms
//!
//! A [`Transform`] takes input in fragments of any size through
//! [`Transform::feed`] and hands back whatever output units are ready; the
//! remainder comes out of [`Transform::finish`]. Backpressure is the caller
//! choosing when to feed. Message encoders emit the header as one unit and
//! then one unit per chunk; decoders emit plaintext.

mod encrypt;
mod sign;
mod signcrypt;

pub use encrypt::{DecryptStream, EncryptStream};
pub use sign::{SignDetachedStream, SignStream, VerifyDetachedStream, VerifyStream};
pub use signcrypt::{DesigncryptStream, SigncryptStream};

use rmpv::Value;
use tracing::trace;

use crate::error::{ErrorKind, Result, SaltpackError};
use crate::payload::{self, CHUNK_SIZE};
use crate::wire::Unpacker;

/// An incremental byte transform.
pub trait Transform {
    /// Push more input, returning the output units it completed.
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Signal end of input, returning the remaining output units.
    ///
    /// Calling `feed` or `finish` again afterwards is an error.
    fn finish(&mut self) -> Result<Vec<Vec<u8>>>;
}

impl<T: Transform + ?Sized> Transform for Box<T> {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        (**self).feed(data)
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        (**self).finish()
    }
}

/// Two transforms chained so the first one's output feeds the second.
#[derive(Debug)]
pub struct Pipeline<A, B> {
    first: A,
    second: B,
}

impl<A: Transform, B: Transform> Pipeline<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &A {
        &self.first
    }

    pub fn second(&self) -> &B {
        &self.second
    }

    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: Transform, B: Transform> Transform for Pipeline<A, B> {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for unit in self.first.feed(data)? {
            out.extend(self.second.feed(&unit)?);
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for unit in self.first.finish()? {
            out.extend(self.second.feed(&unit)?);
        }
        out.extend(self.second.finish()?);
        Ok(out)
    }
}

/// Run all of `data` through `stream` and concatenate the output.
pub fn collect<T: Transform + ?Sized>(stream: &mut T, data: &[u8]) -> Result<Vec<u8>> {
    let mut out = stream.feed(data)?.concat();
    for unit in stream.finish()? {
        out.extend_from_slice(&unit);
    }
    Ok(out)
}

/// Split `size`-byte fragments off the front of `buf`; with `flush_all` the
/// short remainder goes too.
pub(crate) fn drain_fragments(buf: &mut Vec<u8>, size: usize, flush_all: bool) -> Vec<Vec<u8>> {
    let size = size.max(1);
    let full = if flush_all {
        buf.len()
    } else {
        buf.len() / size * size
    };
    let fragments = buf[..full].chunks(size).map(<[u8]>::to_vec).collect();
    buf.drain(..full);
    fragments
}

pub(crate) fn ensure_open(finished: bool) -> Result<()> {
    if finished {
        Err(SaltpackError::argument(
            ErrorKind::StreamFinished,
            "stream has already finished",
        ))
    } else {
        Ok(())
    }
}

/// Buffers plaintext into fixed-size chunks for an encoder.
///
/// A full chunk is only sealed once a byte past it has arrived, so the last
/// chunk handed to `finish` is never empty unless the whole input was.
#[derive(Debug)]
pub(crate) struct ChunkWriter {
    chunk_size: usize,
    header: Option<Vec<u8>>,
    buffer: Vec<u8>,
    index: u64,
    finished: bool,
}

impl ChunkWriter {
    pub(crate) fn new(header: Vec<u8>) -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            header: Some(header),
            buffer: Vec::new(),
            index: 0,
            finished: false,
        }
    }

    pub(crate) fn set_chunk_size(&mut self, chunk_size: usize) -> Result<()> {
        self.chunk_size = payload::check_chunk_size(chunk_size)?;
        Ok(())
    }

    pub(crate) fn write(
        &mut self,
        data: &[u8],
        mut seal: impl FnMut(u64, &[u8], bool) -> Result<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        let mut out: Vec<Vec<u8>> = self.header.take().into_iter().collect();
        self.buffer.extend_from_slice(data);
        while self.buffer.len() > self.chunk_size {
            let chunk: Vec<u8> = self.buffer.drain(..self.chunk_size).collect();
            out.push(seal(self.index, &chunk, false)?);
            self.index += 1;
        }
        Ok(out)
    }

    pub(crate) fn end(
        &mut self,
        seal: impl FnOnce(u64, &[u8], bool) -> Result<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        self.finished = true;
        let mut out: Vec<Vec<u8>> = self.header.take().into_iter().collect();
        let last = std::mem::take(&mut self.buffer);
        out.push(seal(self.index, &last, true)?);
        trace!(chunks = self.index + 1, "encoder finished");
        Ok(out)
    }
}

/// Per-message decoding state that can open one payload chunk.
pub(crate) trait OpenChunk {
    fn open_chunk(&self, index: u64, value: &Value) -> Result<(Vec<u8>, bool)>;
}

impl OpenChunk for crate::encryption::DecryptSession {
    fn open_chunk(&self, index: u64, value: &Value) -> Result<(Vec<u8>, bool)> {
        crate::encryption::DecryptSession::open_chunk(self, index, value)
    }
}

impl OpenChunk for crate::signing::VerifySession {
    fn open_chunk(&self, index: u64, value: &Value) -> Result<(Vec<u8>, bool)> {
        crate::signing::VerifySession::open_chunk(self, index, value)
    }
}

impl OpenChunk for crate::signcryption::DesigncryptSession {
    fn open_chunk(&self, index: u64, value: &Value) -> Result<(Vec<u8>, bool)> {
        crate::signcryption::DesigncryptSession::open_chunk(self, index, value)
    }
}

/// Unpacks a header followed by payload chunks, holding back the newest
/// chunk until it is known whether another one follows.
pub(crate) struct ChunkReader<S> {
    unpacker: Unpacker,
    session: Option<S>,
    held: Option<Value>,
    index: u64,
    finished: bool,
}

impl<S: OpenChunk> ChunkReader<S> {
    pub(crate) fn new() -> Self {
        Self {
            unpacker: Unpacker::new(),
            session: None,
            held: None,
            index: 0,
            finished: false,
        }
    }

    pub(crate) fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    pub(crate) fn read(
        &mut self,
        data: &[u8],
        open_header: impl FnOnce(&Value) -> Result<S>,
    ) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        self.unpacker.push(data);

        let mut open_header = Some(open_header);
        let mut out = Vec::new();
        for value in self.unpacker.drain_values()? {
            let Some(session) = &self.session else {
                if let Some(open) = open_header.take() {
                    self.session = Some(open(&value)?);
                }
                continue;
            };
            if let Some(previous) = self.held.replace(value) {
                let (chunk, is_final) = session.open_chunk(self.index, &previous)?;
                payload::check_final_flag(self.index, is_final, false)?;
                self.index += 1;
                if !chunk.is_empty() {
                    out.push(chunk);
                }
            }
        }
        Ok(out)
    }

    pub(crate) fn end(&mut self) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        self.finished = true;
        self.unpacker.finish()?;

        let session = self.session.as_ref().ok_or_else(|| {
            SaltpackError::framing(ErrorKind::TruncatedInput, "input ended before the header")
        })?;
        let last = self.held.take().ok_or_else(payload::no_payload_error)?;
        let (chunk, is_final) = session.open_chunk(self.index, &last)?;
        payload::check_final_flag(self.index, is_final, true)?;
        trace!(chunks = self.index + 1, "decoder finished");
        Ok(if chunk.is_empty() { Vec::new() } else { vec![chunk] })
    }
}
