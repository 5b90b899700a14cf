//! Chunking rules shared by every message kind
//!
//! Plaintext is cut into chunks of at most [`CHUNK_SIZE`] bytes. Every
//! message has at least one chunk and exactly the last one is final; an
//! empty plaintext becomes a single empty final chunk.

use crate::error::{ErrorKind, Result, SaltpackError};
use crate::primitives::NONCE_LEN;

/// Plaintext bytes carried by each payload chunk.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Split `data` into `(chunk, is_final)` pairs.
pub(crate) fn split_chunks(data: &[u8], chunk_size: usize) -> Vec<(&[u8], bool)> {
    if data.is_empty() {
        return vec![(data, true)];
    }
    let count = data.len().div_ceil(chunk_size);
    data.chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| (chunk, i + 1 == count))
        .collect()
}

/// Validate a configurable chunk size.
pub(crate) fn check_chunk_size(chunk_size: usize) -> Result<usize> {
    if chunk_size == 0 {
        return Err(SaltpackError::argument(
            ErrorKind::InvalidOption,
            "chunk size must be positive",
        ));
    }
    Ok(chunk_size)
}

/// `prefix || big-endian index`, the nonce layout used for payload and
/// recipient boxes.
pub(crate) fn indexed_nonce(prefix: &[u8; 16], index: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..16].copy_from_slice(prefix);
    nonce[16..].copy_from_slice(&index.to_be_bytes());
    nonce
}

pub(crate) fn final_flag_byte(is_final: bool) -> [u8; 1] {
    [u8::from(is_final)]
}

/// Check the final flag of chunk `index` against whether it is the last one.
pub(crate) fn check_final_flag(index: u64, is_final: bool, is_last: bool) -> Result<()> {
    match (is_final, is_last) {
        (true, false) => Err(SaltpackError::final_flag(
            ErrorKind::FinalChunkExtended,
            format!("chunk {} is marked final but more chunks follow", index),
        )),
        (false, true) => Err(SaltpackError::final_flag(
            ErrorKind::FinalChunkMissing,
            format!("message ended at chunk {}, which is not marked final", index),
        )),
        _ => Ok(()),
    }
}

pub(crate) fn no_payload_error() -> SaltpackError {
    SaltpackError::final_flag(ErrorKind::NoPayload, "message has no payload chunks")
}
