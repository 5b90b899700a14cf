use rmpv::Value;
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::error::{ErrorKind, Result, SaltpackError};
use crate::keys::{PublicKey, SigningKeyPair};
use crate::random::{OsRandom, RandomSource};
use crate::signing::{SignSession, VerifySession, detached_hasher, finish_hasher};
use crate::wire;

use super::{ChunkReader, ChunkWriter, Transform, ensure_open};

/// Incremental attached signing.
pub struct SignStream {
    session: SignSession,
    writer: ChunkWriter,
}

impl SignStream {
    pub fn new(signer: &SigningKeyPair) -> Result<Self> {
        Self::with_random(signer, &mut OsRandom)
    }

    pub fn with_random(signer: &SigningKeyPair, random: &mut dyn RandomSource) -> Result<Self> {
        let session = SignSession::new(signer, true, random)?;
        let writer = ChunkWriter::new(session.header().as_bytes().to_vec());
        Ok(Self { session, writer })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.writer.set_chunk_size(chunk_size)?;
        Ok(self)
    }
}

impl Transform for SignStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let session = &self.session;
        self.writer
            .write(data, |index, chunk, is_final| session.seal_chunk(index, chunk, is_final))
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        let session = &self.session;
        self.writer
            .end(|index, chunk, is_final| session.seal_chunk(index, chunk, is_final))
    }
}

/// Incremental attached verification, emitting verified chunk contents.
pub struct VerifyStream {
    expected_signer: Option<PublicKey>,
    reader: ChunkReader<VerifySession>,
}

impl VerifyStream {
    pub fn new(expected_signer: Option<&PublicKey>) -> Self {
        Self {
            expected_signer: expected_signer.copied(),
            reader: ChunkReader::new(),
        }
    }

    /// Signer named in the header, once it has been read.
    pub fn signer(&self) -> Option<PublicKey> {
        self.reader.session().map(VerifySession::signer)
    }
}

impl Transform for VerifyStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let expected = self.expected_signer.as_ref();
        self.reader
            .read(data, |header| VerifySession::open(header, true, expected))
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        self.reader.end()
    }
}

/// Hashes input as it arrives and emits the header and signature at finish.
pub struct SignDetachedStream {
    session: SignSession,
    hasher: Option<Sha512>,
}

impl SignDetachedStream {
    pub fn new(signer: &SigningKeyPair) -> Result<Self> {
        Self::with_random(signer, &mut OsRandom)
    }

    pub fn with_random(signer: &SigningKeyPair, random: &mut dyn RandomSource) -> Result<Self> {
        let session = SignSession::new(signer, false, random)?;
        let hasher = Some(detached_hasher(session.header()));
        Ok(Self { session, hasher })
    }
}

impl Transform for SignDetachedStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.hasher.is_none())?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(data);
        }
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        let hasher = self.hasher.take().ok_or_else(|| {
            SaltpackError::argument(ErrorKind::StreamFinished, "stream has already finished")
        })?;
        let signature = self.session.seal_detached(&finish_hasher(hasher))?;
        Ok(vec![self.session.header().as_bytes().to_vec(), signature])
    }
}

/// Verifies data against a detached signature supplied up front.
///
/// Emits nothing; `finish` fails unless the signature covers exactly the
/// bytes that were fed.
pub struct VerifyDetachedStream {
    session: VerifySession,
    signature: Value,
    hasher: Option<Sha512>,
}

impl VerifyDetachedStream {
    pub fn new(signature: &[u8], expected_signer: Option<&PublicKey>) -> Result<Self> {
        let mut values = wire::unpack_all(signature)?;
        if values.len() != 2 {
            return Err(SaltpackError::framing(
                ErrorKind::WireFormat,
                format!("detached signature has {} values, expected 2", values.len()),
            ));
        }
        let signature = values.remove(1);
        let session = VerifySession::open(&values[0], false, expected_signer)?;
        let hasher = Some(detached_hasher(session.header()));
        Ok(Self {
            session,
            signature,
            hasher,
        })
    }

    pub fn signer(&self) -> PublicKey {
        self.session.signer()
    }
}

impl Transform for VerifyDetachedStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.hasher.is_none())?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(data);
        }
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        let hasher = self.hasher.take().ok_or_else(|| {
            SaltpackError::argument(ErrorKind::StreamFinished, "stream has already finished")
        })?;
        self.session
            .verify_detached(&self.signature, &finish_hasher(hasher))?;
        debug!("detached signature verified");
        Ok(Vec::new())
    }
}
