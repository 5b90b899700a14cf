use crate::encryption::{DecryptSession, EncryptSession, Recipient};
use crate::error::Result;
use crate::keys::{BoxKeyPair, PublicKey};
use crate::random::{OsRandom, RandomSource};

use super::{ChunkReader, ChunkWriter, Transform};

/// Incremental encryption: emits the header, then one unit per chunk.
pub struct EncryptStream {
    session: EncryptSession,
    writer: ChunkWriter,
}

impl EncryptStream {
    pub fn new(sender: Option<&BoxKeyPair>, recipients: &[Recipient]) -> Result<Self> {
        Self::with_random(sender, recipients, &mut OsRandom)
    }

    pub fn with_random(
        sender: Option<&BoxKeyPair>,
        recipients: &[Recipient],
        random: &mut dyn RandomSource,
    ) -> Result<Self> {
        let session = EncryptSession::new(sender, recipients, random)?;
        let writer = ChunkWriter::new(session.header().as_bytes().to_vec());
        Ok(Self { session, writer })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.writer.set_chunk_size(chunk_size)?;
        Ok(self)
    }
}

impl Transform for EncryptStream {
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

/// Incremental decryption: emits plaintext once each chunk is known not to
/// be followed by a forbidden successor.
pub struct DecryptStream {
    keypair: BoxKeyPair,
    expected_sender: Option<PublicKey>,
    reader: ChunkReader<DecryptSession>,
}

impl DecryptStream {
    pub fn new(keypair: &BoxKeyPair, expected_sender: Option<&PublicKey>) -> Self {
        Self {
            keypair: keypair.clone(),
            expected_sender: expected_sender.copied(),
            reader: ChunkReader::new(),
        }
    }

    /// Sender of the message once the header has been read, `None` while
    /// unknown or when the sender is anonymous.
    pub fn sender(&self) -> Option<PublicKey> {
        self.reader.session().and_then(DecryptSession::sender)
    }
}

impl Transform for DecryptStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let keypair = &self.keypair;
        let expected = self.expected_sender.as_ref();
        self.reader
            .read(data, |header| DecryptSession::open(header, keypair, expected))
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        self.reader.end()
    }
}
