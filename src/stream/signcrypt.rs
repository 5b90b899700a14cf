use crate::error::Result;
use crate::keys::{PublicKey, SigningKeyPair};
use crate::random::{OsRandom, RandomSource};
use crate::signcryption::{
    DesigncryptSession, RecipientKeys, SigncryptSession, SigncryptionRecipient,
};

use super::{ChunkReader, ChunkWriter, Transform};

/// Incremental signcryption.
pub struct SigncryptStream {
    session: SigncryptSession,
    writer: ChunkWriter,
}

impl SigncryptStream {
    pub fn new(
        sender: Option<&SigningKeyPair>,
        recipients: &[SigncryptionRecipient],
    ) -> Result<Self> {
        Self::with_random(sender, recipients, &mut OsRandom)
    }

    pub fn with_random(
        sender: Option<&SigningKeyPair>,
        recipients: &[SigncryptionRecipient],
        random: &mut dyn RandomSource,
    ) -> Result<Self> {
        let session = SigncryptSession::new(sender, recipients, random)?;
        let writer = ChunkWriter::new(session.header().as_bytes().to_vec());
        Ok(Self { session, writer })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.writer.set_chunk_size(chunk_size)?;
        Ok(self)
    }
}

impl Transform for SigncryptStream {
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

/// Incremental designcryption.
pub struct DesigncryptStream {
    keys: RecipientKeys,
    expected_sender: Option<PublicKey>,
    reader: ChunkReader<DesigncryptSession>,
}

impl DesigncryptStream {
    pub fn new(keys: RecipientKeys, expected_sender: Option<&PublicKey>) -> Self {
        Self {
            keys,
            expected_sender: expected_sender.copied(),
            reader: ChunkReader::new(),
        }
    }

    /// Sender once the header has been read; `None` also for anonymous senders.
    pub fn sender(&self) -> Option<PublicKey> {
        self.reader.session().and_then(DesigncryptSession::sender)
    }
}

impl Transform for DesigncryptStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let keys = &self.keys;
        let expected = self.expected_sender.as_ref();
        self.reader
            .read(data, |header| DesigncryptSession::open(header, keys, expected))
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        self.reader.end()
    }
}
