//! Signcryption (saltpack mode 3)
//!
//! Like encryption, a random payload key encrypts every chunk and each
//! recipient gets the payload key wrapped for them. Unlike encryption, no
//! recipient public key appears on the wire: each entry is tagged with an
//! opaque identifier that only the recipient can recompute. Authenticity
//! comes from an Ed25519 signature sealed inside every payload secretbox
//! instead of per-recipient MACs.
//!
//! Wire layout:
//! - header fields: `[ephemeral_public_key, sender_secretbox, [[recipient_identifier, payload_key_box], ...]]`
//! - payload chunk: `[payload_secretbox, final]`, the secretbox holding `signature || chunk`

use std::fmt;

use rmpv::Value;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::encryption::DecryptedMessage;
use crate::error::{ErrorKind, Result, SaltpackError};
use crate::header::{self, EncodedHeader, HeaderHash, Mode};
use crate::keys::{
    BoxKeyPair, KEY_LEN, PublicKey, SIGNATURE_LEN, SigningKeyPair, check_expected_sender,
};
use crate::payload::{self, CHUNK_SIZE};
use crate::primitives::{self, NONCE_LEN};
use crate::random::{OsRandom, RandomSource};
use crate::wire;

const SHARED_KEY_NONCE: &[u8; NONCE_LEN] = b"saltpack_derived_sboxkey";
const SENDER_KEY_SECRETBOX_NONCE: &[u8; NONCE_LEN] = b"saltpack_sender_key_sbox";
const PAYLOAD_KEY_BOX_NONCE_PREFIX: &[u8; 16] = b"saltpack_recipsb";
const IDENTIFIER_HMAC_KEY: &[u8] = b"saltpack signcryption box key identifier";
const SYMMETRIC_KEY_HMAC_KEY: &[u8] = b"saltpack signcryption derived symmetric key";
const SIGNATURE_PREFIX: &[u8] = b"saltpack encrypted signature\0";

/// Length of a derived recipient identifier.
pub const IDENTIFIER_LEN: usize = 32;

/// Someone a signcrypted message is addressed to.
#[derive(Clone, PartialEq, Eq)]
pub enum SigncryptionRecipient {
    /// A Curve25519 public key; the identifier is derived from it.
    PublicKey(PublicKey),
    /// A pre-shared symmetric key with an application-chosen identifier.
    Symmetric {
        identifier: Vec<u8>,
        key: Zeroizing<[u8; KEY_LEN]>,
    },
}

impl SigncryptionRecipient {
    pub fn symmetric(identifier: impl Into<Vec<u8>>, key: [u8; KEY_LEN]) -> Self {
        SigncryptionRecipient::Symmetric {
            identifier: identifier.into(),
            key: Zeroizing::new(key),
        }
    }
}

impl From<PublicKey> for SigncryptionRecipient {
    fn from(public_key: PublicKey) -> Self {
        SigncryptionRecipient::PublicKey(public_key)
    }
}

impl From<&BoxKeyPair> for SigncryptionRecipient {
    fn from(keypair: &BoxKeyPair) -> Self {
        SigncryptionRecipient::PublicKey(*keypair.public_key())
    }
}

impl fmt::Debug for SigncryptionRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigncryptionRecipient::PublicKey(pk) => {
                f.debug_tuple("PublicKey").field(&hex::encode(pk)).finish()
            }
            SigncryptionRecipient::Symmetric { identifier, .. } => f
                .debug_struct("Symmetric")
                .field("identifier", &hex::encode(identifier))
                .finish_non_exhaustive(),
        }
    }
}

/// A symmetric key the caller can decrypt with.
#[derive(Clone)]
pub struct SymmetricKey {
    pub key: Zeroizing<[u8; KEY_LEN]>,
    /// Identifier the key was registered under; `None` tries every entry.
    pub identifier: Option<Vec<u8>>,
}

impl SymmetricKey {
    pub fn new(key: [u8; KEY_LEN], identifier: Option<Vec<u8>>) -> Self {
        Self {
            key: Zeroizing::new(key),
            identifier,
        }
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("identifier", &self.identifier.as_ref().map(hex::encode))
            .finish_non_exhaustive()
    }
}

/// Every key the caller holds for opening signcrypted messages.
#[derive(Debug, Clone, Default)]
pub struct RecipientKeys {
    pub box_keys: Vec<BoxKeyPair>,
    pub symmetric_keys: Vec<SymmetricKey>,
}

impl RecipientKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_box_key(mut self, keypair: BoxKeyPair) -> Self {
        self.box_keys.push(keypair);
        self
    }

    pub fn with_symmetric_key(mut self, key: SymmetricKey) -> Self {
        self.symmetric_keys.push(key);
        self
    }
}

impl From<&BoxKeyPair> for RecipientKeys {
    fn from(keypair: &BoxKeyPair) -> Self {
        Self::new().with_box_key(keypair.clone())
    }
}

fn payload_key_nonce(index: u64) -> [u8; NONCE_LEN] {
    payload::indexed_nonce(PAYLOAD_KEY_BOX_NONCE_PREFIX, index)
}

/// Shared key between an ephemeral key and a Curve25519 recipient.
fn box_shared_key(their_public: &PublicKey, our_secret: &[u8; KEY_LEN]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    Ok(Zeroizing::new(primitives::box_zero_tail(
        their_public,
        our_secret,
        SHARED_KEY_NONCE,
    )?))
}

/// Shared key between an ephemeral key and a symmetric-key recipient.
fn symmetric_shared_key(
    ephemeral_public: &PublicKey,
    key: &[u8; KEY_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    Ok(Zeroizing::new(primitives::hmac_sha512_256(
        SYMMETRIC_KEY_HMAC_KEY,
        &[ephemeral_public, key],
    )?))
}

fn recipient_identifier(shared_key: &[u8; KEY_LEN], index: u64) -> Result<[u8; IDENTIFIER_LEN]> {
    primitives::hmac_sha512_256(IDENTIFIER_HMAC_KEY, &[shared_key, &payload_key_nonce(index)])
}

fn identifier_matches(shared_key: &[u8; KEY_LEN], index: u64, identifier: &[u8]) -> bool {
    primitives::hmac_sha512_256_verify(
        IDENTIFIER_HMAC_KEY,
        &[shared_key, &payload_key_nonce(index)],
        identifier,
    )
}

/// One entry of the header's recipient list.
#[derive(Debug, Clone)]
pub struct SigncryptedRecipient {
    index: u64,
    identifier: Vec<u8>,
    payload_key_box: Vec<u8>,
}

impl SigncryptedRecipient {
    fn create(
        recipient: &SigncryptionRecipient,
        ephemeral: &BoxKeyPair,
        payload_key: &[u8; KEY_LEN],
        index: u64,
    ) -> Result<Self> {
        let (shared_key, identifier) = match recipient {
            SigncryptionRecipient::PublicKey(pk) => {
                let shared = box_shared_key(pk, ephemeral.secret_key())?;
                let identifier = recipient_identifier(&shared, index)?.to_vec();
                (shared, identifier)
            }
            SigncryptionRecipient::Symmetric { identifier, key } => (
                symmetric_shared_key(ephemeral.public_key(), key)?,
                identifier.clone(),
            ),
        };
        let payload_key_box =
            primitives::secretbox_seal(&shared_key, &payload_key_nonce(index), payload_key)?;
        Ok(Self {
            index,
            identifier,
            payload_key_box,
        })
    }

    fn from_value(value: &Value, index: u64) -> Result<Self> {
        let pair = wire::as_tuple(value, 2, "recipient")?;
        Ok(Self {
            index,
            identifier: wire::as_bytes(&pair[0], "recipient identifier")?.to_vec(),
            payload_key_box: wire::as_bytes(&pair[1], "payload key box")?.to_vec(),
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            wire::bin(&self.identifier),
            wire::bin(&self.payload_key_box),
        ])
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn identifier(&self) -> &[u8] {
        &self.identifier
    }

    fn open_payload_key(&self, shared_key: &[u8; KEY_LEN]) -> Option<Zeroizing<[u8; KEY_LEN]>> {
        let opened = Zeroizing::new(primitives::secretbox_open(
            shared_key,
            &payload_key_nonce(self.index),
            &self.payload_key_box,
        )?);
        <[u8; KEY_LEN]>::try_from(opened.as_slice()).ok().map(Zeroizing::new)
    }
}

/// Header of a signcrypted message.
#[derive(Debug, Clone)]
pub struct SigncryptedMessageHeader {
    ephemeral_public: PublicKey,
    sender_secretbox: Vec<u8>,
    recipients: Vec<SigncryptedRecipient>,
    encoded: EncodedHeader,
}

impl SigncryptedMessageHeader {
    fn create(
        ephemeral: &BoxKeyPair,
        payload_key: &[u8; KEY_LEN],
        sender_public: &PublicKey,
        recipients: &[SigncryptionRecipient],
    ) -> Result<Self> {
        let sender_secretbox =
            primitives::secretbox_seal(payload_key, SENDER_KEY_SECRETBOX_NONCE, sender_public)?;
        let recipients = recipients
            .iter()
            .zip(0u64..)
            .map(|(recipient, index)| {
                SigncryptedRecipient::create(recipient, ephemeral, payload_key, index)
            })
            .collect::<Result<Vec<_>>>()?;

        let encoded = EncodedHeader::build(
            Mode::Signcryption,
            vec![
                wire::bin(ephemeral.public_key()),
                wire::bin(&sender_secretbox),
                Value::Array(recipients.iter().map(SigncryptedRecipient::to_value).collect()),
            ],
        )?;

        Ok(Self {
            ephemeral_public: *ephemeral.public_key(),
            sender_secretbox,
            recipients,
            encoded,
        })
    }

    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let decoded = header::decode_value_for(value, &[Mode::Signcryption])?;
        let fields = &decoded.fields;
        if fields.len() != 3 {
            return Err(SaltpackError::framing(
                ErrorKind::WireFormat,
                format!("signcryption header has {} fields, expected 3", fields.len()),
            ));
        }
        let ephemeral_public = wire::as_fixed::<KEY_LEN>(&fields[0], "ephemeral public key")?;
        let sender_secretbox = wire::as_bytes(&fields[1], "sender secretbox")?.to_vec();
        let recipients = wire::as_array(&fields[2], "recipient list")?
            .iter()
            .zip(0u64..)
            .map(|(value, index)| SigncryptedRecipient::from_value(value, index))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ephemeral_public,
            sender_secretbox,
            recipients,
            encoded: decoded.encoded,
        })
    }

    pub fn hash(&self) -> &HeaderHash {
        self.encoded.hash()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }

    pub fn ephemeral_public_key(&self) -> &PublicKey {
        &self.ephemeral_public
    }

    pub fn recipients(&self) -> &[SigncryptedRecipient] {
        &self.recipients
    }

    /// Find an entry one of `keys` can open, Curve25519 keys first.
    fn open_payload_key(&self, keys: &RecipientKeys) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        for keypair in &keys.box_keys {
            let shared = box_shared_key(&self.ephemeral_public, keypair.secret_key())?;
            for recipient in &self.recipients {
                if !identifier_matches(&shared, recipient.index, &recipient.identifier) {
                    continue;
                }
                debug!(index = recipient.index, "matched recipient by key identifier");
                return recipient.open_payload_key(&shared).ok_or_else(|| {
                    SaltpackError::decryption(
                        ErrorKind::PayloadKeyOpen,
                        format!("recipient entry {} matched but did not open", recipient.index),
                    )
                });
            }
        }

        for symmetric in &keys.symmetric_keys {
            let shared = symmetric_shared_key(&self.ephemeral_public, &symmetric.key)?;
            for recipient in &self.recipients {
                match &symmetric.identifier {
                    Some(identifier) if *identifier != recipient.identifier => continue,
                    Some(_) => {
                        debug!(index = recipient.index, "matched symmetric key identifier");
                        return recipient.open_payload_key(&shared).ok_or_else(|| {
                            SaltpackError::decryption(
                                ErrorKind::PayloadKeyOpen,
                                format!(
                                    "symmetric key entry {} matched but did not open",
                                    recipient.index
                                ),
                            )
                        });
                    }
                    None => {
                        if let Some(payload_key) = recipient.open_payload_key(&shared) {
                            debug!(index = recipient.index, "opened entry with symmetric key");
                            return Ok(payload_key);
                        }
                    }
                }
            }
        }

        Err(SaltpackError::decryption(
            ErrorKind::NotARecipient,
            "none of the supplied keys is a recipient of the message",
        ))
    }

    /// Recover the sender's signing key, `None` when anonymous.
    fn open_sender(&self, payload_key: &[u8; KEY_LEN]) -> Result<Option<PublicKey>> {
        let opened = primitives::secretbox_open(
            payload_key,
            SENDER_KEY_SECRETBOX_NONCE,
            &self.sender_secretbox,
        )
        .ok_or_else(|| {
            SaltpackError::decryption(ErrorKind::SenderKeyOpen, "failed to open sender secretbox")
        })?;
        let sender = <[u8; KEY_LEN]>::try_from(opened.as_slice()).map_err(|_| {
            SaltpackError::framing(
                ErrorKind::WireFormat,
                format!("sender public key must be {} bytes, got {}", KEY_LEN, opened.len()),
            )
        })?;
        Ok((sender != [0u8; KEY_LEN]).then_some(sender))
    }
}

/// One payload chunk of a signcrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigncryptedPayload {
    payload_secretbox: Vec<u8>,
    is_final: bool,
}

impl SigncryptedPayload {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let items = wire::as_tuple(value, 2, "signcrypted payload")?;
        Ok(Self {
            payload_secretbox: wire::as_bytes(&items[0], "payload secretbox")?.to_vec(),
            is_final: wire::as_bool(&items[1], "final flag")?,
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            wire::bin(&self.payload_secretbox),
            Value::Boolean(self.is_final),
        ])
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }
}

/// Nonce for chunk `index`: the header hash prefix with its low bit set to
/// the final flag, then the big-endian index.
fn chunk_nonce(header_hash: &HeaderHash, index: u64, is_final: bool) -> [u8; NONCE_LEN] {
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&header_hash[..16]);
    if is_final {
        prefix[15] |= 0x01;
    } else {
        prefix[15] &= 0xfe;
    }
    payload::indexed_nonce(&prefix, index)
}

fn signature_input(
    header_hash: &HeaderHash,
    nonce: &[u8; NONCE_LEN],
    is_final: bool,
    chunk: &[u8],
) -> Vec<u8> {
    let chunk_hash = primitives::sha512(&[chunk]);
    [
        SIGNATURE_PREFIX,
        &header_hash[..],
        &nonce[..],
        &payload::final_flag_byte(is_final)[..],
        &chunk_hash[..],
    ]
    .concat()
}

/// Sender-side state for one signcrypted message.
pub(crate) struct SigncryptSession {
    header: SigncryptedMessageHeader,
    payload_key: Zeroizing<[u8; KEY_LEN]>,
    sender: Option<SigningKeyPair>,
}

impl SigncryptSession {
    pub(crate) fn new(
        sender: Option<&SigningKeyPair>,
        recipients: &[SigncryptionRecipient],
        random: &mut dyn RandomSource,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(SaltpackError::argument(
                ErrorKind::InvalidOption,
                "at least one recipient is required",
            ));
        }

        let payload_key = random.payload_key();
        let ephemeral = random.ephemeral_keypair();
        let sender_public = sender.map_or([0u8; KEY_LEN], SigningKeyPair::public_key);
        let header =
            SigncryptedMessageHeader::create(&ephemeral, &payload_key, &sender_public, recipients)?;

        debug!(
            recipients = recipients.len(),
            anonymous_sender = sender.is_none(),
            "created signcryption header"
        );

        Ok(Self {
            header,
            payload_key,
            sender: sender.cloned(),
        })
    }

    pub(crate) fn header(&self) -> &SigncryptedMessageHeader {
        &self.header
    }

    /// Sign and encrypt one chunk, then serialize it.
    pub(crate) fn seal_chunk(&self, index: u64, chunk: &[u8], is_final: bool) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(self.header.hash(), index, is_final);
        let signature = match &self.sender {
            Some(sender) => sender.sign(&signature_input(self.header.hash(), &nonce, is_final, chunk)),
            None => [0u8; SIGNATURE_LEN],
        };

        let mut signed = Zeroizing::new(Vec::with_capacity(SIGNATURE_LEN + chunk.len()));
        signed.extend_from_slice(&signature);
        signed.extend_from_slice(chunk);
        let payload_secretbox = primitives::secretbox_seal(&self.payload_key, &nonce, &signed)?;

        trace!(index, is_final, len = chunk.len(), "signcrypted chunk");
        wire::pack(
            &SigncryptedPayload {
                payload_secretbox,
                is_final,
            }
            .to_value(),
        )
    }
}

/// Recipient-side state for one signcrypted message.
pub(crate) struct DesigncryptSession {
    header: SigncryptedMessageHeader,
    payload_key: Zeroizing<[u8; KEY_LEN]>,
    sender: Option<PublicKey>,
}

impl DesigncryptSession {
    pub(crate) fn open(
        header_value: &Value,
        keys: &RecipientKeys,
        expected_sender: Option<&PublicKey>,
    ) -> Result<Self> {
        let header = SigncryptedMessageHeader::from_value(header_value)?;
        let payload_key = header.open_payload_key(keys)?;
        let sender = header.open_sender(&payload_key)?;
        check_expected_sender(expected_sender, sender.as_ref())?;

        debug!(
            recipients = header.recipients().len(),
            anonymous_sender = sender.is_none(),
            "opened signcryption header"
        );

        Ok(Self {
            header,
            payload_key,
            sender,
        })
    }

    pub(crate) fn sender(&self) -> Option<PublicKey> {
        self.sender
    }

    /// Decrypt and verify chunk `index`, returning its plaintext and final flag.
    pub(crate) fn open_chunk(&self, index: u64, value: &Value) -> Result<(Vec<u8>, bool)> {
        let payload = SigncryptedPayload::from_value(value)?;
        let nonce = chunk_nonce(self.header.hash(), index, payload.is_final);

        let opened = Zeroizing::new(
            primitives::secretbox_open(&self.payload_key, &nonce, &payload.payload_secretbox)
                .ok_or_else(|| {
                    SaltpackError::decryption(
                        ErrorKind::PayloadOpen,
                        format!("failed to open payload secretbox for chunk {}", index),
                    )
                })?,
        );
        if opened.len() < SIGNATURE_LEN {
            return Err(SaltpackError::framing(
                ErrorKind::WireFormat,
                format!("chunk {} is too short to hold a signature", index),
            ));
        }
        let (signature, chunk) = opened.split_at(SIGNATURE_LEN);

        if let Some(sender) = &self.sender {
            let mut sig = [0u8; SIGNATURE_LEN];
            sig.copy_from_slice(signature);
            let input = signature_input(self.header.hash(), &nonce, payload.is_final, chunk);
            primitives::verify_signature(sender, &input, &sig)
                .map_err(|e| e.with_context(format!("signature on chunk {} is invalid", index)))?;
        }

        trace!(index, is_final = payload.is_final, len = chunk.len(), "designcrypted chunk");
        Ok((chunk.to_vec(), payload.is_final))
    }
}

/// Signcrypt `plaintext` for `recipients`; `None` as sender sends anonymously.
pub fn signcrypt(
    plaintext: &[u8],
    sender: Option<&SigningKeyPair>,
    recipients: &[SigncryptionRecipient],
) -> Result<Vec<u8>> {
    signcrypt_with(plaintext, sender, recipients, &mut OsRandom)
}

/// Like [`signcrypt`] but drawing key material from `random`.
pub fn signcrypt_with(
    plaintext: &[u8],
    sender: Option<&SigningKeyPair>,
    recipients: &[SigncryptionRecipient],
    random: &mut dyn RandomSource,
) -> Result<Vec<u8>> {
    let session = SigncryptSession::new(sender, recipients, random)?;
    let mut out = session.header().as_bytes().to_vec();
    for ((chunk, is_final), index) in payload::split_chunks(plaintext, CHUNK_SIZE)
        .into_iter()
        .zip(0u64..)
    {
        out.extend_from_slice(&session.seal_chunk(index, chunk, is_final)?);
    }
    Ok(out)
}

/// Open a complete signcrypted message with any of `keys`.
pub fn designcrypt(
    message: &[u8],
    keys: &RecipientKeys,
    expected_sender: Option<&PublicKey>,
) -> Result<DecryptedMessage> {
    let values = wire::unpack_all(message)?;
    let (header_value, chunks) = values
        .split_first()
        .ok_or_else(|| SaltpackError::framing(ErrorKind::TruncatedInput, "message is empty"))?;
    let session = DesigncryptSession::open(header_value, keys, expected_sender)?;
    if chunks.is_empty() {
        return Err(payload::no_payload_error());
    }

    let mut plaintext = Vec::new();
    let last = chunks.len() - 1;
    for (position, value) in chunks.iter().enumerate() {
        let index = position as u64;
        let (chunk, is_final) = session.open_chunk(index, value)?;
        payload::check_final_flag(index, is_final, position == last)?;
        plaintext.extend_from_slice(&chunk);
    }

    Ok(DecryptedMessage {
        plaintext,
        sender: session.sender(),
    })
}
