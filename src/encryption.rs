//! Multi-recipient public-key encryption (saltpack mode 0)
//!
//! A random payload key encrypts every chunk. Each recipient gets that key
//! boxed from a fresh ephemeral key pair, and each chunk carries one
//! authenticator per recipient, keyed with a MAC key that only the sender
//! and that recipient can derive. The sender's long-term public key travels
//! inside a secretbox under the payload key; an anonymous sender puts the
//! ephemeral public key there instead.
//!
//! Wire layout:
//! - header fields: `[ephemeral_public_key, sender_secretbox, [[recipient_public_key | nil, payload_key_box], ...]]`
//! - payload chunk: `[final, [authenticator, ...], payload_secretbox]`

use rmpv::Value;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::error::{ErrorKind, Result, SaltpackError};
use crate::header::{self, EncodedHeader, HeaderHash, Mode};
use crate::keys::{BoxKeyPair, KEY_LEN, PublicKey, check_expected_sender};
use crate::payload::{self, CHUNK_SIZE};
use crate::primitives::{self, NONCE_LEN};
use crate::random::{OsRandom, RandomSource};
use crate::wire;

const SENDER_KEY_SECRETBOX_NONCE: &[u8; NONCE_LEN] = b"saltpack_sender_key_sbox";
const PAYLOAD_KEY_BOX_NONCE_PREFIX: &[u8; 16] = b"saltpack_recipsb";
const PAYLOAD_NONCE_PREFIX: &[u8; 16] = b"saltpack_ploadsb";

/// Length of a per-recipient chunk authenticator.
pub const AUTHENTICATOR_LEN: usize = 32;

/// A recipient's public key, optionally left off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
    public_key: PublicKey,
    anonymous: bool,
}

impl Recipient {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            anonymous: false,
        }
    }

    /// A recipient whose public key is replaced by nil in the header.
    pub fn anonymous(public_key: PublicKey) -> Self {
        Self {
            public_key,
            anonymous: true,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }
}

impl From<PublicKey> for Recipient {
    fn from(public_key: PublicKey) -> Self {
        Self::new(public_key)
    }
}

impl From<&BoxKeyPair> for Recipient {
    fn from(keypair: &BoxKeyPair) -> Self {
        Self::new(*keypair.public_key())
    }
}

/// One entry of the header's recipient list.
#[derive(Debug, Clone)]
pub struct EncryptedRecipient {
    index: u64,
    public_key: Option<PublicKey>,
    payload_key_box: Vec<u8>,
}

impl EncryptedRecipient {
    fn create(
        recipient: &Recipient,
        ephemeral: &BoxKeyPair,
        payload_key: &[u8; KEY_LEN],
        index: u64,
    ) -> Result<Self> {
        let payload_key_box = primitives::box_seal(
            recipient.public_key(),
            ephemeral.secret_key(),
            &payload_key_nonce(index),
            payload_key,
        )?;
        Ok(Self {
            index,
            public_key: (!recipient.is_anonymous()).then_some(*recipient.public_key()),
            payload_key_box,
        })
    }

    fn from_value(value: &Value, index: u64) -> Result<Self> {
        let pair = wire::as_tuple(value, 2, "recipient")?;
        let public_key = match &pair[0] {
            Value::Nil => None,
            other => Some(wire::as_fixed::<KEY_LEN>(other, "recipient public key")?),
        };
        let payload_key_box = wire::as_bytes(&pair[1], "payload key box")?.to_vec();
        Ok(Self {
            index,
            public_key,
            payload_key_box,
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            self.public_key.map_or(Value::Nil, |pk| wire::bin(&pk)),
            wire::bin(&self.payload_key_box),
        ])
    }

    /// Position in the recipient list, baked into every nonce for this recipient.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// The recipient's public key, or `None` for an anonymous entry.
    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    fn open_payload_key(
        &self,
        ephemeral_public: &PublicKey,
        keypair: &BoxKeyPair,
    ) -> Option<Zeroizing<[u8; KEY_LEN]>> {
        let opened = Zeroizing::new(primitives::box_open(
            ephemeral_public,
            keypair.secret_key(),
            &payload_key_nonce(self.index),
            &self.payload_key_box,
        )?);
        let key = <[u8; KEY_LEN]>::try_from(opened.as_slice()).ok()?;
        Some(Zeroizing::new(key))
    }
}

fn payload_key_nonce(index: u64) -> [u8; NONCE_LEN] {
    payload::indexed_nonce(PAYLOAD_KEY_BOX_NONCE_PREFIX, index)
}

fn payload_nonce(index: u64) -> [u8; NONCE_LEN] {
    payload::indexed_nonce(PAYLOAD_NONCE_PREFIX, index)
}

/// Derive the MAC key for recipient `index` from two box key agreements.
///
/// The sender passes `(recipient, sender secret)` and
/// `(recipient, ephemeral secret)`; the recipient passes
/// `(sender, recipient secret)` and `(ephemeral, recipient secret)`. Both
/// sides land on the same key.
fn derive_mac_key(
    header_hash: &HeaderHash,
    index: u64,
    long_term: (&PublicKey, &[u8; KEY_LEN]),
    ephemeral: (&PublicKey, &[u8; KEY_LEN]),
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..16].copy_from_slice(&header_hash[..16]);
    nonce[16..].copy_from_slice(&index.to_be_bytes());

    nonce[15] &= 0xfe;
    let first = Zeroizing::new(primitives::box_zero_tail(long_term.0, long_term.1, &nonce)?);
    nonce[15] |= 0x01;
    let second = Zeroizing::new(primitives::box_zero_tail(ephemeral.0, ephemeral.1, &nonce)?);

    let digest = Zeroizing::new(primitives::sha512(&[&first[..], &second[..]]));
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest[..KEY_LEN]);
    Ok(key)
}

/// Header of an encrypted message.
#[derive(Debug, Clone)]
pub struct EncryptedMessageHeader {
    ephemeral_public: PublicKey,
    sender_secretbox: Vec<u8>,
    recipients: Vec<EncryptedRecipient>,
    encoded: EncodedHeader,
}

impl EncryptedMessageHeader {
    fn create(
        ephemeral: &BoxKeyPair,
        payload_key: &[u8; KEY_LEN],
        sender_public: &PublicKey,
        recipients: &[Recipient],
    ) -> Result<Self> {
        let sender_secretbox =
            primitives::secretbox_seal(payload_key, SENDER_KEY_SECRETBOX_NONCE, sender_public)?;
        let recipients = recipients
            .iter()
            .zip(0u64..)
            .map(|(recipient, index)| {
                EncryptedRecipient::create(recipient, ephemeral, payload_key, index)
            })
            .collect::<Result<Vec<_>>>()?;

        let encoded = EncodedHeader::build(
            Mode::Encryption,
            vec![
                wire::bin(ephemeral.public_key()),
                wire::bin(&sender_secretbox),
                Value::Array(recipients.iter().map(EncryptedRecipient::to_value).collect()),
            ],
        )?;

        Ok(Self {
            ephemeral_public: *ephemeral.public_key(),
            sender_secretbox,
            recipients,
            encoded,
        })
    }

    /// Parse the header from the first value of a message.
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let decoded = header::decode_value_for(value, &[Mode::Encryption])?;
        let fields = &decoded.fields;
        if fields.len() != 3 {
            return Err(SaltpackError::framing(
                ErrorKind::WireFormat,
                format!("encryption header has {} fields, expected 3", fields.len()),
            ));
        }
        let ephemeral_public = wire::as_fixed::<KEY_LEN>(&fields[0], "ephemeral public key")?;
        let sender_secretbox = wire::as_bytes(&fields[1], "sender secretbox")?.to_vec();
        let recipients = wire::as_array(&fields[2], "recipient list")?
            .iter()
            .zip(0u64..)
            .map(|(value, index)| EncryptedRecipient::from_value(value, index))
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

    /// The header exactly as it goes on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }

    pub fn ephemeral_public_key(&self) -> &PublicKey {
        &self.ephemeral_public
    }

    pub fn recipients(&self) -> &[EncryptedRecipient] {
        &self.recipients
    }

    /// Find our entry and open the payload key with it.
    fn open_payload_key(
        &self,
        keypair: &BoxKeyPair,
    ) -> Result<(Zeroizing<[u8; KEY_LEN]>, &EncryptedRecipient)> {
        let mut named_but_failed = false;
        for recipient in &self.recipients {
            if let Some(pk) = recipient.public_key() {
                if pk != keypair.public_key() {
                    continue;
                }
            }
            match recipient.open_payload_key(&self.ephemeral_public, keypair) {
                Some(key) => return Ok((key, recipient)),
                None => named_but_failed |= recipient.public_key().is_some(),
            }
        }

        if named_but_failed {
            Err(SaltpackError::decryption(
                ErrorKind::PayloadKeyOpen,
                "recipient entry for this key could not be opened",
            ))
        } else {
            Err(SaltpackError::decryption(
                ErrorKind::NotARecipient,
                "this key is not a recipient of the message",
            ))
        }
    }

    fn open_sender(&self, payload_key: &[u8; KEY_LEN]) -> Result<PublicKey> {
        let opened = primitives::secretbox_open(
            payload_key,
            SENDER_KEY_SECRETBOX_NONCE,
            &self.sender_secretbox,
        )
        .ok_or_else(|| {
            SaltpackError::decryption(ErrorKind::SenderKeyOpen, "failed to open sender secretbox")
        })?;
        <[u8; KEY_LEN]>::try_from(opened.as_slice()).map_err(|_| {
            SaltpackError::framing(
                ErrorKind::WireFormat,
                format!("sender public key must be {} bytes, got {}", KEY_LEN, opened.len()),
            )
        })
    }
}

/// One payload chunk of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    is_final: bool,
    authenticators: Vec<[u8; AUTHENTICATOR_LEN]>,
    payload_secretbox: Vec<u8>,
}

impl EncryptedPayload {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let items = wire::as_tuple(value, 3, "encrypted payload")?;
        let is_final = wire::as_bool(&items[0], "final flag")?;
        let authenticators = wire::as_array(&items[1], "authenticator list")?
            .iter()
            .map(|v| wire::as_fixed::<AUTHENTICATOR_LEN>(v, "authenticator"))
            .collect::<Result<Vec<_>>>()?;
        let payload_secretbox = wire::as_bytes(&items[2], "payload secretbox")?.to_vec();
        Ok(Self {
            is_final,
            authenticators,
            payload_secretbox,
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Boolean(self.is_final),
            Value::Array(self.authenticators.iter().map(|a| wire::bin(a)).collect()),
            wire::bin(&self.payload_secretbox),
        ])
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }
}

fn authenticator_hash(
    header_hash: &HeaderHash,
    nonce: &[u8; NONCE_LEN],
    is_final: bool,
    payload_secretbox: &[u8],
) -> [u8; 64] {
    primitives::sha512(&[
        header_hash,
        nonce,
        &payload::final_flag_byte(is_final),
        payload_secretbox,
    ])
}

/// Sender-side state for one encrypted message.
pub(crate) struct EncryptSession {
    header: EncryptedMessageHeader,
    payload_key: Zeroizing<[u8; KEY_LEN]>,
    mac_keys: Vec<Zeroizing<[u8; KEY_LEN]>>,
}

impl EncryptSession {
    pub(crate) fn new(
        sender: Option<&BoxKeyPair>,
        recipients: &[Recipient],
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
        let sender = sender.unwrap_or(&ephemeral);

        let header = EncryptedMessageHeader::create(
            &ephemeral,
            &payload_key,
            sender.public_key(),
            recipients,
        )?;

        let mac_keys = recipients
            .iter()
            .zip(0u64..)
            .map(|(recipient, index)| {
                derive_mac_key(
                    header.hash(),
                    index,
                    (recipient.public_key(), sender.secret_key()),
                    (recipient.public_key(), ephemeral.secret_key()),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            recipients = recipients.len(),
            anonymous_sender = sender.public_key() == ephemeral.public_key(),
            "created encryption header"
        );

        Ok(Self {
            header,
            payload_key,
            mac_keys,
        })
    }

    pub(crate) fn header(&self) -> &EncryptedMessageHeader {
        &self.header
    }

    /// Encrypt one chunk and serialize it.
    pub(crate) fn seal_chunk(&self, index: u64, chunk: &[u8], is_final: bool) -> Result<Vec<u8>> {
        let nonce = payload_nonce(index);
        let payload_secretbox = primitives::secretbox_seal(&self.payload_key, &nonce, chunk)?;
        let hash = authenticator_hash(self.header.hash(), &nonce, is_final, &payload_secretbox);
        let authenticators = self
            .mac_keys
            .iter()
            .map(|key| primitives::hmac_sha512_256(&key[..], &[&hash]))
            .collect::<Result<Vec<_>>>()?;

        trace!(index, is_final, len = chunk.len(), "sealed encrypted chunk");

        wire::pack(
            &EncryptedPayload {
                is_final,
                authenticators,
                payload_secretbox,
            }
            .to_value(),
        )
    }
}

/// Recipient-side state for one encrypted message.
pub(crate) struct DecryptSession {
    header: EncryptedMessageHeader,
    payload_key: Zeroizing<[u8; KEY_LEN]>,
    mac_key: Zeroizing<[u8; KEY_LEN]>,
    recipient_index: usize,
    sender: Option<PublicKey>,
}

impl DecryptSession {
    pub(crate) fn open(
        header_value: &Value,
        keypair: &BoxKeyPair,
        expected_sender: Option<&PublicKey>,
    ) -> Result<Self> {
        let header = EncryptedMessageHeader::from_value(header_value)?;
        let (payload_key, recipient) = header.open_payload_key(keypair)?;
        let sender_public = header.open_sender(&payload_key)?;

        let mac_key = derive_mac_key(
            header.hash(),
            recipient.index(),
            (&sender_public, keypair.secret_key()),
            (header.ephemeral_public_key(), keypair.secret_key()),
        )?;
        let recipient_index = usize::try_from(recipient.index())
            .map_err(|_| SaltpackError::internal("recipient index out of range"))?;

        let sender = (sender_public != header.ephemeral_public).then_some(sender_public);
        check_expected_sender(expected_sender, sender.as_ref())?;

        debug!(
            recipient_index,
            recipients = header.recipients().len(),
            anonymous_sender = sender.is_none(),
            "opened encryption header"
        );

        Ok(Self {
            header,
            payload_key,
            mac_key,
            recipient_index,
            sender,
        })
    }

    pub(crate) fn sender(&self) -> Option<PublicKey> {
        self.sender
    }

    /// Authenticate and decrypt chunk `index`, returning its plaintext and final flag.
    pub(crate) fn open_chunk(&self, index: u64, value: &Value) -> Result<(Vec<u8>, bool)> {
        let payload = EncryptedPayload::from_value(value)?;
        let nonce = payload_nonce(index);

        let authenticator = payload
            .authenticators
            .get(self.recipient_index)
            .ok_or_else(|| {
                SaltpackError::framing(
                    ErrorKind::WireFormat,
                    format!("chunk {} has no authenticator for recipient {}", index, self.recipient_index),
                )
            })?;
        let hash = authenticator_hash(
            self.header.hash(),
            &nonce,
            payload.is_final,
            &payload.payload_secretbox,
        );
        if !primitives::hmac_sha512_256_verify(&self.mac_key[..], &[&hash], authenticator) {
            return Err(SaltpackError::decryption(
                ErrorKind::AuthenticatorMismatch,
                format!("invalid authenticator for chunk {}", index),
            ));
        }

        let plaintext =
            primitives::secretbox_open(&self.payload_key, &nonce, &payload.payload_secretbox)
                .ok_or_else(|| {
                    SaltpackError::decryption(
                        ErrorKind::PayloadOpen,
                        format!("failed to open payload secretbox for chunk {}", index),
                    )
                })?;

        trace!(index, is_final = payload.is_final, len = plaintext.len(), "opened encrypted chunk");
        Ok((plaintext, payload.is_final))
    }
}

/// Result of opening an encrypted or signcrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub plaintext: Vec<u8>,
    /// The sender's long-term public key, or `None` for an anonymous sender.
    pub sender: Option<PublicKey>,
}

/// Encrypt `plaintext` for `recipients`, using the OS RNG for key material.
///
/// Passing `None` as the sender sends anonymously.
pub fn encrypt(
    plaintext: &[u8],
    sender: Option<&BoxKeyPair>,
    recipients: &[Recipient],
) -> Result<Vec<u8>> {
    encrypt_with(plaintext, sender, recipients, &mut OsRandom)
}

/// Like [`encrypt`] but drawing the payload key and ephemeral key pair from `random`.
pub fn encrypt_with(
    plaintext: &[u8],
    sender: Option<&BoxKeyPair>,
    recipients: &[Recipient],
    random: &mut dyn RandomSource,
) -> Result<Vec<u8>> {
    let session = EncryptSession::new(sender, recipients, random)?;
    let mut out = session.header().as_bytes().to_vec();
    for ((chunk, is_final), index) in payload::split_chunks(plaintext, CHUNK_SIZE)
        .into_iter()
        .zip(0u64..)
    {
        out.extend_from_slice(&session.seal_chunk(index, chunk, is_final)?);
    }
    Ok(out)
}

/// Decrypt a complete message with `keypair`.
///
/// When `expected_sender` is given, the message must come from that key;
/// pass `None` to accept any sender, including an anonymous one.
pub fn decrypt(
    message: &[u8],
    keypair: &BoxKeyPair,
    expected_sender: Option<&PublicKey>,
) -> Result<DecryptedMessage> {
    let values = wire::unpack_all(message)?;
    let (header_value, chunks) = values.split_first().ok_or_else(|| {
        SaltpackError::framing(ErrorKind::TruncatedInput, "message is empty")
    })?;
    let session = DecryptSession::open(header_value, keypair, expected_sender)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::random::FixedRandom;

    const POEM: &[u8] = b"Two roads diverged in a yellow wood, and sorry I could not travel both\n\
and be one traveller, long I stood, and looked down one as far as I\n\
could, to where it bent in the undergrowth.";

    const ENCRYPTED_HEX: &str = concat!(
        "c4b896a873616c747061636b92020000c4205bf55c73b82ebe22be80f3430667",
        "af570fae2556a6415e6b30d4065300aa947dc43094992d83ef6d054728b19b77",
        "f91640d4b6fc921440138f7d571fb1796e44fd8f780f153e4507d3ed7f500b48",
        "b6e752df9192c42060346e7c911a5f6ba154129174cafe75b294ac3bbd554963",
        "2f48cec6266f8410c4302159708fbf1824787d5872df43734dd567672f70eab9",
        "663ef62165ca5653e24de796b9f2951c87971d4c23a649984dc693c391c42020",
        "755fe80a6ccb4486993bf69cc8f5050f26ec8850fb776fca4ce22ef665f056c4",
        "c64d6cbc4477493be11cb91110ead53afd99f227025700b3d93f6fea2f2bcd90",
        "5c170488bbb342b33fad6c3b8037e787d7f310a6a4240bfaca5ba3867e42a685",
        "a0de9eb12c5c7d51b13749c5e7607e5ab187b584e0bc35ac6a9b17e3a1bd717f",
        "b4f7c6ffad48afad5fa1d44faef31554c2fce0f2dbc6a215761eb10e664bd353",
        "156eb13da776b51c049d1ead133542cbdf8b5ffb124bbe82184bce9c0d9da611",
        "0e47f69a40d3c365f9c2e3fc4178ac36deadd61bbc0817a8cf7cf5bf944c228b",
        "e675888b05c84e",
    );

    fn sender() -> BoxKeyPair {
        BoxKeyPair::from_seed(&[1u8; KEY_LEN])
    }

    fn recipient() -> BoxKeyPair {
        BoxKeyPair::from_seed(&[2u8; KEY_LEN])
    }

    fn session_for(recipients: &[Recipient]) -> EncryptSession {
        EncryptSession::new(Some(&sender()), recipients, &mut FixedRandom::zeroed()).unwrap()
    }

    #[test]
    fn test_known_answer() {
        let encrypted = encrypt_with(
            POEM,
            Some(&sender()),
            &[recipient().public_key().to_owned().into()],
            &mut FixedRandom::zeroed(),
        )
        .unwrap();
        assert_eq!(hex::encode(&encrypted), ENCRYPTED_HEX);
    }

    #[test]
    fn test_decrypt_known_answer() {
        let message = hex::decode(ENCRYPTED_HEX).unwrap();
        let decrypted = decrypt(&message, &recipient(), None).unwrap();
        assert_eq!(decrypted.plaintext, POEM);
        assert_eq!(decrypted.sender, Some(*sender().public_key()));
    }

    #[test]
    fn test_roundtrip_random_keys() {
        let bob = BoxKeyPair::generate();
        let encrypted = encrypt(b"hello", Some(&sender()), &[(&bob).into()]).unwrap();
        let decrypted = decrypt(&encrypted, &bob, Some(sender().public_key())).unwrap();
        assert_eq!(decrypted.plaintext, b"hello");
    }

    #[test]
    fn test_anonymous_sender() {
        let encrypted = encrypt(POEM, None, &[(&recipient()).into()]).unwrap();
        let decrypted = decrypt(&encrypted, &recipient(), None).unwrap();
        assert_eq!(decrypted.plaintext, POEM);
        assert_eq!(decrypted.sender, None);
    }

    #[test]
    fn test_every_recipient_can_decrypt() {
        let keys: Vec<BoxKeyPair> = (3u8..7).map(|s| BoxKeyPair::from_seed(&[s; KEY_LEN])).collect();
        let recipients: Vec<Recipient> = keys.iter().map(Recipient::from).collect();
        let encrypted = encrypt(POEM, Some(&sender()), &recipients).unwrap();

        for key in &keys {
            let decrypted = decrypt(&encrypted, key, None).unwrap();
            assert_eq!(decrypted.plaintext, POEM);
            assert_eq!(decrypted.sender, Some(*sender().public_key()));
        }
    }

    #[test]
    fn test_anonymous_recipients() {
        let keys: Vec<BoxKeyPair> = (3u8..6).map(|s| BoxKeyPair::from_seed(&[s; KEY_LEN])).collect();
        let recipients: Vec<Recipient> = keys
            .iter()
            .map(|k| Recipient::anonymous(*k.public_key()))
            .collect();
        let encrypted = encrypt(POEM, Some(&sender()), &recipients).unwrap();

        let values = wire::unpack_all(&encrypted).unwrap();
        let header = EncryptedMessageHeader::from_value(&values[0]).unwrap();
        assert!(header.recipients().iter().all(|r| r.public_key().is_none()));

        let decrypted = decrypt(&encrypted, &keys[2], None).unwrap();
        assert_eq!(decrypted.plaintext, POEM);
    }

    #[test]
    fn test_not_a_recipient() {
        let encrypted = encrypt(POEM, Some(&sender()), &[(&recipient()).into()]).unwrap();
        let stranger = BoxKeyPair::from_seed(&[9u8; KEY_LEN]);
        let err = decrypt(&encrypted, &stranger, None).expect_err("expected decryption error");
        assert_eq!(err.category, ErrorCategory::Decryption);
        assert_eq!(err.kind, Some(ErrorKind::NotARecipient));
    }

    #[test]
    fn test_sender_pinning() {
        let encrypted = encrypt(POEM, Some(&sender()), &[(&recipient()).into()]).unwrap();
        let other = BoxKeyPair::from_seed(&[8u8; KEY_LEN]);
        let err = decrypt(&encrypted, &recipient(), Some(other.public_key()))
            .expect_err("expected sender mismatch");
        assert_eq!(err.category, ErrorCategory::Verify);
        assert_eq!(err.kind, Some(ErrorKind::SenderMismatch));

        let anonymous = encrypt(POEM, None, &[(&recipient()).into()]).unwrap();
        let err = decrypt(&anonymous, &recipient(), Some(sender().public_key()))
            .expect_err("expected anonymous sender to fail pinning");
        assert_eq!(err.kind, Some(ErrorKind::SenderMismatch));
    }

    #[test]
    fn test_empty_plaintext_has_one_final_chunk() {
        let encrypted = encrypt(b"", Some(&sender()), &[(&recipient()).into()]).unwrap();
        let values = wire::unpack_all(&encrypted).unwrap();
        assert_eq!(values.len(), 2);
        assert!(EncryptedPayload::from_value(&values[1]).unwrap().is_final());
        assert!(decrypt(&encrypted, &recipient(), None).unwrap().plaintext.is_empty());
    }

    #[test]
    fn test_multiple_chunks() {
        let plaintext: Vec<u8> = (0..CHUNK_SIZE + 100).map(|i| (i % 251) as u8).collect();
        let encrypted = encrypt(&plaintext, Some(&sender()), &[(&recipient()).into()]).unwrap();
        assert_eq!(wire::unpack_all(&encrypted).unwrap().len(), 3);
        assert_eq!(decrypt(&encrypted, &recipient(), None).unwrap().plaintext, plaintext);
    }

    #[test]
    fn test_tampering_is_detected() {
        let message = hex::decode(ENCRYPTED_HEX).unwrap();
        let header_len = 2 + 0xb8;
        for position in header_len..message.len() {
            let mut tampered = message.clone();
            tampered[position] ^= 0x01;
            match decrypt(&tampered, &recipient(), None) {
                Ok(decrypted) => panic!(
                    "bit flip at {} was accepted, got {} bytes",
                    position,
                    decrypted.plaintext.len()
                ),
                Err(err) => assert_ne!(err.category, ErrorCategory::Internal),
            }
        }
    }

    #[test]
    fn test_authenticator_mismatch() {
        let session = session_for(&[(&recipient()).into()]);
        let mut message = session.header().as_bytes().to_vec();
        let chunk = session.seal_chunk(0, b"data", true).unwrap();
        let mut value = wire::unpack_exact(&chunk).unwrap();
        if let Value::Array(items) = &mut value {
            items[1] = Value::Array(vec![wire::bin(&[0u8; AUTHENTICATOR_LEN])]);
        }
        message.extend(wire::pack(&value).unwrap());

        let err = decrypt(&message, &recipient(), None).expect_err("expected MAC failure");
        assert_eq!(err.category, ErrorCategory::Decryption);
        assert_eq!(err.kind, Some(ErrorKind::AuthenticatorMismatch));
    }

    #[test]
    fn test_two_final_chunks_rejected() {
        let session = session_for(&[(&recipient()).into()]);
        let mut message = session.header().as_bytes().to_vec();
        message.extend(session.seal_chunk(0, b"one", true).unwrap());
        message.extend(session.seal_chunk(1, b"two", true).unwrap());

        let err = decrypt(&message, &recipient(), None).expect_err("expected final flag error");
        assert_eq!(err.category, ErrorCategory::InvalidFinalFlag);
        assert_eq!(err.kind, Some(ErrorKind::FinalChunkExtended));
    }

    #[test]
    fn test_missing_final_chunk_rejected() {
        let session = session_for(&[(&recipient()).into()]);
        let mut message = session.header().as_bytes().to_vec();
        message.extend(session.seal_chunk(0, b"one", false).unwrap());

        let err = decrypt(&message, &recipient(), None).expect_err("expected truncation error");
        assert_eq!(err.category, ErrorCategory::InvalidFinalFlag);
        assert_eq!(err.kind, Some(ErrorKind::FinalChunkMissing));
    }

    #[test]
    fn test_zero_chunks_rejected() {
        let session = session_for(&[(&recipient()).into()]);
        let message = session.header().as_bytes().to_vec();
        let err = decrypt(&message, &recipient(), None).expect_err("expected no payload error");
        assert_eq!(err.category, ErrorCategory::InvalidFinalFlag);
        assert_eq!(err.kind, Some(ErrorKind::NoPayload));
    }

    #[test]
    fn test_reordered_chunks_rejected() {
        let session = session_for(&[(&recipient()).into()]);
        let mut message = session.header().as_bytes().to_vec();
        message.extend(session.seal_chunk(1, b"two", false).unwrap());
        message.extend(session.seal_chunk(0, b"one", true).unwrap());

        let err = decrypt(&message, &recipient(), None).expect_err("expected reorder failure");
        assert_eq!(err.category, ErrorCategory::Decryption);
    }

    #[test]
    fn test_no_recipients() {
        let err = encrypt(POEM, Some(&sender()), &[]).expect_err("expected argument error");
        assert_eq!(err.category, ErrorCategory::Argument);
    }

    #[test]
    fn test_wrong_mode_rejected() {
        let signed = crate::signing::sign(b"hi", &crate::keys::SigningKeyPair::generate()).unwrap();
        let err = decrypt(&signed, &recipient(), None).expect_err("expected mode error");
        assert_eq!(err.category, ErrorCategory::MalformedFraming);
        assert_eq!(err.kind, Some(ErrorKind::UnexpectedMode));
    }

    #[test]
    fn test_truncated_message() {
        let message = hex::decode(ENCRYPTED_HEX).unwrap();
        let err = decrypt(&message[..message.len() - 1], &recipient(), None)
            .expect_err("expected truncation error");
        assert_eq!(err.category, ErrorCategory::MalformedFraming);
        assert_eq!(err.kind, Some(ErrorKind::TruncatedInput));
    }
}
