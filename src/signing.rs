//! Attached and detached Ed25519 signatures (saltpack modes 1 and 2)
//!
//! Both modes share a header of `[signer_public_key, nonce]`; the random
//! nonce only makes each header, and so each header hash, unique.
//!
//! An attached message follows the header with chunks
//! `[final, signature, chunk]`, each signature covering
//! `prefix || SHA-512(header_hash || index || final || chunk)`. A detached
//! signature is the header followed by one `bin` signature over
//! `prefix || SHA-512(header_hash || data)`.

use rmpv::Value;
use sha2::{Digest, Sha512};
use tracing::{debug, trace};

use crate::error::{ErrorKind, Result, SaltpackError};
use crate::header::{self, EncodedHeader, HeaderHash, Mode};
use crate::keys::{KEY_LEN, PublicKey, SIGNATURE_LEN, SigningKeyPair, check_expected_sender};
use crate::payload::{self, CHUNK_SIZE};
use crate::primitives::{self, HASH_LEN};
use crate::random::{OsRandom, RandomSource};
use crate::wire;

const ATTACHED_SIGNATURE_PREFIX: &[u8] = b"saltpack attached signature\0";
const DETACHED_SIGNATURE_PREFIX: &[u8] = b"saltpack detached signature\0";

/// Length of the header nonce.
pub const NONCE_LEN: usize = 32;

/// Header of an attached or detached signed message.
#[derive(Debug, Clone)]
pub struct SignedMessageHeader {
    public_key: PublicKey,
    nonce: [u8; NONCE_LEN],
    attached: bool,
    encoded: EncodedHeader,
}

impl SignedMessageHeader {
    fn create(public_key: PublicKey, nonce: [u8; NONCE_LEN], attached: bool) -> Result<Self> {
        let encoded = EncodedHeader::build(
            mode_for(attached),
            vec![wire::bin(&public_key), wire::bin(&nonce)],
        )?;
        Ok(Self {
            public_key,
            nonce,
            attached,
            encoded,
        })
    }

    pub(crate) fn from_value(value: &Value, attached: bool) -> Result<Self> {
        let decoded = header::decode_value_for(value, &[mode_for(attached)])?;
        if decoded.fields.len() != 2 {
            return Err(SaltpackError::framing(
                ErrorKind::WireFormat,
                format!("signing header has {} fields, expected 2", decoded.fields.len()),
            ));
        }
        let public_key = wire::as_fixed::<KEY_LEN>(&decoded.fields[0], "signer public key")?;
        let nonce = wire::as_fixed::<NONCE_LEN>(&decoded.fields[1], "header nonce")?;
        Ok(Self {
            public_key,
            nonce,
            attached,
            encoded: decoded.encoded,
        })
    }

    pub fn hash(&self) -> &HeaderHash {
        self.encoded.hash()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

fn mode_for(attached: bool) -> Mode {
    if attached {
        Mode::AttachedSigning
    } else {
        Mode::DetachedSigning
    }
}

/// One chunk of an attached signed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    is_final: bool,
    signature: [u8; SIGNATURE_LEN],
    chunk: Vec<u8>,
}

impl SignedPayload {
    pub(crate) fn from_value(value: &Value) -> Result<Self> {
        let items = wire::as_tuple(value, 3, "signed payload")?;
        Ok(Self {
            is_final: wire::as_bool(&items[0], "final flag")?,
            signature: wire::as_fixed::<SIGNATURE_LEN>(&items[1], "signature")?,
            chunk: wire::as_bytes(&items[2], "payload chunk")?.to_vec(),
        })
    }

    fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Boolean(self.is_final),
            wire::bin(&self.signature),
            wire::bin(&self.chunk),
        ])
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }
}

fn attached_signature_input(
    header_hash: &HeaderHash,
    index: u64,
    is_final: bool,
    chunk: &[u8],
) -> Vec<u8> {
    let digest = primitives::sha512(&[
        header_hash,
        &index.to_be_bytes(),
        &payload::final_flag_byte(is_final),
        chunk,
    ]);
    [ATTACHED_SIGNATURE_PREFIX, &digest[..]].concat()
}

fn detached_signature_input(digest: &[u8; HASH_LEN]) -> Vec<u8> {
    [DETACHED_SIGNATURE_PREFIX, &digest[..]].concat()
}

/// Start the running hash a detached signature covers.
pub(crate) fn detached_hasher(header: &SignedMessageHeader) -> Sha512 {
    let mut hasher = Sha512::new();
    hasher.update(header.hash());
    hasher
}

pub(crate) fn finish_hasher(hasher: Sha512) -> [u8; HASH_LEN] {
    let mut digest = [0u8; HASH_LEN];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Signer-side state for one signed message.
pub(crate) struct SignSession {
    header: SignedMessageHeader,
    signer: SigningKeyPair,
}

impl SignSession {
    pub(crate) fn new(
        signer: &SigningKeyPair,
        attached: bool,
        random: &mut dyn RandomSource,
    ) -> Result<Self> {
        let header =
            SignedMessageHeader::create(signer.public_key(), random.signature_nonce(), attached)?;
        debug!(attached, "created signing header");
        Ok(Self {
            header,
            signer: signer.clone(),
        })
    }

    pub(crate) fn header(&self) -> &SignedMessageHeader {
        &self.header
    }

    /// Sign one attached chunk and serialize it.
    pub(crate) fn seal_chunk(&self, index: u64, chunk: &[u8], is_final: bool) -> Result<Vec<u8>> {
        let signature = self.signer.sign(&attached_signature_input(
            self.header.hash(),
            index,
            is_final,
            chunk,
        ));
        trace!(index, is_final, len = chunk.len(), "signed chunk");
        wire::pack(
            &SignedPayload {
                is_final,
                signature,
                chunk: chunk.to_vec(),
            }
            .to_value(),
        )
    }

    /// Sign the final digest of a detached message and serialize the signature.
    pub(crate) fn seal_detached(&self, digest: &[u8; HASH_LEN]) -> Result<Vec<u8>> {
        let signature = self.signer.sign(&detached_signature_input(digest));
        wire::pack(&wire::bin(&signature))
    }
}

/// Verifier-side state for one signed message.
pub(crate) struct VerifySession {
    header: SignedMessageHeader,
}

impl VerifySession {
    pub(crate) fn open(
        header_value: &Value,
        attached: bool,
        expected_signer: Option<&PublicKey>,
    ) -> Result<Self> {
        let header = SignedMessageHeader::from_value(header_value, attached)?;
        check_expected_sender(expected_signer, Some(header.public_key()))?;
        debug!(attached, "opened signing header");
        Ok(Self { header })
    }

    pub(crate) fn header(&self) -> &SignedMessageHeader {
        &self.header
    }

    pub(crate) fn signer(&self) -> PublicKey {
        self.header.public_key
    }

    /// Verify chunk `index`, returning its bytes and final flag.
    pub(crate) fn open_chunk(&self, index: u64, value: &Value) -> Result<(Vec<u8>, bool)> {
        let payload = SignedPayload::from_value(value)?;
        let input =
            attached_signature_input(self.header.hash(), index, payload.is_final, &payload.chunk);
        primitives::verify_signature(&self.header.public_key, &input, &payload.signature)
            .map_err(|e| e.with_context(format!("signature on chunk {} is invalid", index)))?;
        trace!(index, is_final = payload.is_final, len = payload.chunk.len(), "verified chunk");
        Ok((payload.chunk, payload.is_final))
    }

    /// Check a detached signature value against the digest of the signed data.
    pub(crate) fn verify_detached(&self, value: &Value, digest: &[u8; HASH_LEN]) -> Result<()> {
        let signature = wire::as_fixed::<SIGNATURE_LEN>(value, "detached signature")?;
        primitives::verify_signature(
            &self.header.public_key,
            &detached_signature_input(digest),
            &signature,
        )
    }
}

/// Result of verifying an attached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMessage {
    pub plaintext: Vec<u8>,
    pub signer: PublicKey,
}

/// Produce an attached signed message.
pub fn sign(plaintext: &[u8], signer: &SigningKeyPair) -> Result<Vec<u8>> {
    sign_with(plaintext, signer, &mut OsRandom)
}

/// Like [`sign`] but drawing the header nonce from `random`.
pub fn sign_with(
    plaintext: &[u8],
    signer: &SigningKeyPair,
    random: &mut dyn RandomSource,
) -> Result<Vec<u8>> {
    let session = SignSession::new(signer, true, random)?;
    let mut out = session.header().as_bytes().to_vec();
    for ((chunk, is_final), index) in payload::split_chunks(plaintext, CHUNK_SIZE)
        .into_iter()
        .zip(0u64..)
    {
        out.extend_from_slice(&session.seal_chunk(index, chunk, is_final)?);
    }
    Ok(out)
}

/// Verify an attached signed message and return its contents.
pub fn verify(message: &[u8], expected_signer: Option<&PublicKey>) -> Result<VerifiedMessage> {
    let values = wire::unpack_all(message)?;
    let (header_value, chunks) = values
        .split_first()
        .ok_or_else(|| SaltpackError::framing(ErrorKind::TruncatedInput, "message is empty"))?;
    let session = VerifySession::open(header_value, true, expected_signer)?;
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

    Ok(VerifiedMessage {
        plaintext,
        signer: session.signer(),
    })
}

/// Produce a detached signature over `data`.
pub fn sign_detached(data: &[u8], signer: &SigningKeyPair) -> Result<Vec<u8>> {
    sign_detached_with(data, signer, &mut OsRandom)
}

/// Like [`sign_detached`] but drawing the header nonce from `random`.
pub fn sign_detached_with(
    data: &[u8],
    signer: &SigningKeyPair,
    random: &mut dyn RandomSource,
) -> Result<Vec<u8>> {
    let session = SignSession::new(signer, false, random)?;
    let mut hasher = detached_hasher(session.header());
    hasher.update(data);
    let mut out = session.header().as_bytes().to_vec();
    out.extend_from_slice(&session.seal_detached(&finish_hasher(hasher))?);
    Ok(out)
}

/// Verify a detached signature over `data`, returning the signer's key.
pub fn verify_detached(
    signature: &[u8],
    data: &[u8],
    expected_signer: Option<&PublicKey>,
) -> Result<PublicKey> {
    let values = wire::unpack_all(signature)?;
    let [header_value, signature_value] = values.as_slice() else {
        return Err(SaltpackError::framing(
            ErrorKind::WireFormat,
            format!("detached signature has {} values, expected 2", values.len()),
        ));
    };
    let session = VerifySession::open(header_value, false, expected_signer)?;
    let mut hasher = detached_hasher(session.header());
    hasher.update(data);
    session.verify_detached(signature_value, &finish_hasher(hasher))?;
    Ok(session.signer())
}
