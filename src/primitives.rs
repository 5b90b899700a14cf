//! Thin wrappers over the NaCl-compatible primitives saltpack is built on
//!
//! - secretbox: XSalsa20Poly1305 under a symmetric key
//! - box: Curve25519 key agreement feeding the same secretbox construction
//! - SHA-512 and HMAC-SHA-512 truncated to 32 bytes
//! - Ed25519 signature verification
//!
//! Sealed outputs use the NaCl "combined" layout: the 16-byte Poly1305 tag
//! first, then the ciphertext.

use crypto_box::SalsaBox;
use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Nonce, XSalsa20Poly1305};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

use crate::error::{ErrorCategory, ErrorKind, Result, SaltpackError};
use crate::keys::{KEY_LEN, SIGNATURE_LEN};

/// Length of every box/secretbox nonce.
pub const NONCE_LEN: usize = 24;

/// Length of the Poly1305 tag prepended to each sealed box.
pub const TAG_LEN: usize = 16;

/// Length of a SHA-512 digest.
pub const HASH_LEN: usize = 64;

type HmacSha512 = Hmac<Sha512>;

/// Seal `plaintext` with a symmetric key.
pub(crate) fn secretbox_seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(&(*key).into());
    cipher
        .encrypt(&Nonce::from(*nonce), plaintext)
        .map_err(|_| SaltpackError::internal("secretbox encryption failed"))
}

/// Open a secretbox, returning `None` if authentication fails.
pub(crate) fn secretbox_open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    sealed: &[u8],
) -> Option<Vec<u8>> {
    let cipher = XSalsa20Poly1305::new(&(*key).into());
    cipher.decrypt(&Nonce::from(*nonce), sealed).ok()
}

/// Seal `plaintext` from `our_secret` to `their_public`.
pub(crate) fn box_seal(
    their_public: &[u8; KEY_LEN],
    our_secret: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    salsa_box(their_public, our_secret)
        .encrypt(&Nonce::from(*nonce), plaintext)
        .map_err(|_| SaltpackError::internal("box encryption failed"))
}

/// Open a box sealed between `their_public` and `our_secret`.
pub(crate) fn box_open(
    their_public: &[u8; KEY_LEN],
    our_secret: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    sealed: &[u8],
) -> Option<Vec<u8>> {
    salsa_box(their_public, our_secret)
        .decrypt(&Nonce::from(*nonce), sealed)
        .ok()
}

fn salsa_box(their_public: &[u8; KEY_LEN], our_secret: &[u8; KEY_LEN]) -> SalsaBox {
    SalsaBox::new(
        &crypto_box::PublicKey::from(*their_public),
        &crypto_box::SecretKey::from(*our_secret),
    )
}

/// Boxes 32 zero bytes and keeps the trailing 32 bytes.
///
/// With the tag stripped this is the raw XSalsa20 keystream for the pair,
/// which both the MAC key and the signcryption shared key are built from.
pub(crate) fn box_zero_tail(
    their_public: &[u8; KEY_LEN],
    our_secret: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<[u8; KEY_LEN]> {
    let sealed = box_seal(their_public, our_secret, nonce, &[0u8; KEY_LEN])?;
    let mut tail = [0u8; KEY_LEN];
    tail.copy_from_slice(&sealed[sealed.len() - KEY_LEN..]);
    Ok(tail)
}

/// SHA-512 over the concatenation of `parts`.
pub(crate) fn sha512(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    let mut digest = [0u8; HASH_LEN];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// HMAC-SHA-512 over the concatenation of `parts`, truncated to 32 bytes.
pub(crate) fn hmac_sha512_256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(key)
        .map_err(|_| SaltpackError::internal("HMAC rejected its key"))?;
    for part in parts {
        mac.update(part);
    }
    let mut tag = [0u8; 32];
    tag.copy_from_slice(&mac.finalize().into_bytes()[..32]);
    Ok(tag)
}

/// Constant-time check of a truncated HMAC-SHA-512 tag.
pub(crate) fn hmac_sha512_256_verify(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    if tag.len() != 32 {
        return false;
    }
    let Ok(mut mac) = <HmacSha512 as Mac>::new_from_slice(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_truncated_left(tag).is_ok()
}

/// Verify a detached Ed25519 signature.
pub(crate) fn verify_signature(
    public_key: &[u8; KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|e| {
        SaltpackError::with_kind_and_source(
            ErrorCategory::Verify,
            ErrorKind::SignatureInvalid,
            "signer public key is not a valid Ed25519 point",
            e,
        )
    })?;
    key.verify(message, &Signature::from_bytes(signature))
        .map_err(|e| {
            SaltpackError::with_kind_and_source(
                ErrorCategory::Verify,
                ErrorKind::SignatureInvalid,
                "invalid signature",
                e,
            )
        })
}
