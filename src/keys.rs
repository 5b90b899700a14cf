//! Curve25519 encryption key pairs and Ed25519 signing key pairs
//!
//! Secret halves are kept in zeroizing storage and never printed by `Debug`.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, Result, SaltpackError};

/// Length of every public key, secret key and seed handled by this crate.
pub const KEY_LEN: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// A public key as it travels on the wire.
pub type PublicKey = [u8; KEY_LEN];

/// An X25519 key pair used with the NaCl box construction.
#[derive(Clone)]
pub struct BoxKeyPair {
    secret: Zeroizing<[u8; KEY_LEN]>,
    public: PublicKey,
}

impl BoxKeyPair {
    /// Generates a fresh key pair from the operating system RNG.
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *secret);
        Self::from_secret_key(&secret)
    }

    /// Derives a key pair from a 32-byte seed.
    ///
    /// The secret key is the first 32 bytes of SHA-512(seed), which is what
    /// libsodium's `crypto_box_seed_keypair` produces, so seeded keys agree
    /// with other saltpack implementations.
    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        let mut digest = Zeroizing::new([0u8; 64]);
        digest.copy_from_slice(&Sha512::digest(seed));
        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        secret.copy_from_slice(&digest[..KEY_LEN]);
        Self::from_secret_key(&secret)
    }

    /// Builds a key pair around an existing secret key.
    pub fn from_secret_key(secret: &[u8; KEY_LEN]) -> Self {
        let public = *crypto_box::SecretKey::from(*secret).public_key().as_bytes();
        Self {
            secret: Zeroizing::new(*secret),
            public,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub(crate) fn secret_key(&self) -> &[u8; KEY_LEN] {
        &self.secret
    }
}

impl fmt::Debug for BoxKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxKeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// An Ed25519 key pair used for attached, detached and signcrypted signatures.
#[derive(Clone)]
pub struct SigningKeyPair {
    key: SigningKey,
}

impl SigningKeyPair {
    /// Generates a fresh key pair from the operating system RNG.
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *seed);
        Self::from_seed(&seed)
    }

    /// Derives a key pair from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; KEY_LEN]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.verifying_key().to_bytes()
    }

    /// Produces a detached Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(message).to_bytes()
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Parses a hex-encoded 32-byte key, tolerating surrounding whitespace.
pub fn parse_hex_key(text: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = hex::decode(text.trim()).map_err(|e| {
        SaltpackError::with_kind_and_source(
            ErrorCategory::Argument,
            ErrorKind::InvalidKey,
            format!("key is not valid hex: {}", e),
            e,
        )
    })?;
    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        SaltpackError::argument(
            ErrorKind::InvalidKey,
            format!("key must be {} bytes, got {}", KEY_LEN, bytes.len()),
        )
    })
}

/// Compare the sender a message claims against the one the caller pinned.
///
/// `actual` is `None` for an anonymous sender, which never satisfies a pin.
pub(crate) fn check_expected_sender(
    expected: Option<&PublicKey>,
    actual: Option<&PublicKey>,
) -> Result<()> {
    match expected {
        Some(expected) if actual != Some(expected) => Err(SaltpackError::verify(
            ErrorKind::SenderMismatch,
            match actual {
                Some(actual) => format!(
                    "message is from {}, expected {}",
                    hex::encode(actual),
                    hex::encode(expected)
                ),
                None => format!(
                    "message is from an anonymous sender, expected {}",
                    hex::encode(expected)
                ),
            },
        )),
        _ => Ok(()),
    }
}
