//! Sources of per-message randomness
//!
//! Every message draws its payload key, ephemeral key pair and signature
//! nonce from a [`RandomSource`]. Production code uses [`OsRandom`]; tests
//! plug in [`FixedRandom`] to reproduce known-answer vectors.

use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::keys::{BoxKeyPair, KEY_LEN};

/// Supplies the random material consumed while encoding one message.
pub trait RandomSource {
    /// A fresh symmetric key for the payload secretboxes.
    fn payload_key(&mut self) -> Zeroizing<[u8; KEY_LEN]>;

    /// A fresh ephemeral key pair for the header.
    fn ephemeral_keypair(&mut self) -> BoxKeyPair;

    /// A fresh 32-byte nonce identifying a signed message.
    fn signature_nonce(&mut self) -> [u8; 32];
}

/// Draws everything from the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl OsRandom {
    pub fn new() -> Self {
        Self
    }
}

impl RandomSource for OsRandom {
    fn payload_key(&mut self) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut *key);
        key
    }

    fn ephemeral_keypair(&mut self) -> BoxKeyPair {
        BoxKeyPair::generate()
    }

    fn signature_nonce(&mut self) -> [u8; 32] {
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }
}

/// Returns the same material on every call (for testing)
///
/// This is ONLY for reproducing test vectors. Reusing a payload key or
/// ephemeral key pair across messages destroys their confidentiality.
#[derive(Debug, Clone)]
pub struct FixedRandom {
    payload_key: Zeroizing<[u8; KEY_LEN]>,
    ephemeral: BoxKeyPair,
    nonce: [u8; 32],
}

impl FixedRandom {
    pub fn new(payload_key: [u8; KEY_LEN], ephemeral: BoxKeyPair, nonce: [u8; 32]) -> Self {
        Self {
            payload_key: Zeroizing::new(payload_key),
            ephemeral,
            nonce,
        }
    }

    /// All-zero payload key and nonce, ephemeral key pair seeded from zeros.
    pub fn zeroed() -> Self {
        Self::new(
            [0u8; KEY_LEN],
            BoxKeyPair::from_seed(&[0u8; KEY_LEN]),
            [0u8; 32],
        )
    }
}

impl RandomSource for FixedRandom {
    fn payload_key(&mut self) -> Zeroizing<[u8; KEY_LEN]> {
        self.payload_key.clone()
    }

    fn ephemeral_keypair(&mut self) -> BoxKeyPair {
        self.ephemeral.clone()
    }

    fn signature_nonce(&mut self) -> [u8; 32] {
        self.nonce
    }
}
