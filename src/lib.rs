//! Saltpack - encryption, signing and signcryption of byte streams for
//! multiple recipients, with a reversible ASCII armor for text channels.
//!
//! Every message kind comes in two shapes: one-shot functions over whole
//! buffers ([`encryption::encrypt`], [`signing::sign`],
//! [`signcryption::signcrypt`], ...) and incremental [`stream::Transform`]s
//! that accept input in fragments of any size. [`facade`] combines either
//! shape with [`armor`].

#![forbid(unsafe_code)]

pub mod armor;
pub mod encryption;
pub mod error;
pub mod facade;
pub mod file_ops;
pub mod header;
pub mod keys;
pub mod payload;
pub mod random;
pub mod signcryption;
pub mod signing;
pub mod stream;

mod primitives;
mod wire;

pub use error::{ErrorCategory, ErrorKind, Result, SaltpackError};
pub use keys::{BoxKeyPair, PublicKey, SigningKeyPair};
pub use stream::{Pipeline, Transform};
