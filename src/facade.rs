//! One-call combinations of a message kind with ASCII armor.
//!
//! Encoders force the armor label to the kind they produce. Decoders accept
//! a frame labelled with that kind or with the generic `MESSAGE` label.

use tracing::debug;

use crate::armor::{ArmorOptions, ArmorStream, ArmorType, DearmorStream, armor};
use crate::encryption::{self, DecryptedMessage, Recipient};
use crate::error::Result;
use crate::keys::{BoxKeyPair, PublicKey, SigningKeyPair};
use crate::signcryption::{self, RecipientKeys, SigncryptionRecipient};
use crate::signing::{self, VerifiedMessage};
use crate::stream::{
    DecryptStream, DesigncryptStream, EncryptStream, Pipeline, SignDetachedStream, SignStream,
    SigncryptStream, Transform, VerifyDetachedStream, VerifyStream, collect,
};

pub(crate) fn labelled(options: &ArmorOptions, message_type: ArmorType) -> ArmorOptions {
    options.clone().with_message_type(message_type)
}

pub(crate) fn dearmor_stream(options: &ArmorOptions, message_type: ArmorType) -> Result<DearmorStream> {
    Ok(DearmorStream::new(options.clone())?
        .with_expected_types(&[message_type, ArmorType::Message]))
}

fn dearmor_as(text: &str, options: &ArmorOptions, message_type: ArmorType) -> Result<Vec<u8>> {
    let mut stream = dearmor_stream(options, message_type)?;
    let data = collect(&mut stream, text.as_bytes())?;
    debug!(message_type = %message_type, len = data.len(), "dearmored input");
    Ok(data)
}

/// Encrypt, then armor as an `ENCRYPTED MESSAGE`.
pub fn encrypt_and_armor(
    plaintext: &[u8],
    sender: Option<&BoxKeyPair>,
    recipients: &[Recipient],
    options: &ArmorOptions,
) -> Result<String> {
    let ciphertext = encryption::encrypt(plaintext, sender, recipients)?;
    armor(&ciphertext, &labelled(options, ArmorType::EncryptedMessage))
}

pub fn dearmor_and_decrypt(
    text: &str,
    keypair: &BoxKeyPair,
    expected_sender: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<DecryptedMessage> {
    let ciphertext = dearmor_as(text, options, ArmorType::EncryptedMessage)?;
    encryption::decrypt(&ciphertext, keypair, expected_sender)
}

/// Sign, then armor as a `SIGNED MESSAGE`.
pub fn sign_and_armor(
    plaintext: &[u8],
    signer: &SigningKeyPair,
    options: &ArmorOptions,
) -> Result<String> {
    let message = signing::sign(plaintext, signer)?;
    armor(&message, &labelled(options, ArmorType::SignedMessage))
}

pub fn dearmor_and_verify(
    text: &str,
    expected_signer: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<VerifiedMessage> {
    let message = dearmor_as(text, options, ArmorType::SignedMessage)?;
    signing::verify(&message, expected_signer)
}

/// Produce an armored `DETACHED SIGNATURE` over `data`.
pub fn sign_detached_and_armor(
    data: &[u8],
    signer: &SigningKeyPair,
    options: &ArmorOptions,
) -> Result<String> {
    let signature = signing::sign_detached(data, signer)?;
    armor(&signature, &labelled(options, ArmorType::DetachedSignature))
}

pub fn dearmor_and_verify_detached(
    signature_text: &str,
    data: &[u8],
    expected_signer: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<PublicKey> {
    let signature = dearmor_as(signature_text, options, ArmorType::DetachedSignature)?;
    signing::verify_detached(&signature, data, expected_signer)
}

/// Signcrypt, then armor as an `ENCRYPTED MESSAGE`.
pub fn signcrypt_and_armor(
    plaintext: &[u8],
    sender: Option<&SigningKeyPair>,
    recipients: &[SigncryptionRecipient],
    options: &ArmorOptions,
) -> Result<String> {
    let ciphertext = signcryption::signcrypt(plaintext, sender, recipients)?;
    armor(&ciphertext, &labelled(options, ArmorType::EncryptedMessage))
}

pub fn dearmor_and_designcrypt(
    text: &str,
    keys: &RecipientKeys,
    expected_sender: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<DecryptedMessage> {
    let ciphertext = dearmor_as(text, options, ArmorType::EncryptedMessage)?;
    signcryption::designcrypt(&ciphertext, keys, expected_sender)
}

pub fn encrypt_and_armor_stream(
    sender: Option<&BoxKeyPair>,
    recipients: &[Recipient],
    options: &ArmorOptions,
) -> Result<Pipeline<EncryptStream, ArmorStream>> {
    Ok(Pipeline::new(
        EncryptStream::new(sender, recipients)?,
        ArmorStream::new(labelled(options, ArmorType::EncryptedMessage))?,
    ))
}

pub fn dearmor_and_decrypt_stream(
    keypair: &BoxKeyPair,
    expected_sender: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<Pipeline<DearmorStream, DecryptStream>> {
    Ok(Pipeline::new(
        dearmor_stream(options, ArmorType::EncryptedMessage)?,
        DecryptStream::new(keypair, expected_sender),
    ))
}

pub fn sign_and_armor_stream(
    signer: &SigningKeyPair,
    options: &ArmorOptions,
) -> Result<Pipeline<SignStream, ArmorStream>> {
    Ok(Pipeline::new(
        SignStream::new(signer)?,
        ArmorStream::new(labelled(options, ArmorType::SignedMessage))?,
    ))
}

pub fn dearmor_and_verify_stream(
    expected_signer: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<Pipeline<DearmorStream, VerifyStream>> {
    Ok(Pipeline::new(
        dearmor_stream(options, ArmorType::SignedMessage)?,
        VerifyStream::new(expected_signer),
    ))
}

/// Data goes in; the armored signature comes out at finish.
pub fn sign_detached_and_armor_stream(
    signer: &SigningKeyPair,
    options: &ArmorOptions,
) -> Result<Pipeline<SignDetachedStream, ArmorStream>> {
    Ok(Pipeline::new(
        SignDetachedStream::new(signer)?,
        ArmorStream::new(labelled(options, ArmorType::DetachedSignature))?,
    ))
}

/// The armored signature is read up front; the returned stream takes the
/// signed data.
pub fn dearmor_and_verify_detached_stream(
    signature_text: &str,
    expected_signer: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<VerifyDetachedStream> {
    let signature = dearmor_as(signature_text, options, ArmorType::DetachedSignature)?;
    VerifyDetachedStream::new(&signature, expected_signer)
}

pub fn signcrypt_and_armor_stream(
    sender: Option<&SigningKeyPair>,
    recipients: &[SigncryptionRecipient],
    options: &ArmorOptions,
) -> Result<Pipeline<SigncryptStream, ArmorStream>> {
    Ok(Pipeline::new(
        SigncryptStream::new(sender, recipients)?,
        ArmorStream::new(labelled(options, ArmorType::EncryptedMessage))?,
    ))
}

pub fn dearmor_and_designcrypt_stream(
    keys: RecipientKeys,
    expected_sender: Option<&PublicKey>,
    options: &ArmorOptions,
) -> Result<Pipeline<DearmorStream, DesigncryptStream>> {
    Ok(Pipeline::new(
        dearmor_stream(options, ArmorType::EncryptedMessage)?,
        DesigncryptStream::new(keys, expected_sender),
    ))
}

/// Feed `data` through `stream` in `fragment`-sized pieces.
pub fn run_in_fragments<T: Transform + ?Sized>(
    stream: &mut T,
    data: &[u8],
    fragment: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for piece in data.chunks(fragment.max(1)) {
        for unit in stream.feed(piece)? {
            out.extend_from_slice(&unit);
        }
    }
    for unit in stream.finish()? {
        out.extend_from_slice(&unit);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, ErrorKind};
    use crate::keys::KEY_LEN;

    const POEM: &[u8] = b"Two roads diverged in a yellow wood, and sorry I could not travel both\n\
and be one traveller, long I stood, and looked down one as far as I\n\
could, to where it bent in the undergrowth.";

    fn box_key(seed: u8) -> BoxKeyPair {
        BoxKeyPair::from_seed(&[seed; KEY_LEN])
    }

    fn signing_key(seed: u8) -> SigningKeyPair {
        SigningKeyPair::from_seed(&[seed; KEY_LEN])
    }

    #[test]
    fn test_encrypt_and_armor_roundtrip() {
        let options = ArmorOptions::default();
        let text = encrypt_and_armor(POEM, Some(&box_key(1)), &[(&box_key(2)).into()], &options).unwrap();
        assert!(text.starts_with("BEGIN SALTPACK ENCRYPTED MESSAGE. "));
        assert!(text.ends_with(". END SALTPACK ENCRYPTED MESSAGE."));

        let opened = dearmor_and_decrypt(&text, &box_key(2), Some(box_key(1).public_key()), &options).unwrap();
        assert_eq!(opened.plaintext, POEM);
    }

    #[test]
    fn test_sign_and_armor_roundtrip() {
        let options = ArmorOptions::default().with_app_name("Test");
        let text = sign_and_armor(POEM, &signing_key(0), &options).unwrap();
        assert!(text.starts_with("BEGIN Test SALTPACK SIGNED MESSAGE. "));
        let verified = dearmor_and_verify(&text, None, &options).unwrap();
        assert_eq!(verified.plaintext, POEM);
        assert_eq!(verified.signer, signing_key(0).public_key());
    }

    #[test]
    fn test_detached_and_armor_roundtrip() {
        let options = ArmorOptions::default();
        let text = sign_detached_and_armor(POEM, &signing_key(3), &options).unwrap();
        assert!(text.starts_with("BEGIN SALTPACK DETACHED SIGNATURE. "));
        let signer = dearmor_and_verify_detached(&text, POEM, None, &options).unwrap();
        assert_eq!(signer, signing_key(3).public_key());

        let err = dearmor_and_verify_detached(&text, b"other data", None, &options)
            .expect_err("expected verification failure");
        assert_eq!(err.category, ErrorCategory::Verify);
    }

    #[test]
    fn test_signcrypt_and_armor_roundtrip() {
        let options = ArmorOptions::default();
        let text =
            signcrypt_and_armor(POEM, Some(&signing_key(1)), &[(&box_key(2)).into()], &options).unwrap();
        let opened = dearmor_and_designcrypt(&text, &(&box_key(2)).into(), None, &options).unwrap();
        assert_eq!(opened.plaintext, POEM);
        assert_eq!(opened.sender, Some(signing_key(1).public_key()));
    }

    #[test]
    fn test_wrong_armor_label_rejected() {
        let options = ArmorOptions::default();
        let signed = sign_and_armor(POEM, &signing_key(0), &options).unwrap();
        let err = dearmor_and_decrypt(&signed, &box_key(2), None, &options)
            .expect_err("expected label mismatch");
        assert_eq!(err.category, ErrorCategory::MalformedFraming);
        assert_eq!(err.kind, Some(ErrorKind::ArmorFrameMismatch));
    }

    #[test]
    fn test_generic_label_accepted() {
        let options = ArmorOptions::default();
        let message = signing::sign(POEM, &signing_key(0)).unwrap();
        let text = armor(&message, &options).unwrap();
        assert!(text.starts_with("BEGIN SALTPACK MESSAGE. "));
        assert_eq!(dearmor_and_verify(&text, None, &options).unwrap().plaintext, POEM);
    }

    #[test]
    fn test_stream_pipelines_roundtrip() {
        let options = ArmorOptions::default().with_stream_chunk_size(64);

        let mut encrypter =
            encrypt_and_armor_stream(None, &[(&box_key(2)).into()], &options).unwrap();
        let text = run_in_fragments(&mut encrypter, POEM, 17).unwrap();
        let mut decrypter = dearmor_and_decrypt_stream(&box_key(2), None, &options).unwrap();
        assert_eq!(run_in_fragments(&mut decrypter, &text, 9).unwrap(), POEM);
        assert_eq!(
            decrypter.first().frame().map(|f| f.message_type),
            Some(ArmorType::EncryptedMessage)
        );

        let mut signer = sign_and_armor_stream(&signing_key(4), &options).unwrap();
        let text = run_in_fragments(&mut signer, POEM, 5).unwrap();
        let mut verifier = dearmor_and_verify_stream(Some(&signing_key(4).public_key()), &options).unwrap();
        assert_eq!(run_in_fragments(&mut verifier, &text, 3).unwrap(), POEM);

        let mut signcrypter =
            signcrypt_and_armor_stream(None, &[(&box_key(5)).into()], &options).unwrap();
        let text = run_in_fragments(&mut signcrypter, POEM, 100).unwrap();
        let mut designcrypter =
            dearmor_and_designcrypt_stream((&box_key(5)).into(), None, &options).unwrap();
        assert_eq!(run_in_fragments(&mut designcrypter, &text, 1).unwrap(), POEM);
        assert_eq!(designcrypter.second().sender(), None);
    }

    #[test]
    fn test_detached_stream_pipeline() {
        let options = ArmorOptions::default();
        let mut signer = sign_detached_and_armor_stream(&signing_key(6), &options).unwrap();
        let text = run_in_fragments(&mut signer, POEM, 10).unwrap();
        let text = String::from_utf8(text).unwrap();
        assert!(text.ends_with("END SALTPACK DETACHED SIGNATURE."));

        let mut verifier = dearmor_and_verify_detached_stream(&text, None, &options).unwrap();
        assert!(run_in_fragments(&mut verifier, POEM, 8).unwrap().is_empty());
        assert_eq!(verifier.signer(), signing_key(6).public_key());
    }
}
