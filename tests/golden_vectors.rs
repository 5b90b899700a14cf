use saltpack::armor::{self, ArmorOptions, ArmorType};
use saltpack::encryption::{self, Recipient};
use saltpack::random::FixedRandom;
use saltpack::signcryption::{self, RecipientKeys, SigncryptionRecipient};
use saltpack::signing;
use saltpack::stream::{EncryptStream, SignStream, SigncryptStream, collect};
use saltpack::{BoxKeyPair, SigningKeyPair};
use serde::Deserialize;

const GOLDEN_VECTORS: &str = include_str!("../testdata/golden-vectors.json");

#[derive(Debug, Deserialize)]
struct GoldenVector {
    kind: String,
    comment: String,
    plaintext: String,
    sender_seed: Option<String>,
    recipient_seeds: Vec<String>,
    chunk_size: Option<usize>,
    message: String,
    armored: String,
}

impl GoldenVector {
    fn plaintext(&self) -> Vec<u8> {
        hex::decode(&self.plaintext).expect("failed to decode plaintext")
    }

    fn message(&self) -> Vec<u8> {
        hex::decode(&self.message).expect("failed to decode message")
    }

    fn sender_seed(&self) -> Option<[u8; 32]> {
        self.sender_seed.as_deref().map(seed)
    }

    fn recipient_box_keys(&self) -> Vec<BoxKeyPair> {
        self.recipient_seeds
            .iter()
            .map(|s| BoxKeyPair::from_seed(&seed(s)))
            .collect()
    }

    fn armor_type(&self) -> ArmorType {
        match self.kind.as_str() {
            "encryption" | "signcryption" => ArmorType::EncryptedMessage,
            "attached_signature" => ArmorType::SignedMessage,
            "detached_signature" => ArmorType::DetachedSignature,
            other => panic!("unknown vector kind {other}"),
        }
    }
}

fn seed(text: &str) -> [u8; 32] {
    hex::decode(text)
        .expect("failed to decode seed")
        .try_into()
        .expect("seed must be 32 bytes")
}

fn load_vectors() -> Vec<GoldenVector> {
    serde_json::from_str(GOLDEN_VECTORS).expect("failed to parse golden vectors")
}

/// Rebuild the vector's message from its keys with zeroed randomness.
fn produce(vector: &GoldenVector) -> saltpack::Result<Vec<u8>> {
    let plaintext = vector.plaintext();
    let mut random = FixedRandom::zeroed();
    match vector.kind.as_str() {
        "encryption" => {
            let sender = vector.sender_seed().map(|s| BoxKeyPair::from_seed(&s));
            let recipients: Vec<Recipient> = vector
                .recipient_box_keys()
                .iter()
                .map(|k| Recipient::new(*k.public_key()))
                .collect();
            match vector.chunk_size {
                Some(size) => {
                    let mut stream =
                        EncryptStream::with_random(sender.as_ref(), &recipients, &mut random)?
                            .with_chunk_size(size)?;
                    collect(&mut stream, &plaintext)
                }
                None => encryption::encrypt_with(&plaintext, sender.as_ref(), &recipients, &mut random),
            }
        }
        "attached_signature" => {
            let signer = SigningKeyPair::from_seed(&vector.sender_seed().expect("signer seed"));
            match vector.chunk_size {
                Some(size) => {
                    let mut stream =
                        SignStream::with_random(&signer, &mut random)?.with_chunk_size(size)?;
                    collect(&mut stream, &plaintext)
                }
                None => signing::sign_with(&plaintext, &signer, &mut random),
            }
        }
        "detached_signature" => {
            let signer = SigningKeyPair::from_seed(&vector.sender_seed().expect("signer seed"));
            signing::sign_detached_with(&plaintext, &signer, &mut random)
        }
        "signcryption" => {
            let sender = vector.sender_seed().map(|s| SigningKeyPair::from_seed(&s));
            let recipients: Vec<SigncryptionRecipient> = vector
                .recipient_box_keys()
                .iter()
                .map(SigncryptionRecipient::from)
                .collect();
            match vector.chunk_size {
                Some(size) => {
                    let mut stream =
                        SigncryptStream::with_random(sender.as_ref(), &recipients, &mut random)?
                            .with_chunk_size(size)?;
                    collect(&mut stream, &plaintext)
                }
                None => {
                    signcryption::signcrypt_with(&plaintext, sender.as_ref(), &recipients, &mut random)
                }
            }
        }
        other => panic!("unknown vector kind {other}"),
    }
}

/// Open the vector's message with every recipient (or the signer's key).
fn check_opens(vector: &GoldenVector, message: &[u8]) -> saltpack::Result<()> {
    let plaintext = vector.plaintext();
    match vector.kind.as_str() {
        "encryption" => {
            let sender = vector
                .sender_seed()
                .map(|s| *BoxKeyPair::from_seed(&s).public_key());
            for keypair in vector.recipient_box_keys() {
                let opened = encryption::decrypt(message, &keypair, None)?;
                assert_eq!(opened.plaintext, plaintext, "{}", vector.comment);
                assert_eq!(opened.sender, sender, "{}", vector.comment);
            }
        }
        "attached_signature" => {
            let signer = SigningKeyPair::from_seed(&vector.sender_seed().expect("signer seed"));
            let verified = signing::verify(message, Some(&signer.public_key()))?;
            assert_eq!(verified.plaintext, plaintext, "{}", vector.comment);
        }
        "detached_signature" => {
            let signer = SigningKeyPair::from_seed(&vector.sender_seed().expect("signer seed"));
            let key = signing::verify_detached(message, &plaintext, None)?;
            assert_eq!(key, signer.public_key(), "{}", vector.comment);
        }
        "signcryption" => {
            let sender = vector
                .sender_seed()
                .map(|s| SigningKeyPair::from_seed(&s).public_key());
            for keypair in vector.recipient_box_keys() {
                let keys = RecipientKeys::new().with_box_key(keypair);
                let opened = signcryption::designcrypt(message, &keys, None)?;
                assert_eq!(opened.plaintext, plaintext, "{}", vector.comment);
                assert_eq!(opened.sender, sender, "{}", vector.comment);
            }
        }
        other => panic!("unknown vector kind {other}"),
    }
    Ok(())
}

/// Check the given vectors. An empty index list means all vectors.
fn run_golden_vector_tests(indices: &[usize]) {
    let vectors = load_vectors();
    let selected: Vec<usize> = if indices.is_empty() {
        (0..vectors.len()).collect()
    } else {
        indices.to_vec()
    };

    let mut passed = 0;
    let mut failed = 0;

    for i in selected {
        let vector = &vectors[i];
        let expected = vector.message();
        let options = ArmorOptions::default().with_message_type(vector.armor_type());

        let produced = match produce(vector) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Vector {}: FAILED to produce - {}", i, e);
                eprintln!("  Comment: {}", vector.comment);
                failed += 1;
                continue;
            }
        };
        if produced != expected {
            eprintln!("Vector {}: FAILED - message mismatch", i);
            eprintln!("  Comment: {}", vector.comment);
            eprintln!("  Expected: {}", vector.message);
            eprintln!("  Actual:   {}", hex::encode(&produced));
            failed += 1;
            continue;
        }

        match armor::armor(&expected, &options) {
            Ok(text) if text == vector.armored => {}
            Ok(text) => {
                eprintln!("Vector {}: FAILED - armor mismatch", i);
                eprintln!("  Comment: {}", vector.comment);
                eprintln!("  Expected: {}", vector.armored);
                eprintln!("  Actual:   {}", text);
                failed += 1;
                continue;
            }
            Err(e) => {
                eprintln!("Vector {}: FAILED to armor - {}", i, e);
                failed += 1;
                continue;
            }
        }

        let dearmored = match armor::dearmor(&vector.armored, &options) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Vector {}: FAILED to dearmor - {}", i, e);
                eprintln!("  Comment: {}", vector.comment);
                failed += 1;
                continue;
            }
        };
        if dearmored != expected {
            eprintln!("Vector {}: FAILED - dearmored bytes differ", i);
            failed += 1;
            continue;
        }

        if let Err(e) = check_opens(vector, &dearmored) {
            eprintln!("Vector {}: FAILED to open - {}", i, e);
            eprintln!("  Comment: {}", vector.comment);
            failed += 1;
            continue;
        }

        passed += 1;
    }

    eprintln!("\nGolden vector results: {} passed, {} failed", passed, failed);
    assert_eq!(failed, 0, "{} golden vector(s) failed", failed);
}

#[test]
fn test_all_golden_vectors() {
    run_golden_vector_tests(&[]);
}

#[test]
fn test_encryption_vectors() {
    run_golden_vector_tests(&[0, 1, 2, 3]);
}

#[test]
fn test_signature_vectors() {
    run_golden_vector_tests(&[4, 5, 6]);
}

#[test]
fn test_signcryption_vectors() {
    run_golden_vector_tests(&[7, 8, 9]);
}

#[test]
fn test_vector_kinds_are_known() {
    for vector in load_vectors() {
        let _ = vector.armor_type();
    }
}
