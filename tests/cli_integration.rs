//! CLI integration tests
//!
//! Tests the command-line interface end-to-end.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Get path to the saltpack binary
fn saltpack_bin() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps/
    path.push("saltpack");
    path
}

fn run_saltpack(args: &[&str]) -> Output {
    Command::new(saltpack_bin())
        .args(args)
        .env_remove("SALTPACK_LOG")
        .output()
        .expect("failed to run saltpack")
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{} failed: {}",
        what,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Generate a key file and return its public key hex.
fn keygen(dir: &Path, name: &str, kind: &str) -> (PathBuf, String) {
    let key = dir.join(name);
    let output = run_saltpack(&["keygen", "--kind", kind, "-o", path_str(&key)]);
    assert_success(&output, "keygen");
    let public = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert_eq!(public.len(), 64);
    (key, public)
}

#[test]
fn test_keygen_and_public_key() {
    let temp_dir = TempDir::new().unwrap();
    let (key, public) = keygen(temp_dir.path(), "alice.key", "box");

    let output = run_saltpack(&["public-key", "-k", path_str(&key)]);
    assert_success(&output, "public-key");
    assert_eq!(String::from_utf8(output.stdout).unwrap().trim(), public);

    let output = run_saltpack(&["keygen", "-o", path_str(&key)]);
    assert!(!output.status.success(), "keygen overwrote an existing key");
}

#[test]
fn test_encrypt_decrypt_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let (alice, alice_public) = keygen(temp_dir.path(), "alice.key", "box");
    let (bob, bob_public) = keygen(temp_dir.path(), "bob.key", "box");
    let plain = temp_dir.path().join("plain.txt");
    let crypt = temp_dir.path().join("plain.txt.saltpack");
    let decrypted = temp_dir.path().join("decrypted.txt");
    fs::write(&plain, "Hello, saltpack!\n").unwrap();

    let output = run_saltpack(&[
        "encrypt",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&crypt),
        "-r",
        &bob_public,
        "-k",
        path_str(&alice),
    ]);
    assert_success(&output, "encrypt");
    let armored = fs::read_to_string(&crypt).unwrap();
    assert!(armored.starts_with("BEGIN SALTPACK ENCRYPTED MESSAGE."));

    let output = run_saltpack(&[
        "decrypt",
        "-i",
        path_str(&crypt),
        "-o",
        path_str(&decrypted),
        "-k",
        path_str(&bob),
        "--sender",
        &alice_public,
    ]);
    assert_success(&output, "decrypt");
    assert!(String::from_utf8_lossy(&output.stderr).contains(&alice_public));
    assert_eq!(fs::read(&decrypted).unwrap(), fs::read(&plain).unwrap());
}

#[test]
fn test_decrypt_with_wrong_key_fails() {
    let temp_dir = TempDir::new().unwrap();
    let (_, bob_public) = keygen(temp_dir.path(), "bob.key", "box");
    let (mallory, _) = keygen(temp_dir.path(), "mallory.key", "box");
    let plain = temp_dir.path().join("plain.txt");
    let crypt = temp_dir.path().join("plain.bin");
    let decrypted = temp_dir.path().join("decrypted.txt");
    fs::write(&plain, "for bob only").unwrap();

    let output = run_saltpack(&[
        "encrypt",
        "--binary",
        "--hide-recipients",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&crypt),
        "-r",
        &bob_public,
    ]);
    assert_success(&output, "encrypt");

    let output = run_saltpack(&[
        "decrypt",
        "--binary",
        "-i",
        path_str(&crypt),
        "-o",
        path_str(&decrypted),
        "-k",
        path_str(&mallory),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("Error:"));
    assert!(!decrypted.exists());
}

#[test]
fn test_decrypt_nonexistent_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let (bob, _) = keygen(temp_dir.path(), "bob.key", "box");
    let output_path = temp_dir.path().join("out.txt");

    let output = run_saltpack(&[
        "decrypt",
        "-i",
        path_str(&temp_dir.path().join("missing.saltpack")),
        "-o",
        path_str(&output_path),
        "-k",
        path_str(&bob),
    ]);
    assert!(!output.status.success());
    assert!(!output_path.exists());
}

#[test]
fn test_decrypt_known_message() {
    #[derive(serde::Deserialize)]
    struct Vector {
        recipient_seeds: Vec<String>,
        plaintext: String,
        armored: String,
    }

    let vectors: Vec<Vector> =
        serde_json::from_str(include_str!("../testdata/golden-vectors.json")).unwrap();
    let vector = &vectors[0];

    let temp_dir = TempDir::new().unwrap();
    let key = temp_dir.path().join("recipient.key");
    let crypt = temp_dir.path().join("message.saltpack");
    let decrypted = temp_dir.path().join("message.txt");
    fs::write(&key, format!("{}\n", vector.recipient_seeds[0])).unwrap();
    fs::write(&crypt, &vector.armored).unwrap();

    let output = run_saltpack(&[
        "decrypt",
        "-i",
        path_str(&crypt),
        "-o",
        path_str(&decrypted),
        "-k",
        path_str(&key),
    ]);
    assert_success(&output, "decrypt");
    assert_eq!(hex::encode(fs::read(&decrypted).unwrap()), vector.plaintext);
}

#[test]
fn test_sign_verify_attached() {
    let temp_dir = TempDir::new().unwrap();
    let (key, public) = keygen(temp_dir.path(), "signer.key", "signing");
    let plain = temp_dir.path().join("plain.txt");
    let signed = temp_dir.path().join("plain.signed");
    let verified = temp_dir.path().join("verified.txt");
    fs::write(&plain, "signed words").unwrap();

    let output = run_saltpack(&[
        "sign",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&signed),
        "-k",
        path_str(&key),
    ]);
    assert_success(&output, "sign");
    assert!(fs::read_to_string(&signed).unwrap().starts_with("BEGIN SALTPACK SIGNED MESSAGE."));

    let output = run_saltpack(&[
        "verify",
        "-i",
        path_str(&signed),
        "-o",
        path_str(&verified),
        "--signer",
        &public,
    ]);
    assert_success(&output, "verify");
    assert!(String::from_utf8_lossy(&output.stderr).contains(&public));
    assert_eq!(fs::read(&verified).unwrap(), b"signed words");
}

#[test]
fn test_sign_verify_detached() {
    let temp_dir = TempDir::new().unwrap();
    let (key, public) = keygen(temp_dir.path(), "signer.key", "signing");
    let plain = temp_dir.path().join("release.tar");
    let signature = temp_dir.path().join("release.tar.sig");
    fs::write(&plain, vec![7u8; 5000]).unwrap();

    let output = run_saltpack(&[
        "sign",
        "--detached",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&signature),
        "-k",
        path_str(&key),
    ]);
    assert_success(&output, "sign --detached");

    let output = run_saltpack(&[
        "verify",
        "-i",
        path_str(&plain),
        "--signature",
        path_str(&signature),
        "--signer",
        &public,
    ]);
    assert_success(&output, "verify --signature");

    fs::write(&plain, vec![8u8; 5000]).unwrap();
    let output = run_saltpack(&[
        "verify",
        "-i",
        path_str(&plain),
        "--signature",
        path_str(&signature),
    ]);
    assert!(!output.status.success(), "tampered data verified");
}

#[test]
fn test_verify_requires_output_or_signature() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("input");
    fs::write(&input, "x").unwrap();

    let output = run_saltpack(&["verify", "-i", path_str(&input)]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--signature"));
}

#[test]
fn test_signcrypt_designcrypt_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let (signer, signer_public) = keygen(temp_dir.path(), "signer.key", "signing");
    let (bob, bob_public) = keygen(temp_dir.path(), "bob.key", "box");
    let plain = temp_dir.path().join("plain.txt");
    let crypt = temp_dir.path().join("plain.saltpack");
    let decrypted = temp_dir.path().join("decrypted.txt");
    fs::write(&plain, "signcrypted hello").unwrap();

    let output = run_saltpack(&[
        "signcrypt",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&crypt),
        "-r",
        &bob_public,
        "-k",
        path_str(&signer),
    ]);
    assert_success(&output, "signcrypt");

    let output = run_saltpack(&[
        "designcrypt",
        "-i",
        path_str(&crypt),
        "-o",
        path_str(&decrypted),
        "-k",
        path_str(&bob),
        "--sender",
        &signer_public,
    ]);
    assert_success(&output, "designcrypt");
    assert_eq!(fs::read(&decrypted).unwrap(), b"signcrypted hello");
}

#[test]
fn test_signcrypt_symmetric_key() {
    let temp_dir = TempDir::new().unwrap();
    let plain = temp_dir.path().join("plain.txt");
    let crypt = temp_dir.path().join("plain.saltpack");
    let decrypted = temp_dir.path().join("decrypted.txt");
    let key = "11".repeat(32);
    fs::write(&plain, "team secret").unwrap();

    let output = run_saltpack(&[
        "signcrypt",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&crypt),
        "--symmetric",
        &format!("team={}", key),
    ]);
    assert_success(&output, "signcrypt --symmetric");

    let output = run_saltpack(&[
        "designcrypt",
        "-i",
        path_str(&crypt),
        "-o",
        path_str(&decrypted),
        "--symmetric",
        &key,
    ]);
    assert_success(&output, "designcrypt --symmetric");
    assert!(String::from_utf8_lossy(&output.stderr).contains("anonymous"));
    assert_eq!(fs::read(&decrypted).unwrap(), b"team secret");
}

#[test]
fn test_armor_dearmor_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let data = temp_dir.path().join("data.bin");
    let armored = temp_dir.path().join("data.txt");
    let restored = temp_dir.path().join("restored.bin");
    let content: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    fs::write(&data, &content).unwrap();

    for alphabet in ["base62", "base64", "base85"] {
        for raw in [false, true] {
            if alphabet == "base85" && !raw {
                continue;
            }
            let mut args = vec![
                "armor",
                "-i",
                path_str(&data),
                "-o",
                path_str(&armored),
                "--alphabet",
                alphabet,
            ];
            if raw {
                args.push("--raw");
            }
            let output = run_saltpack(&args);
            assert_success(&output, "armor");

            args[0] = "dearmor";
            args[2] = path_str(&armored);
            args[4] = path_str(&restored);
            let output = run_saltpack(&args);
            assert_success(&output, "dearmor");
            assert_eq!(fs::read(&restored).unwrap(), content, "{alphabet} raw={raw}");
        }
    }
}

#[test]
fn test_armor_message_type_and_app_name() {
    let temp_dir = TempDir::new().unwrap();
    let data = temp_dir.path().join("data.bin");
    let armored = temp_dir.path().join("data.txt");
    fs::write(&data, b"payload").unwrap();

    let output = run_saltpack(&[
        "armor",
        "-i",
        path_str(&data),
        "-o",
        path_str(&armored),
        "--message-type",
        "signed",
        "--app-name",
        "KEYBASE",
    ]);
    assert_success(&output, "armor");
    let text = fs::read_to_string(&armored).unwrap();
    assert!(text.starts_with("BEGIN KEYBASE SALTPACK SIGNED MESSAGE."));
    assert!(text.ends_with("END KEYBASE SALTPACK SIGNED MESSAGE."));
}

#[test]
fn test_empty_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let (bob, bob_public) = keygen(temp_dir.path(), "bob.key", "box");
    let plain = temp_dir.path().join("empty.txt");
    let crypt = temp_dir.path().join("empty.saltpack");
    let decrypted = temp_dir.path().join("decrypted.txt");
    fs::write(&plain, b"").unwrap();

    let output = run_saltpack(&[
        "encrypt",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&crypt),
        "-r",
        &bob_public,
    ]);
    assert_success(&output, "encrypt");

    let output = run_saltpack(&[
        "decrypt",
        "-i",
        path_str(&crypt),
        "-o",
        path_str(&decrypted),
        "-k",
        path_str(&bob),
    ]);
    assert_success(&output, "decrypt");
    assert_eq!(fs::read(&decrypted).unwrap(), b"");
}

#[test]
fn test_large_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let (bob, bob_public) = keygen(temp_dir.path(), "bob.key", "box");
    let plain = temp_dir.path().join("large.bin");
    let crypt = temp_dir.path().join("large.saltpack");
    let decrypted = temp_dir.path().join("decrypted.bin");
    // Spans more than one 1 MiB payload chunk.
    let content: Vec<u8> = (0..(1024 * 1024 + 4096)).map(|i| (i % 251) as u8).collect();
    fs::write(&plain, &content).unwrap();

    let output = run_saltpack(&[
        "encrypt",
        "--binary",
        "-i",
        path_str(&plain),
        "-o",
        path_str(&crypt),
        "-r",
        &bob_public,
    ]);
    assert_success(&output, "encrypt");

    let output = run_saltpack(&[
        "decrypt",
        "--binary",
        "-i",
        path_str(&crypt),
        "-o",
        path_str(&decrypted),
        "-k",
        path_str(&bob),
    ]);
    assert_success(&output, "decrypt");
    assert_eq!(fs::read(&decrypted).unwrap(), content);
}
