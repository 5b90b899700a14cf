//! Whole-file operations
//!
//! Every operation streams its input through the matching transform and
//! writes into a temporary file next to the destination, which is only
//! renamed into place once the transform has finished without error. A
//! message that fails to decrypt or verify therefore never leaves partial
//! plaintext behind.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use rand::RngCore;
use rand::rngs::OsRng;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::armor::{ArmorOptions, ArmorStream, ArmorType, DearmorStream};
use crate::encryption::Recipient;
use crate::error::{ErrorCategory, ErrorKind, Result, SaltpackError};
use crate::facade::{dearmor_stream, labelled};
use crate::keys::{self, BoxKeyPair, KEY_LEN, PublicKey, SigningKeyPair};
use crate::signcryption::{RecipientKeys, SigncryptionRecipient};
use crate::stream::{
    DecryptStream, DesigncryptStream, EncryptStream, Pipeline, SignDetachedStream, SignStream,
    SigncryptStream, Transform, VerifyDetachedStream, VerifyStream,
};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Which kind of key a key file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// X25519, for encryption and as a signcryption recipient.
    Box,
    /// Ed25519, for signing and as a signcryption sender.
    Signing,
}

/// Generate a key, write its hex seed to `path` and return the public key.
///
/// The key file is created with mode 0o600 on Unix and must not exist yet.
pub fn generate_key_file(path: &Path, kind: KeyKind) -> Result<PublicKey> {
    if path.exists() {
        return Err(SaltpackError::with_kind(
            ErrorCategory::Argument,
            ErrorKind::InvalidOption,
            format!("refusing to overwrite existing key file {}", path.display()),
        ));
    }
    let mut seed = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut *seed);
    let public = public_key_for(&seed, kind);

    let text = Zeroizing::new(format!("{}\n", hex::encode(seed.as_slice())));
    let mut temp = temp_file_beside(path)?;
    temp.write_all(text.as_bytes())
        .map_err(|e| write_error(path, e))?;
    persist_secure(temp, path)?;

    info!(kind = ?kind, public = %hex::encode(public), "generated key");
    Ok(public)
}

/// Read a hex seed written by [`generate_key_file`].
pub fn read_key_seed(path: &Path) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let text = Zeroizing::new(fs::read_to_string(path).map_err(|e| read_error(path, e))?);
    keys::parse_hex_key(&text)
        .map(Zeroizing::new)
        .map_err(|e| e.with_context(format!("invalid key file {}", path.display())))
}

pub fn read_box_key(path: &Path) -> Result<BoxKeyPair> {
    read_key_seed(path).map(|seed| BoxKeyPair::from_seed(&seed))
}

pub fn read_signing_key(path: &Path) -> Result<SigningKeyPair> {
    read_key_seed(path).map(|seed| SigningKeyPair::from_seed(&seed))
}

/// Public key belonging to the key file at `path`.
pub fn public_key_of(path: &Path, kind: KeyKind) -> Result<PublicKey> {
    read_key_seed(path).map(|seed| public_key_for(&seed, kind))
}

fn public_key_for(seed: &[u8; KEY_LEN], kind: KeyKind) -> PublicKey {
    match kind {
        KeyKind::Box => *BoxKeyPair::from_seed(seed).public_key(),
        KeyKind::Signing => SigningKeyPair::from_seed(seed).public_key(),
    }
}

/// Encrypt `input` into `output`, armored unless `armor` is `None`.
pub fn encrypt_file(
    input: &Path,
    output: &Path,
    sender: Option<&BoxKeyPair>,
    recipients: &[Recipient],
    armor: Option<&ArmorOptions>,
) -> Result<()> {
    let stream = EncryptStream::new(sender, recipients)?;
    encode_file(input, output, stream, armor, ArmorType::EncryptedMessage)
        .map_err(|e| e.with_context("encryption failed"))
}

/// Decrypt `input` into `output`, returning the sender (`None` if anonymous).
pub fn decrypt_file(
    input: &Path,
    output: &Path,
    keypair: &BoxKeyPair,
    expected_sender: Option<&PublicKey>,
    armor: Option<&ArmorOptions>,
) -> Result<Option<PublicKey>> {
    let stream = DecryptStream::new(keypair, expected_sender);
    let stream = decode_file(input, output, stream, armor, ArmorType::EncryptedMessage)
        .map_err(|e| e.with_context("failed to decrypt"))?;
    Ok(stream.sender())
}

/// Write an attached signed message for `input`.
pub fn sign_file(
    input: &Path,
    output: &Path,
    signer: &SigningKeyPair,
    armor: Option<&ArmorOptions>,
) -> Result<()> {
    let stream = SignStream::new(signer)?;
    encode_file(input, output, stream, armor, ArmorType::SignedMessage)
        .map_err(|e| e.with_context("signing failed"))
}

/// Write a detached signature over `input`.
pub fn sign_detached_file(
    input: &Path,
    output: &Path,
    signer: &SigningKeyPair,
    armor: Option<&ArmorOptions>,
) -> Result<()> {
    let stream = SignDetachedStream::new(signer)?;
    encode_file(input, output, stream, armor, ArmorType::DetachedSignature)
        .map_err(|e| e.with_context("signing failed"))
}

/// Verify an attached signed message, writing its contents to `output`.
pub fn verify_file(
    input: &Path,
    output: &Path,
    expected_signer: Option<&PublicKey>,
    armor: Option<&ArmorOptions>,
) -> Result<PublicKey> {
    let stream = VerifyStream::new(expected_signer);
    let stream = decode_file(input, output, stream, armor, ArmorType::SignedMessage)
        .map_err(|e| e.with_context("failed to verify"))?;
    stream.signer().ok_or_else(|| SaltpackError::internal("verified message has no signer"))
}

/// Verify the detached signature in `signature` against the contents of `input`.
pub fn verify_detached_file(
    input: &Path,
    signature: &Path,
    expected_signer: Option<&PublicKey>,
    armor: Option<&ArmorOptions>,
) -> Result<PublicKey> {
    let signature_bytes = fs::read(signature).map_err(|e| read_error(signature, e))?;
    let signature_bytes = match armor {
        Some(options) => {
            let mut dearmor = dearmor_stream(options, ArmorType::DetachedSignature)?;
            crate::stream::collect(&mut dearmor, &signature_bytes)
                .map_err(|e| e.with_context("failed to dearmor signature"))?
        }
        None => signature_bytes,
    };

    let mut stream = VerifyDetachedStream::new(&signature_bytes, expected_signer)?;
    read_through(input, &mut stream, |_| Ok(()))
        .map_err(|e| e.with_context("failed to verify"))?;
    Ok(stream.signer())
}

/// Signcrypt `input` into `output`; `None` as sender sends anonymously.
pub fn signcrypt_file(
    input: &Path,
    output: &Path,
    sender: Option<&SigningKeyPair>,
    recipients: &[SigncryptionRecipient],
    armor: Option<&ArmorOptions>,
) -> Result<()> {
    let stream = SigncryptStream::new(sender, recipients)?;
    encode_file(input, output, stream, armor, ArmorType::EncryptedMessage)
        .map_err(|e| e.with_context("signcryption failed"))
}

/// Designcrypt `input` into `output`, returning the sender (`None` if anonymous).
pub fn designcrypt_file(
    input: &Path,
    output: &Path,
    keys: RecipientKeys,
    expected_sender: Option<&PublicKey>,
    armor: Option<&ArmorOptions>,
) -> Result<Option<PublicKey>> {
    let stream = DesigncryptStream::new(keys, expected_sender);
    let stream = decode_file(input, output, stream, armor, ArmorType::EncryptedMessage)
        .map_err(|e| e.with_context("failed to designcrypt"))?;
    Ok(stream.sender())
}

/// Armor arbitrary binary data.
pub fn armor_file(input: &Path, output: &Path, options: &ArmorOptions) -> Result<()> {
    let mut stream = ArmorStream::new(options.clone())?;
    pump(input, output, &mut stream).map_err(|e| e.with_context("failed to armor"))
}

/// Dearmor text produced by [`armor_file`] (or any other armorer).
pub fn dearmor_file(input: &Path, output: &Path, options: &ArmorOptions) -> Result<()> {
    let mut stream = DearmorStream::new(options.clone())?;
    pump(input, output, &mut stream).map_err(|e| e.with_context("failed to dearmor"))
}

fn encode_file<S: Transform>(
    input: &Path,
    output: &Path,
    stream: S,
    armor: Option<&ArmorOptions>,
    message_type: ArmorType,
) -> Result<()> {
    match armor {
        Some(options) => {
            let armorer = ArmorStream::new(labelled(options, message_type))?;
            pump(input, output, &mut Pipeline::new(stream, armorer))
        }
        None => {
            let mut stream = stream;
            pump(input, output, &mut stream)
        }
    }
}

/// Run `stream` from `input` to `output` and hand the stream back so the
/// caller can ask it about the message.
fn decode_file<S: Transform>(
    input: &Path,
    output: &Path,
    stream: S,
    armor: Option<&ArmorOptions>,
    message_type: ArmorType,
) -> Result<S> {
    match armor {
        Some(options) => {
            let mut pipeline = Pipeline::new(dearmor_stream(options, message_type)?, stream);
            pump(input, output, &mut pipeline)?;
            Ok(pipeline.into_inner().1)
        }
        None => {
            let mut stream = stream;
            pump(input, output, &mut stream)?;
            Ok(stream)
        }
    }
}

/// Stream `input` through `stream` into a fresh file at `output`.
fn pump<T: Transform + ?Sized>(input: &Path, output: &Path, stream: &mut T) -> Result<()> {
    let mut temp = temp_file_beside(output)?;
    let mut written = 0usize;
    read_through(input, stream, |unit| {
        written += unit.len();
        temp.write_all(unit).map_err(|e| write_error(output, e))
    })?;
    persist_secure(temp, output)?;
    debug!(output = %output.display(), bytes = written, "wrote output file");
    Ok(())
}

fn read_through<T: Transform + ?Sized>(
    input: &Path,
    stream: &mut T,
    mut sink: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut file = File::open(input).map_err(|e| read_error(input, e))?;
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(input, e)),
        };
        for unit in stream.feed(&buf[..n])? {
            sink(&unit)?;
        }
    }
    for unit in stream.finish()? {
        sink(&unit)?;
    }
    Ok(())
}

fn temp_file_beside(path: &Path) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    NamedTempFile::new_in(dir).map_err(|e| {
        SaltpackError::with_kind_and_source(
            ErrorCategory::Io,
            ErrorKind::Io,
            format!("failed to create temporary file in {}", dir.display()),
            e,
        )
    })
}

/// Flush, fsync, restrict to the owner and rename into place.
fn persist_secure(mut temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.flush().map_err(|e| write_error(path, e))?;
    // fsync before the rename so a successful rename always names a complete file
    temp.as_file().sync_all().map_err(|e| {
        SaltpackError::with_kind_and_source(
            ErrorCategory::Io,
            ErrorKind::Io,
            "failed to sync file prior to rename",
            e,
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| {
                SaltpackError::with_kind_and_source(
                    ErrorCategory::Io,
                    ErrorKind::Io,
                    "failed to set temporary file permissions",
                    e,
                )
            })?;
    }

    temp.persist(path).map_err(|e| {
        SaltpackError::with_kind_and_source(
            ErrorCategory::Io,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn read_error(path: &Path, err: io::Error) -> SaltpackError {
    SaltpackError::with_kind_and_source(
        ErrorCategory::Io,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}

fn write_error(path: &Path, err: io::Error) -> SaltpackError {
    SaltpackError::with_kind_and_source(
        ErrorCategory::Io,
        ErrorKind::Io,
        format!("failed to write to {}", path.display()),
        err,
    )
}
