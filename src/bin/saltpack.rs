//! Saltpack CLI
//!
//! Command-line interface for encrypting, signing and signcrypting files
//! in the saltpack format, plus plain ASCII armoring.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, fmt};

use saltpack::armor::{ArmorOptions, ArmorType};
use saltpack::encryption::Recipient;
use saltpack::error::{ErrorCategory, ErrorKind, Result, SaltpackError};
use saltpack::file_ops::{self, KeyKind};
use saltpack::keys::{PublicKey, parse_hex_key};
use saltpack::signcryption::{RecipientKeys, SigncryptionRecipient, SymmetricKey};

const LOG_ENV_VAR: &str = "SALTPACK_LOG";

#[derive(Parser)]
#[command(name = "saltpack")]
#[command(version)]
#[command(about = "Saltpack encryption, signing and armor.", long_about = None)]
struct Cli {
    /// Log debug output to stderr (overridden by SALTPACK_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key file and print its public key
    Keygen {
        #[arg(long, value_enum, default_value = "box")]
        kind: KeyKindArg,

        /// Path to write the secret key to; must not exist
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Print the public key of a key file
    PublicKey {
        #[arg(long, value_enum, default_value = "box")]
        kind: KeyKindArg,

        #[arg(short, long, value_name = "FILE")]
        key: PathBuf,
    },

    /// Encrypt a file for one or more recipients
    #[command(alias = "e")]
    Encrypt {
        #[command(flatten)]
        io: InputOutput,

        /// Recipient public key (hex); repeat for more recipients
        #[arg(short, long = "recipient", value_name = "HEX", required = true)]
        recipients: Vec<String>,

        /// Sender box key file; omit to send anonymously
        #[arg(short, long, value_name = "FILE")]
        key: Option<PathBuf>,

        /// Leave recipient public keys out of the header
        #[arg(long)]
        hide_recipients: bool,

        /// Write binary output instead of armor
        #[arg(long)]
        binary: bool,
    },

    /// Decrypt a file
    #[command(alias = "d")]
    Decrypt {
        #[command(flatten)]
        io: InputOutput,

        /// Recipient box key file
        #[arg(short, long, value_name = "FILE")]
        key: PathBuf,

        /// Fail unless the message is from this sender (hex)
        #[arg(long, value_name = "HEX")]
        sender: Option<String>,

        /// Read binary input instead of armor
        #[arg(long)]
        binary: bool,
    },

    /// Sign a file
    Sign {
        #[command(flatten)]
        io: InputOutput,

        /// Signing key file
        #[arg(short, long, value_name = "FILE")]
        key: PathBuf,

        /// Write a detached signature instead of an attached message
        #[arg(long)]
        detached: bool,

        #[arg(long)]
        binary: bool,
    },

    /// Verify a signed file
    Verify {
        /// Signed message, or the signed data with --signature
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Where to write the verified contents of an attached message
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Detached signature file
        #[arg(long, value_name = "FILE")]
        signature: Option<PathBuf>,

        /// Fail unless signed by this key (hex)
        #[arg(long, value_name = "HEX")]
        signer: Option<String>,

        #[arg(long)]
        binary: bool,
    },

    /// Sign and encrypt a file without revealing recipients
    Signcrypt {
        #[command(flatten)]
        io: InputOutput,

        /// Recipient box public key (hex)
        #[arg(short, long = "recipient", value_name = "HEX")]
        recipients: Vec<String>,

        /// Symmetric-key recipient as IDENTIFIER=HEX
        #[arg(long = "symmetric", value_name = "ID=HEX")]
        symmetric: Vec<String>,

        /// Sender signing key file; omit to send anonymously
        #[arg(short, long, value_name = "FILE")]
        key: Option<PathBuf>,

        #[arg(long)]
        binary: bool,
    },

    /// Decrypt and verify a signcrypted file
    Designcrypt {
        #[command(flatten)]
        io: InputOutput,

        /// Box key file to try; repeatable
        #[arg(short, long = "key", value_name = "FILE")]
        keys: Vec<PathBuf>,

        /// Symmetric key as HEX or IDENTIFIER=HEX; repeatable
        #[arg(long = "symmetric", value_name = "[ID=]HEX")]
        symmetric: Vec<String>,

        /// Fail unless the message is from this signing key (hex)
        #[arg(long, value_name = "HEX")]
        sender: Option<String>,

        #[arg(long)]
        binary: bool,
    },

    /// ASCII-armor arbitrary data
    Armor {
        #[command(flatten)]
        io: InputOutput,

        #[command(flatten)]
        armor: ArmorArgs,

        #[arg(long, value_enum, default_value = "message")]
        message_type: ArmorTypeArg,

        /// Application name placed in the header and footer
        #[arg(long, value_name = "NAME")]
        app_name: Option<String>,
    },

    /// Decode ASCII-armored data
    Dearmor {
        #[command(flatten)]
        io: InputOutput,

        #[command(flatten)]
        armor: ArmorArgs,
    },
}

#[derive(clap::Args)]
struct InputOutput {
    /// Path to the file to read
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// Path to the file to write
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,
}

#[derive(clap::Args)]
struct ArmorArgs {
    /// No header or footer, 43-character words
    #[arg(long)]
    raw: bool,

    #[arg(long, value_enum, default_value = "base62")]
    alphabet: AlphabetArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyKindArg {
    Box,
    Signing,
}

impl From<KeyKindArg> for KeyKind {
    fn from(arg: KeyKindArg) -> Self {
        match arg {
            KeyKindArg::Box => KeyKind::Box,
            KeyKindArg::Signing => KeyKind::Signing,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AlphabetArg {
    Base62,
    Base64,
    Base85,
}

#[derive(Clone, Copy, ValueEnum)]
enum ArmorTypeArg {
    Message,
    Encrypted,
    Signed,
    Detached,
}

impl From<ArmorTypeArg> for ArmorType {
    fn from(arg: ArmorTypeArg) -> Self {
        match arg {
            ArmorTypeArg::Message => ArmorType::Message,
            ArmorTypeArg::Encrypted => ArmorType::EncryptedMessage,
            ArmorTypeArg::Signed => ArmorType::SignedMessage,
            ArmorTypeArg::Detached => ArmorType::DetachedSignature,
        }
    }
}

impl ArmorArgs {
    fn options(&self) -> ArmorOptions {
        let alphabet = match self.alphabet {
            AlphabetArg::Base62 => saltpack::armor::Alphabet::base62(),
            AlphabetArg::Base64 => saltpack::armor::Alphabet::base64(),
            AlphabetArg::Base85 => saltpack::armor::Alphabet::base85(),
        };
        ArmorOptions::default()
            .with_alphabet(alphabet)
            .with_raw(self.raw)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn armor_unless(binary: bool) -> Option<ArmorOptions> {
    (!binary).then(ArmorOptions::default)
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Keygen { kind, output } => {
            let public = file_ops::generate_key_file(&output, kind.into())?;
            println!("{}", hex::encode(public));
        }
        Commands::PublicKey { kind, key } => {
            println!("{}", hex::encode(file_ops::public_key_of(&key, kind.into())?));
        }
        Commands::Encrypt {
            io,
            recipients,
            key,
            hide_recipients,
            binary,
        } => {
            let sender = key.as_deref().map(file_ops::read_box_key).transpose()?;
            let recipients = recipients
                .iter()
                .map(|text| {
                    let key = parse_key(text, "recipient")?;
                    Ok(if hide_recipients {
                        Recipient::anonymous(key)
                    } else {
                        Recipient::new(key)
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            file_ops::encrypt_file(
                &io.input,
                &io.output,
                sender.as_ref(),
                &recipients,
                armor_unless(binary).as_ref(),
            )?;
        }
        Commands::Decrypt {
            io,
            key,
            sender,
            binary,
        } => {
            let keypair = file_ops::read_box_key(&key)?;
            let expected = parse_optional_key(sender.as_deref(), "sender")?;
            let sender = file_ops::decrypt_file(
                &io.input,
                &io.output,
                &keypair,
                expected.as_ref(),
                armor_unless(binary).as_ref(),
            )?;
            report_sender(sender.as_ref());
        }
        Commands::Sign {
            io,
            key,
            detached,
            binary,
        } => {
            let signer = file_ops::read_signing_key(&key)?;
            let armor = armor_unless(binary);
            if detached {
                file_ops::sign_detached_file(&io.input, &io.output, &signer, armor.as_ref())?;
            } else {
                file_ops::sign_file(&io.input, &io.output, &signer, armor.as_ref())?;
            }
        }
        Commands::Verify {
            input,
            output,
            signature,
            signer,
            binary,
        } => {
            let expected = parse_optional_key(signer.as_deref(), "signer")?;
            let armor = armor_unless(binary);
            let signer = match (signature, output) {
                (Some(signature), _) => file_ops::verify_detached_file(
                    &input,
                    &signature,
                    expected.as_ref(),
                    armor.as_ref(),
                )?,
                (None, Some(output)) => {
                    file_ops::verify_file(&input, &output, expected.as_ref(), armor.as_ref())?
                }
                (None, None) => {
                    return Err(usage_error(
                        "verify needs --output for an attached message or --signature for a detached one",
                    ));
                }
            };
            eprintln!("Signed by {}", hex::encode(signer));
        }
        Commands::Signcrypt {
            io,
            recipients,
            symmetric,
            key,
            binary,
        } => {
            let sender = key.as_deref().map(file_ops::read_signing_key).transpose()?;
            let mut all = recipients
                .iter()
                .map(|text| parse_key(text, "recipient").map(SigncryptionRecipient::from))
                .collect::<Result<Vec<_>>>()?;
            for text in &symmetric {
                let (identifier, key) = parse_symmetric(text)?;
                let identifier = identifier.ok_or_else(|| {
                    usage_error("symmetric recipients need an identifier: ID=HEX")
                })?;
                all.push(SigncryptionRecipient::symmetric(identifier, key));
            }
            file_ops::signcrypt_file(
                &io.input,
                &io.output,
                sender.as_ref(),
                &all,
                armor_unless(binary).as_ref(),
            )?;
        }
        Commands::Designcrypt {
            io,
            keys,
            symmetric,
            sender,
            binary,
        } => {
            let mut recipient_keys = RecipientKeys::new();
            for path in &keys {
                recipient_keys = recipient_keys.with_box_key(file_ops::read_box_key(path)?);
            }
            for text in &symmetric {
                let (identifier, key) = parse_symmetric(text)?;
                recipient_keys = recipient_keys.with_symmetric_key(SymmetricKey::new(key, identifier));
            }
            let expected = parse_optional_key(sender.as_deref(), "sender")?;
            let sender = file_ops::designcrypt_file(
                &io.input,
                &io.output,
                recipient_keys,
                expected.as_ref(),
                armor_unless(binary).as_ref(),
            )?;
            report_sender(sender.as_ref());
        }
        Commands::Armor {
            io,
            armor,
            message_type,
            app_name,
        } => {
            let mut options = armor.options().with_message_type(message_type.into());
            if let Some(app_name) = app_name {
                options = options.with_app_name(app_name);
            }
            file_ops::armor_file(&io.input, &io.output, &options)?;
        }
        Commands::Dearmor { io, armor } => {
            file_ops::dearmor_file(&io.input, &io.output, &armor.options())?;
        }
    }
    Ok(())
}

fn report_sender(sender: Option<&PublicKey>) {
    match sender {
        Some(sender) => eprintln!("Sender {}", hex::encode(sender)),
        None => eprintln!("Sender is anonymous"),
    }
}

fn parse_key(text: &str, what: &str) -> Result<PublicKey> {
    parse_hex_key(text).map_err(|e| e.with_context(format!("invalid {} key", what)))
}

fn parse_optional_key(text: Option<&str>, what: &str) -> Result<Option<PublicKey>> {
    text.map(|text| parse_key(text, what)).transpose()
}

/// `HEX` or `IDENTIFIER=HEX`.
fn parse_symmetric(text: &str) -> Result<(Option<Vec<u8>>, [u8; 32])> {
    match text.split_once('=') {
        Some((identifier, key)) => Ok((
            Some(identifier.as_bytes().to_vec()),
            parse_key(key, "symmetric")?,
        )),
        None => Ok((None, parse_key(text, "symmetric")?)),
    }
}

fn usage_error(msg: &str) -> SaltpackError {
    SaltpackError::with_kind(ErrorCategory::Argument, ErrorKind::InvalidOption, msg)
}
