use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// The input is not well-formed saltpack data: armor header or footer
    /// missing or mismatched, wire header fails the format/version/mode
    /// checks, or the binary layout of a header or payload is wrong.
    MalformedFraming,

    /// None of the caller's keys can open the message, or a box/secretbox
    /// failed to open (wrong key, tampering or corruption).
    Decryption,

    /// A signature did not validate, or the sender differs from the one the
    /// caller pinned.
    Verify,

    /// The final flag is on the wrong chunk: the message was truncated or
    /// extended after its final chunk.
    InvalidFinalFlag,

    /// The caller supplied invalid options or arguments.
    Argument,

    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,

    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example, caused by bad input - merely that it
    /// cannot be confidently determined by the code.
    Internal,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The armor header or footer does not follow the `BEGIN ... SALTPACK ...` grammar.
    ArmorFrameInvalid,
    /// The armor header and footer disagree on message type or app name.
    ArmorFrameMismatch,
    /// An armored block has a character count no byte length encodes to.
    ArmorBlockLength,
    /// An armored block decodes to a value wider than its byte length.
    ArmorBlockOverflow,
    /// A character outside the configured alphabet was found.
    InvalidAlphabetCharacter,
    /// Non-whitespace text follows the armor footer.
    TrailingData,
    /// The header does not start with the "saltpack" format tag.
    FormatTag,
    /// The header carries a version other than 2.0.
    UnsupportedVersion,
    /// The header mode is unknown, or not the one the decoder handles.
    UnexpectedMode,
    /// A header or payload value has the wrong type, arity or length.
    WireFormat,
    /// Input data ended in the middle of a serialized value.
    TruncatedInput,
    /// No recipient entry could be opened with the supplied keys.
    NotARecipient,
    /// A recipient entry matched but its payload key did not open.
    PayloadKeyOpen,
    /// The sender secretbox did not open with the payload key.
    SenderKeyOpen,
    /// A payload authenticator did not match for our recipient.
    AuthenticatorMismatch,
    /// A payload secretbox did not open.
    PayloadOpen,
    /// A signature failed to verify.
    SignatureInvalid,
    /// The message sender is not the expected one.
    SenderMismatch,
    /// Another chunk arrived after a chunk marked final.
    FinalChunkExtended,
    /// The last chunk of the message is not marked final.
    FinalChunkMissing,
    /// The message has a header but no payload chunks at all.
    NoPayload,
    /// Data was fed to a stream after it was finished.
    StreamFinished,
    /// An option or size is out of its permitted range.
    InvalidOption,
    /// Key material has the wrong length or encoding.
    InvalidKey,
    /// Unexpected state reached within saltpack logic.
    InternalInvariant,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct SaltpackError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl SaltpackError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that retains the originating source error.
    pub fn with_source(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: None,
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    pub(crate) fn framing(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::MalformedFraming, kind, msg)
    }

    pub(crate) fn decryption(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::Decryption, kind, msg)
    }

    pub(crate) fn verify(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::Verify, kind, msg)
    }

    pub(crate) fn final_flag(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::InvalidFinalFlag, kind, msg)
    }

    pub(crate) fn argument(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::Argument, kind, msg)
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::Internal, ErrorKind::InternalInvariant, msg)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SaltpackError>;
