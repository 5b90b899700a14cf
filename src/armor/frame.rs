//! Armor header and footer lines
//!
//! A framed message looks like
//! `BEGIN [APP] SALTPACK <TYPE>. <body>. END [APP] SALTPACK <TYPE>.`
//! where the app name is optional and `<TYPE>` is one of a fixed set of
//! labels. Tokens may be separated by any whitespace, and `>` quoting left
//! behind by mail clients is ignored.

use std::fmt;

use crate::error::{ErrorKind, Result, SaltpackError};

/// Longest header or footer accepted before the delimiter shows up.
pub(crate) const MAX_FRAME_LEN: usize = 1024;

const FORMAT_TOKEN: &str = "SALTPACK";

/// Message-type label carried in the armor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ArmorType {
    #[default]
    Message,
    EncryptedMessage,
    SignedMessage,
    DetachedSignature,
}

impl ArmorType {
    const ALL: [ArmorType; 4] = [
        ArmorType::Message,
        ArmorType::EncryptedMessage,
        ArmorType::SignedMessage,
        ArmorType::DetachedSignature,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArmorType::Message => "MESSAGE",
            ArmorType::EncryptedMessage => "ENCRYPTED MESSAGE",
            ArmorType::SignedMessage => "SIGNED MESSAGE",
            ArmorType::DetachedSignature => "DETACHED SIGNATURE",
        }
    }

    fn from_tokens(tokens: &[&str]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().split(' ').eq(tokens.iter().copied()))
    }
}

impl fmt::Display for ArmorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The labels shared by a header and its footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmorFrame {
    pub message_type: ArmorType,
    pub app_name: Option<String>,
}

impl ArmorFrame {
    pub fn new(message_type: ArmorType, app_name: Option<&str>) -> Result<Self> {
        if let Some(name) = app_name {
            check_app_name(name)?;
        }
        Ok(Self {
            message_type,
            app_name: app_name.map(str::to_owned),
        })
    }

    /// `BEGIN [APP] SALTPACK TYPE`, without the trailing delimiter.
    pub fn header(&self) -> String {
        self.line("BEGIN")
    }

    /// `END [APP] SALTPACK TYPE`, without the trailing delimiter.
    pub fn footer(&self) -> String {
        self.line("END")
    }

    fn line(&self, keyword: &str) -> String {
        match &self.app_name {
            Some(app) => format!("{} {} {} {}", keyword, app, FORMAT_TOKEN, self.message_type),
            None => format!("{} {} {}", keyword, FORMAT_TOKEN, self.message_type),
        }
    }

    /// Parse the text before the first `.` of an armored message.
    pub fn parse_header(text: &str) -> Result<Self> {
        Self::parse(text, "BEGIN")
    }

    /// Parse the text between the body's closing `.` and the final `.`.
    pub fn parse_footer(text: &str) -> Result<Self> {
        Self::parse(text, "END")
    }

    fn parse(text: &str, keyword: &str) -> Result<Self> {
        let tokens: Vec<&str> = text
            .split(|c: char| c.is_ascii_whitespace() || c == '>')
            .filter(|t| !t.is_empty())
            .collect();

        let invalid = || {
            SaltpackError::framing(
                ErrorKind::ArmorFrameInvalid,
                format!(
                    "invalid armor {} line {:?}",
                    if keyword == "BEGIN" { "header" } else { "footer" },
                    truncate_for_display(text)
                ),
            )
        };

        let rest = match tokens.split_first() {
            Some((first, rest)) if *first == keyword => rest,
            _ => return Err(invalid()),
        };
        let (app_name, rest) = match rest.split_first() {
            Some((token, tail)) if *token != FORMAT_TOKEN => (Some(*token), tail),
            _ => (None, rest),
        };
        let type_tokens = match rest.split_first() {
            Some((token, tail)) if *token == FORMAT_TOKEN => tail,
            _ => return Err(invalid()),
        };
        let message_type = ArmorType::from_tokens(type_tokens).ok_or_else(invalid)?;

        if let Some(name) = app_name {
            check_app_name(name).map_err(|_| invalid())?;
        }

        Ok(Self {
            message_type,
            app_name: app_name.map(str::to_owned),
        })
    }

    /// Fail unless the frame's message type is one of `allowed`.
    pub fn check_type(&self, allowed: &[ArmorType]) -> Result<()> {
        if allowed.is_empty() || allowed.contains(&self.message_type) {
            return Ok(());
        }
        let names: Vec<&str> = allowed.iter().map(|t| t.as_str()).collect();
        Err(SaltpackError::framing(
            ErrorKind::ArmorFrameMismatch,
            format!(
                "armor frame is a {}, expected one of: {}",
                self.message_type,
                names.join(", ")
            ),
        ))
    }

    /// Fail unless `footer` carries the same labels as this header.
    pub fn check_footer(&self, footer: &ArmorFrame) -> Result<()> {
        if self == footer {
            return Ok(());
        }
        Err(SaltpackError::framing(
            ErrorKind::ArmorFrameMismatch,
            format!(
                "armor footer \"{}\" does not match header \"{}\"",
                footer.footer(),
                self.header()
            ),
        ))
    }
}

fn check_app_name(name: &str) -> Result<()> {
    if !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Ok(())
    } else {
        Err(SaltpackError::argument(
            ErrorKind::InvalidOption,
            format!("app name {:?} must be non-empty and alphanumeric", name),
        ))
    }
}

fn truncate_for_display(text: &str) -> String {
    text.chars().take(64).collect()
}
