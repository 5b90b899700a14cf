//! ASCII armor for binary saltpack messages
//!
//! Input bytes are cut into fixed-size blocks, each read as a big-endian
//! integer and rewritten in a restricted alphabet (base62 by default). In
//! framed mode the characters are grouped into 15-character words and
//! 200-word lines between a `BEGIN ... SALTPACK ...` header and a matching
//! footer; raw mode emits 43-character words and no frame.

mod frame;
mod stream;

pub use frame::{ArmorFrame, ArmorType};
pub use stream::{ArmorStream, DearmorStream};

use std::fmt;

use tracing::debug;

use crate::error::{ErrorKind, Result, SaltpackError};

const BASE62_ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE64_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const BASE85_ALPHABET: &str = concat!(
    "!\"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "[\\]^_`abcdefghijklmnopqrstu",
);

/// Characters per word in framed output.
pub const WORD_LEN: usize = 15;

/// Words per line in framed output.
pub const WORDS_PER_LINE: usize = 200;

/// Characters per word in raw output.
pub const RAW_WORD_LEN: usize = 43;

/// Delimiter between the frame and the body.
pub(crate) const FRAME_DELIMITER: u8 = b'.';

/// Quoting character ignored in armored input unless the alphabet uses it.
pub(crate) const QUOTE_CHAR: u8 = b'>';

/// An ordered set of printable ASCII characters used as digits.
#[derive(Clone, PartialEq, Eq)]
pub struct Alphabet {
    chars: Vec<u8>,
    index: [Option<u8>; 256],
}

impl Alphabet {
    /// Builds an alphabet from `chars`, which must be distinct, printable,
    /// non-whitespace ASCII.
    pub fn new(chars: &str) -> Result<Self> {
        let bytes = chars.as_bytes();
        if bytes.len() < 2 {
            return Err(SaltpackError::argument(
                ErrorKind::InvalidOption,
                "alphabet needs at least 2 characters",
            ));
        }

        let mut index = [None; 256];
        for (position, &c) in bytes.iter().enumerate() {
            if !c.is_ascii_graphic() {
                return Err(SaltpackError::argument(
                    ErrorKind::InvalidOption,
                    format!("alphabet character {:?} is not printable ASCII", char::from(c)),
                ));
            }
            let slot = &mut index[usize::from(c)];
            if slot.is_some() {
                return Err(SaltpackError::argument(
                    ErrorKind::InvalidOption,
                    format!("alphabet repeats character {:?}", char::from(c)),
                ));
            }
            // printable ASCII caps the alphabet well below 256 entries
            *slot = u8::try_from(position).ok();
        }

        Ok(Self {
            chars: bytes.to_vec(),
            index,
        })
    }

    pub fn base62() -> Self {
        Self::builtin(BASE62_ALPHABET)
    }

    pub fn base64() -> Self {
        Self::builtin(BASE64_ALPHABET)
    }

    pub fn base85() -> Self {
        Self::builtin(BASE85_ALPHABET)
    }

    fn builtin(chars: &str) -> Self {
        let mut index = [None; 256];
        for (position, &c) in chars.as_bytes().iter().enumerate() {
            index[usize::from(c)] = u8::try_from(position).ok();
        }
        Self {
            chars: chars.as_bytes().to_vec(),
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn contains(&self, c: u8) -> bool {
        self.index[usize::from(c)].is_some()
    }

    pub fn as_str(&self) -> &str {
        // constructed only from printable ASCII
        std::str::from_utf8(&self.chars).unwrap_or_default()
    }

    fn digit(&self, c: u8) -> Result<u32> {
        self.index[usize::from(c)].map(u32::from).ok_or_else(|| {
            SaltpackError::framing(
                ErrorKind::InvalidAlphabetCharacter,
                format!("character {:?} is not in the armor alphabet", char::from(c)),
            )
        })
    }

    fn char_at(&self, digit: u32) -> char {
        char::from(self.chars[digit as usize])
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::base62()
    }
}

impl fmt::Debug for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Alphabet").field(&self.as_str()).finish()
    }
}

/// Armor configuration shared by the one-shot codec and the streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmorOptions {
    pub alphabet: Alphabet,
    /// Bytes per input block.
    pub block_size: usize,
    /// Characters per encoded full block; must match `block_size`.
    pub char_block_size: usize,
    /// Omit the frame and use 43-character words.
    pub raw: bool,
    /// Left-align each block's value so the spare bits sit at the bottom.
    pub shift: bool,
    pub message_type: ArmorType,
    pub app_name: Option<String>,
    /// Size of the fragments the streams emit.
    pub stream_chunk_size: usize,
}

impl Default for ArmorOptions {
    fn default() -> Self {
        Self {
            alphabet: Alphabet::base62(),
            block_size: 32,
            char_block_size: 43,
            raw: false,
            shift: false,
            message_type: ArmorType::Message,
            app_name: None,
            stream_chunk_size: 256,
        }
    }
}

impl ArmorOptions {
    /// Switch alphabet, recomputing the character block size.
    pub fn with_alphabet(mut self, alphabet: Alphabet) -> Self {
        self.char_block_size = character_block_size(alphabet.len(), self.block_size);
        self.alphabet = alphabet;
        self
    }

    /// Change the byte block size, recomputing the character block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self.char_block_size = character_block_size(self.alphabet.len(), block_size);
        self
    }

    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_shift(mut self, shift: bool) -> Self {
        self.shift = shift;
        self
    }

    pub fn with_message_type(mut self, message_type: ArmorType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn with_stream_chunk_size(mut self, stream_chunk_size: usize) -> Self {
        self.stream_chunk_size = stream_chunk_size;
        self
    }

    /// Check sizes and labels before any data is processed.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(SaltpackError::argument(ErrorKind::InvalidOption, msg));

        if self.block_size == 0 {
            return invalid("armor block size must be positive".into());
        }
        if self.stream_chunk_size == 0 {
            return invalid("armor stream chunk size must be positive".into());
        }
        let expected = character_block_size(self.alphabet.len(), self.block_size);
        if self.char_block_size != expected {
            return invalid(format!(
                "{} byte blocks encode to {} characters in a {}-character alphabet, not {}",
                self.block_size,
                expected,
                self.alphabet.len(),
                self.char_block_size
            ));
        }
        if !self.raw && self.alphabet.contains(FRAME_DELIMITER) {
            return invalid("framed armor cannot use an alphabet containing '.'".into());
        }
        self.frame().map(|_| ())
    }

    /// The header/footer labels these options produce.
    pub fn frame(&self) -> Result<ArmorFrame> {
        ArmorFrame::new(self.message_type, self.app_name.as_deref())
    }

    /// Whether `c` is skipped between body characters.
    pub(crate) fn is_ignorable(&self, c: u8) -> bool {
        c.is_ascii_whitespace() || (c == QUOTE_CHAR && !self.alphabet.contains(QUOTE_CHAR))
    }
}

/// Characters needed to encode `bytes_size` bytes.
pub fn character_block_size(alphabet_size: usize, bytes_size: usize) -> usize {
    (8.0 * bytes_size as f64 / (alphabet_size as f64).log2()).ceil() as usize
}

/// Most bytes that `chars_size` characters can carry.
pub fn max_bytes_size(alphabet_size: usize, chars_size: usize) -> usize {
    ((alphabet_size as f64).log2() / 8.0 * chars_size as f64).floor() as usize
}

/// Bits left over when `chars_size` characters carry `bytes_size` bytes.
pub fn extra_bits(alphabet_size: usize, chars_size: usize, bytes_size: usize) -> usize {
    let total_bits = ((alphabet_size as f64).log2() * chars_size as f64).floor() as usize;
    total_bits.saturating_sub(8 * bytes_size)
}

/// Block sizes whose efficiency beats every smaller block, as
/// `(chars, bytes, bytes per char)`, for blocks under 50 characters.
pub fn efficient_chars_sizes(alphabet_size: usize) -> Vec<(usize, usize, f64)> {
    efficient_chars_sizes_below(alphabet_size, 50)
}

/// Like [`efficient_chars_sizes`] with a custom exclusive upper bound.
pub fn efficient_chars_sizes_below(
    alphabet_size: usize,
    chars_size_upper_bound: usize,
) -> Vec<(usize, usize, f64)> {
    let mut out = Vec::new();
    let mut best = 0.0;
    for chars_size in 1..chars_size_upper_bound {
        let bytes_size = max_bytes_size(alphabet_size, chars_size);
        let efficiency = bytes_size as f64 / chars_size as f64;
        if efficiency > best {
            out.push((chars_size, bytes_size, efficiency));
            best = efficiency;
        }
    }
    out
}

/// Encode one block of bytes as exactly `character_block_size` characters.
pub fn encode_block(block: &[u8], alphabet: &Alphabet, shift: bool) -> String {
    let base = alphabet.len() as u32;
    let chars_size = character_block_size(alphabet.len(), block.len());

    let mut value: Vec<u8> = block.to_vec();
    if shift {
        shift_left(&mut value, extra_bits(alphabet.len(), chars_size, block.len()));
    }

    let mut digits = Vec::with_capacity(chars_size);
    for _ in 0..chars_size {
        digits.push(div_rem_in_place(&mut value, base));
    }
    digits.iter().rev().map(|&d| alphabet.char_at(d)).collect()
}

/// Decode one block of characters to exactly `max_bytes_size` bytes.
pub fn decode_block(chars: &[u8], alphabet: &Alphabet, shift: bool) -> Result<Vec<u8>> {
    let bytes_size = max_bytes_size(alphabet.len(), chars.len());
    if character_block_size(alphabet.len(), bytes_size) != chars.len() {
        return Err(SaltpackError::framing(
            ErrorKind::ArmorBlockLength,
            format!("illegal armor block length {}", chars.len()),
        ));
    }

    let base = alphabet.len() as u32;
    // little-endian base-256 limbs
    let mut value: Vec<u8> = Vec::with_capacity(bytes_size + 1);
    for &c in chars {
        mul_add_in_place(&mut value, base, alphabet.digit(c)?);
    }
    if shift {
        shift_right_le(&mut value, extra_bits(alphabet.len(), chars.len(), bytes_size));
    }

    while value.last() == Some(&0) {
        value.pop();
    }
    if value.len() > bytes_size {
        return Err(SaltpackError::framing(
            ErrorKind::ArmorBlockOverflow,
            format!("armor block of {} characters overflows {} bytes", chars.len(), bytes_size),
        ));
    }
    value.resize(bytes_size, 0);
    value.reverse();
    Ok(value)
}

/// Divide a big-endian number by `divisor` in place, returning the remainder.
fn div_rem_in_place(value: &mut [u8], divisor: u32) -> u32 {
    let mut rem = 0u32;
    for byte in value.iter_mut() {
        let acc = (rem << 8) | u32::from(*byte);
        *byte = (acc / divisor) as u8;
        rem = acc % divisor;
    }
    rem
}

/// `value = value * factor + addend` on little-endian limbs.
fn mul_add_in_place(value: &mut Vec<u8>, factor: u32, addend: u32) {
    let mut carry = addend;
    for limb in value.iter_mut() {
        let acc = u32::from(*limb) * factor + carry;
        *limb = acc as u8;
        carry = acc >> 8;
    }
    while carry > 0 {
        value.push(carry as u8);
        carry >>= 8;
    }
}

fn shift_left(value: &mut Vec<u8>, bits: usize) {
    if bits == 0 {
        return;
    }
    let bytes = bits / 8;
    let bits = bits % 8;
    value.extend(std::iter::repeat_n(0, bytes));
    if bits > 0 {
        let mut carry = 0u8;
        for byte in value.iter_mut().rev() {
            let next = *byte >> (8 - bits);
            *byte = (*byte << bits) | carry;
            carry = next;
        }
        if carry > 0 {
            value.insert(0, carry);
        }
    }
}

fn shift_right_le(value: &mut Vec<u8>, bits: usize) {
    if bits == 0 {
        return;
    }
    let bytes = (bits / 8).min(value.len());
    value.drain(..bytes);
    let bits = bits % 8;
    if bits > 0 {
        let mut carry = 0u8;
        for byte in value.iter_mut().rev() {
            let next = *byte << (8 - bits);
            *byte = (*byte >> bits) | carry;
            carry = next;
        }
    }
}

/// Encode every block of `data` and concatenate the characters.
pub(crate) fn encode_blocks(data: &[u8], options: &ArmorOptions) -> String {
    data.chunks(options.block_size)
        .map(|block| encode_block(block, &options.alphabet, options.shift))
        .collect()
}

/// Armor `data` in one call.
pub fn armor(data: &[u8], options: &ArmorOptions) -> Result<String> {
    options.validate()?;
    let encoded = encode_blocks(data, options);

    if options.raw {
        return Ok(split_ascii(&encoded, RAW_WORD_LEN).collect::<Vec<_>>().join(" "));
    }

    let words: Vec<&str> = split_ascii(&encoded, WORD_LEN).collect();
    let body = words
        .chunks(WORDS_PER_LINE)
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    let frame = options.frame()?;
    Ok(format!("{}. {}. {}.", frame.header(), body, frame.footer()))
}

/// Dearmor `text` in one call, discarding the frame labels.
pub fn dearmor(text: &str, options: &ArmorOptions) -> Result<Vec<u8>> {
    dearmor_framed(text, options).map(|(data, _)| data)
}

/// Dearmor `text`, also returning the parsed frame (`None` in raw mode).
pub fn dearmor_framed(text: &str, options: &ArmorOptions) -> Result<(Vec<u8>, Option<ArmorFrame>)> {
    let mut stream = DearmorStream::new(options.clone())?;
    let mut data = Vec::new();
    stream.push(text.as_bytes(), &mut data)?;
    stream.finalize(&mut data)?;
    let frame = stream.frame().cloned();
    if let Some(frame) = &frame {
        debug!(message_type = %frame.message_type, app = ?frame.app_name, len = data.len(), "dearmored message");
    }
    Ok((data, frame))
}

fn split_ascii(text: &str, width: usize) -> impl Iterator<Item = &str> {
    // encoded text is ASCII, so byte offsets are char boundaries
    text.as_bytes()
        .chunks(width)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
}
