//! Incremental armoring and dearmoring
//!
//! Both directions accept input in fragments of any size, including
//! fragments that split the `.` delimiters or a header word, and emit
//! output in fragments of `stream_chunk_size` bytes.

use tracing::{debug, trace};

use super::{
    ArmorFrame, ArmorOptions, ArmorType, FRAME_DELIMITER, RAW_WORD_LEN, WORD_LEN, WORDS_PER_LINE,
    decode_block, encode_block, frame::MAX_FRAME_LEN,
};
use crate::error::{ErrorKind, Result, SaltpackError};
use crate::stream::{Transform, drain_fragments, ensure_open};

/// Turns binary input into armored text.
#[derive(Debug)]
pub struct ArmorStream {
    options: ArmorOptions,
    frame: Option<ArmorFrame>,
    started: bool,
    input: Vec<u8>,
    encoded: Vec<u8>,
    words_in_line: usize,
    pending: Vec<u8>,
    finished: bool,
}

impl ArmorStream {
    pub fn new(options: ArmorOptions) -> Result<Self> {
        options.validate()?;
        let frame = if options.raw {
            None
        } else {
            Some(options.frame()?)
        };
        Ok(Self {
            options,
            frame,
            started: false,
            input: Vec::new(),
            encoded: Vec::new(),
            words_in_line: 0,
            pending: Vec::new(),
            finished: false,
        })
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        if let Some(frame) = &self.frame {
            self.pending.extend_from_slice(frame.header().as_bytes());
            self.pending.extend_from_slice(b". ");
        }
    }

    /// Move every word that is certainly not the last one into `pending`.
    fn wrap_words(&mut self) {
        if self.options.raw {
            while self.encoded.len() > RAW_WORD_LEN {
                self.pending.extend(self.encoded.drain(..RAW_WORD_LEN));
                self.pending.push(b' ');
            }
            return;
        }

        while self.encoded.len() > WORD_LEN {
            self.pending.extend(self.encoded.drain(..WORD_LEN));
            self.words_in_line += 1;
            if self.words_in_line == WORDS_PER_LINE {
                self.pending.push(b'\n');
                self.words_in_line = 0;
            } else {
                self.pending.push(b' ');
            }
        }
    }

    fn encode(&mut self, block: &[u8]) {
        let chars = encode_block(block, &self.options.alphabet, self.options.shift);
        self.encoded.extend_from_slice(chars.as_bytes());
    }
}

impl Transform for ArmorStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        self.start();
        self.input.extend_from_slice(data);

        // the last block is held back until finish, even when it is full
        let block_size = self.options.block_size;
        if self.input.len() > block_size {
            let ready = (self.input.len() - 1) / block_size * block_size;
            let blocks: Vec<u8> = self.input.drain(..ready).collect();
            for block in blocks.chunks(block_size) {
                self.encode(block);
            }
        }
        self.wrap_words();

        Ok(drain_fragments(&mut self.pending, self.options.stream_chunk_size, false))
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        self.finished = true;
        self.start();

        if !self.input.is_empty() {
            let last = std::mem::take(&mut self.input);
            self.encode(&last);
        }
        self.wrap_words();
        self.pending.append(&mut self.encoded);
        if let Some(frame) = &self.frame {
            self.pending.extend_from_slice(b". ");
            self.pending.extend_from_slice(frame.footer().as_bytes());
            self.pending.push(FRAME_DELIMITER);
        }

        Ok(drain_fragments(&mut self.pending, self.options.stream_chunk_size, true))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Body,
    Footer,
    Trailer,
}

/// Turns armored text back into binary data.
#[derive(Debug)]
pub struct DearmorStream {
    options: ArmorOptions,
    state: State,
    frame_text: Vec<u8>,
    header: Option<ArmorFrame>,
    expected_types: Vec<ArmorType>,
    block: Vec<u8>,
    pending: Vec<u8>,
    finished: bool,
}

impl DearmorStream {
    pub fn new(options: ArmorOptions) -> Result<Self> {
        options.validate()?;
        let state = if options.raw { State::Body } else { State::Header };
        Ok(Self {
            options,
            state,
            frame_text: Vec::new(),
            header: None,
            expected_types: Vec::new(),
            block: Vec::new(),
            pending: Vec::new(),
            finished: false,
        })
    }

    /// Reject a header whose message type is not in `types`.
    pub fn with_expected_types(mut self, types: &[ArmorType]) -> Self {
        self.expected_types = types.to_vec();
        self
    }

    /// The parsed header frame, once the header delimiter has been seen.
    pub fn frame(&self) -> Option<&ArmorFrame> {
        self.header.as_ref()
    }

    /// Consume `data`, appending decoded bytes to `out`.
    pub(crate) fn push(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        for &c in data {
            match self.state {
                State::Header if c == FRAME_DELIMITER => {
                    let header = ArmorFrame::parse_header(&self.take_frame_text())?;
                    debug!(message_type = %header.message_type, app = ?header.app_name, "read armor header");
                    header.check_type(&self.expected_types)?;
                    self.header = Some(header);
                    self.state = State::Body;
                }
                State::Footer if c == FRAME_DELIMITER => {
                    let footer = ArmorFrame::parse_footer(&self.take_frame_text())?;
                    if let Some(header) = &self.header {
                        header.check_footer(&footer)?;
                    }
                    trace!("read armor footer");
                    self.state = State::Trailer;
                }
                State::Header | State::Footer => self.push_frame_byte(c)?,
                State::Body if c == FRAME_DELIMITER && !self.options.raw => {
                    self.flush_block(out)?;
                    self.state = State::Footer;
                }
                State::Body => {
                    if self.options.is_ignorable(c) {
                        continue;
                    }
                    self.block.push(c);
                    if self.block.len() == self.options.char_block_size {
                        self.flush_block(out)?;
                    }
                }
                State::Trailer => {
                    if !c.is_ascii_whitespace() {
                        return Err(SaltpackError::framing(
                            ErrorKind::TrailingData,
                            "unexpected data after the armor footer",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Decode whatever is left and check the frame was closed.
    pub(crate) fn finalize(&mut self, out: &mut Vec<u8>) -> Result<()> {
        match self.state {
            State::Trailer => Ok(()),
            State::Body if self.options.raw => self.flush_block(out),
            State::Header => Err(SaltpackError::framing(
                ErrorKind::ArmorFrameInvalid,
                "armored input ended before the end of the header",
            )),
            State::Body | State::Footer => Err(SaltpackError::framing(
                ErrorKind::ArmorFrameInvalid,
                "armored input ended before a complete footer",
            )),
        }
    }

    fn push_frame_byte(&mut self, c: u8) -> Result<()> {
        if self.frame_text.len() >= MAX_FRAME_LEN {
            return Err(SaltpackError::framing(
                ErrorKind::ArmorFrameInvalid,
                format!("armor frame longer than {} bytes", MAX_FRAME_LEN),
            ));
        }
        self.frame_text.push(c);
        Ok(())
    }

    fn take_frame_text(&mut self) -> String {
        let text = std::mem::take(&mut self.frame_text);
        String::from_utf8_lossy(&text).into_owned()
    }

    fn flush_block(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let decoded = decode_block(&self.block, &self.options.alphabet, self.options.shift)?;
        out.extend_from_slice(&decoded);
        self.block.clear();
        Ok(())
    }
}

impl Transform for DearmorStream {
    fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        let mut out = std::mem::take(&mut self.pending);
        let pushed = self.push(data, &mut out);
        self.pending = out;
        pushed?;
        Ok(drain_fragments(&mut self.pending, self.options.stream_chunk_size, false))
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>> {
        ensure_open(self.finished)?;
        self.finished = true;
        let mut out = std::mem::take(&mut self.pending);
        self.finalize(&mut out)?;
        self.pending = out;
        Ok(drain_fragments(&mut self.pending, self.options.stream_chunk_size, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armor::{Alphabet, ArmorType, armor, dearmor};
    use crate::error::ErrorCategory;
    use crate::stream::collect;

    const POEM_ARMORED: &str = include_str!("../../testdata/armor/poem-armored.txt");

    fn poem() -> Vec<u8> {
        dearmor(POEM_ARMORED, &ArmorOptions::default()).unwrap()
    }

    fn feed_in_pieces<T: Transform>(stream: &mut T, data: &[u8], piece: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for fragment in data.chunks(piece.max(1)) {
            out.extend(stream.feed(fragment).unwrap());
        }
        out.extend(stream.finish().unwrap());
        out
    }

    #[test]
    fn test_armor_stream_matches_one_shot() {
        let poem = poem();
        for piece in [1, 2, 31, 32, 33, 64, 1000] {
            let options = ArmorOptions::default().with_stream_chunk_size(3);
            let mut stream = ArmorStream::new(options.clone()).unwrap();
            let fragments = feed_in_pieces(&mut stream, &poem, piece);

            let expected = armor(&poem, &options).unwrap();
            let expected: Vec<Vec<u8>> = expected.as_bytes().chunks(3).map(<[u8]>::to_vec).collect();
            assert_eq!(fragments, expected, "piece size {}", piece);
        }
    }

    #[test]
    fn test_armor_stream_long_input_wraps_lines() {
        let data: Vec<u8> = (0..32 * 90).map(|i| (i * 7) as u8).collect();
        for options in [
            ArmorOptions::default(),
            ArmorOptions::default().with_raw(true),
            ArmorOptions::default().with_message_type(ArmorType::EncryptedMessage).with_app_name("App"),
        ] {
            let mut stream = ArmorStream::new(options.clone()).unwrap();
            let streamed = feed_in_pieces(&mut stream, &data, 100).concat();
            assert_eq!(streamed, armor(&data, &options).unwrap().into_bytes());
        }
    }

    #[test]
    fn test_armor_stream_empty_input() {
        let mut stream = ArmorStream::new(ArmorOptions::default()).unwrap();
        let out = stream.finish().unwrap().concat();
        assert_eq!(out, b"BEGIN SALTPACK MESSAGE. . END SALTPACK MESSAGE.");
    }

    #[test]
    fn test_dearmor_every_split_point() {
        let poem = poem();
        let text = POEM_ARMORED.as_bytes();
        for split in 0..=text.len() {
            let mut stream = DearmorStream::new(ArmorOptions::default()).unwrap();
            let mut out = stream.feed(&text[..split]).unwrap();
            out.extend(stream.feed(&text[split..]).unwrap());
            out.extend(stream.finish().unwrap());
            assert_eq!(out.concat(), poem, "split at {}", split);
        }
    }

    #[test]
    fn test_dearmor_byte_at_a_time() {
        let mut stream = DearmorStream::new(ArmorOptions::default().with_stream_chunk_size(10)).unwrap();
        let fragments = feed_in_pieces(&mut stream, POEM_ARMORED.as_bytes(), 1);
        assert!(fragments.iter().rev().skip(1).all(|f| f.len() == 10));
        assert_eq!(fragments.concat(), poem());
        assert_eq!(stream.frame().map(|f| f.message_type), Some(ArmorType::Message));
    }

    #[test]
    fn test_dearmor_raw_stream() {
        let options = ArmorOptions::default()
            .with_alphabet(Alphabet::base85())
            .with_raw(true);
        let data: Vec<u8> = (0..=255).collect();
        let armored = armor(&data, &options).unwrap();
        let mut stream = DearmorStream::new(options).unwrap();
        assert_eq!(feed_in_pieces(&mut stream, armored.as_bytes(), 7).concat(), data);
    }

    #[test]
    fn test_dearmor_missing_footer() {
        let truncated = &POEM_ARMORED.as_bytes()[..POEM_ARMORED.len() - 1];
        let mut stream = DearmorStream::new(ArmorOptions::default()).unwrap();
        stream.feed(truncated).unwrap();
        let err = stream.finish().expect_err("expected frame error");
        assert_eq!(err.category, ErrorCategory::MalformedFraming);
        assert_eq!(err.kind, Some(ErrorKind::ArmorFrameInvalid));
    }

    #[test]
    fn test_dearmor_header_without_delimiter() {
        let mut stream = DearmorStream::new(ArmorOptions::default()).unwrap();
        let err = stream
            .feed(&vec![b'A'; MAX_FRAME_LEN + 1])
            .expect_err("expected frame length error");
        assert_eq!(err.kind, Some(ErrorKind::ArmorFrameInvalid));
    }

    #[test]
    fn test_feed_after_finish() {
        let mut stream = ArmorStream::new(ArmorOptions::default()).unwrap();
        stream.finish().unwrap();
        let err = stream.feed(b"late").expect_err("expected finished error");
        assert_eq!(err.category, ErrorCategory::Argument);
        assert_eq!(err.kind, Some(ErrorKind::StreamFinished));
    }

    #[test]
    fn test_collect_helper() {
        let poem = poem();
        let mut stream = ArmorStream::new(ArmorOptions::default()).unwrap();
        let armored = collect(&mut stream, &poem).unwrap();
        assert_eq!(armored, POEM_ARMORED.as_bytes());
    }
}
