//! SMTP reply parser.
//!
//! Bytes read from the server are split into lines by [`ReplyDecoder`], each
//! line is decoded with [`decode_line`], and [`ReplyAssembler`] folds the
//! lines of a multi-line reply into one [`Reply`]:
//!
//! - Single: `250 OK\r\n`
//! - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode, ReplyLine};

/// Longest line accepted before the server is considered broken.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Decodes one reply line, without its line terminator.
///
/// A line is a three digit code in `200..600` followed by `-` (more lines
/// follow) or a space (last line) and the text. A bare code is a last line
/// with empty text.
///
/// # Errors
///
/// Returns [`Error::InvalidReplyFormat`] for lines shorter than a code or
/// with another separator, and [`Error::InvalidReplyCode`] for a code that
/// is not a number in range.
pub fn decode_line(line: Bytes) -> Result<ReplyLine> {
    if line.len() < 3 {
        return Err(Error::InvalidReplyFormat);
    }

    let digits = &line[..3];
    let code = std::str::from_utf8(digits)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|code| (200..600).contains(code))
        .ok_or_else(|| Error::InvalidReplyCode(String::from_utf8_lossy(digits).into_owned()))?;

    let is_last = match line.get(3) {
        None | Some(b' ') => true,
        Some(b'-') => false,
        Some(_) => return Err(Error::InvalidReplyFormat),
    };
    let content = if line.len() > 4 { line.slice(4..) } else { Bytes::new() };

    Ok(ReplyLine {
        code: ReplyCode::new(code),
        content,
        is_last,
    })
}

/// Incremental line decoder over the bytes read from the server.
///
/// Lines end in LF; a CR right before it is dropped. Bytes after the last
/// complete line stay buffered until more data arrives.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    buffer: BytesMut,
}

impl ReplyDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Buffer to read into, with room for at least one chunk.
    pub fn read_buffer(&mut self) -> &mut BytesMut {
        self.buffer.reserve(READ_CHUNK);
        &mut self.buffer
    }

    /// Returns true if undecoded bytes are pending.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Decodes the next complete line, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns the [`decode_line`] error for a malformed line, or
    /// [`Error::Protocol`] once more than [`MAX_LINE_LENGTH`] bytes are
    /// buffered without a line end.
    pub fn decode(&mut self) -> Result<Option<ReplyLine>> {
        let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') else {
            if self.buffer.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol(format!(
                    "reply line exceeds {MAX_LINE_LENGTH} bytes"
                )));
            }
            return Ok(None);
        };

        let mut line = self.buffer.split_to(newline + 1).freeze();
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(newline - 1);
        }
        decode_line(line).map(Some)
    }
}

/// Folds decoded lines into a complete reply.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    code: Option<ReplyCode>,
    lines: Vec<Bytes>,
}

impl ReplyAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a line; returns the reply once its last line arrived.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the line's code differs from the first
    /// line of the same reply.
    pub fn push(&mut self, line: ReplyLine) -> Result<Option<Reply>> {
        let code = *self.code.get_or_insert(line.code);
        if line.code != code {
            return Err(Error::Protocol(format!(
                "reply code changed from {code} to {} within one reply",
                line.code
            )));
        }

        self.lines.push(line.content);
        if !line.is_last {
            return Ok(None);
        }

        self.code = None;
        Ok(Some(Reply::new(code, std::mem::take(&mut self.lines))))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line(s: &'static str) -> Result<ReplyLine> {
        decode_line(Bytes::from_static(s.as_bytes()))
    }

    fn collect(decoder: &mut ReplyDecoder) -> Vec<ReplyLine> {
        let mut lines = Vec::new();
        while let Some(line) = decoder.decode().unwrap() {
            lines.push(line);
        }
        lines
    }

    mod decode_line_tests {
        use super::*;

        #[test]
        fn last_line() {
            let decoded = line("250 OK").unwrap();
            assert_eq!(decoded.code, ReplyCode::OK);
            assert_eq!(decoded.content, "OK");
            assert!(decoded.is_last);
        }

        #[test]
        fn continuation_line() {
            let decoded = line("250-PIPELINING").unwrap();
            assert!(!decoded.is_last);
            assert_eq!(decoded.content, "PIPELINING");
        }

        #[test]
        fn bare_code_is_last() {
            let decoded = line("354").unwrap();
            assert_eq!(decoded.code, ReplyCode::START_MAIL_INPUT);
            assert!(decoded.is_last);
            assert!(decoded.content.is_empty());
        }

        #[test]
        fn empty_text() {
            let decoded = line("250 ").unwrap();
            assert!(decoded.is_last);
            assert!(decoded.content.is_empty());
        }

        #[test]
        fn too_short() {
            assert!(matches!(line("25"), Err(Error::InvalidReplyFormat)));
            assert!(matches!(line(""), Err(Error::InvalidReplyFormat)));
        }

        #[test]
        fn bad_separator() {
            assert!(matches!(line("250+OK"), Err(Error::InvalidReplyFormat)));
            assert!(matches!(line("2500 OK"), Err(Error::InvalidReplyFormat)));
        }

        #[test]
        fn code_out_of_range() {
            assert!(matches!(line("199 early"), Err(Error::InvalidReplyCode(c)) if c == "199"));
            assert!(matches!(line("600 late"), Err(Error::InvalidReplyCode(_))));
            assert!(matches!(line("ABC OK"), Err(Error::InvalidReplyCode(_))));
            assert!(matches!(line("+25 OK"), Err(Error::InvalidReplyCode(_))));
        }
    }

    mod decoder_tests {
        use super::*;

        #[test]
        fn splits_crlf_and_lf() {
            let mut decoder = ReplyDecoder::new();
            decoder.extend(b"220 ready\r\n250 lf only\n");
            let lines = collect(&mut decoder);
            assert_eq!(lines.len(), 2);
            assert_eq!(lines[0].content, "ready");
            assert_eq!(lines[1].content, "lf only");
            assert!(!decoder.has_buffered());
        }

        #[test]
        fn keeps_partial_line() {
            let mut decoder = ReplyDecoder::new();
            decoder.extend(b"250-first\r\n250 sec");
            assert_eq!(collect(&mut decoder).len(), 1);
            assert!(decoder.has_buffered());

            decoder.extend(b"ond\r\n");
            let lines = collect(&mut decoder);
            assert_eq!(lines[0].content, "second");
        }

        #[test]
        fn rejects_endless_line() {
            let mut decoder = ReplyDecoder::new();
            decoder.extend(&vec![b'2'; MAX_LINE_LENGTH + 1]);
            assert!(matches!(decoder.decode(), Err(Error::Protocol(_))));
        }
    }

    mod assembler_tests {
        use super::*;

        #[test]
        fn single_line_reply() {
            let mut assembler = ReplyAssembler::new();
            let reply = assembler.push(line("221 bye").unwrap()).unwrap().unwrap();
            assert_eq!(reply.code, ReplyCode::CLOSING);
            assert_eq!(reply.lines, ["bye"]);
        }

        #[test]
        fn multi_line_reply() {
            let mut assembler = ReplyAssembler::new();
            assert!(assembler.push(line("250-a").unwrap()).unwrap().is_none());
            assert!(assembler.push(line("250-b").unwrap()).unwrap().is_none());
            let reply = assembler.push(line("250 c").unwrap()).unwrap().unwrap();
            assert_eq!(reply.lines, ["a", "b", "c"]);

            let next = assembler.push(line("354 go").unwrap()).unwrap().unwrap();
            assert_eq!(next.code, ReplyCode::START_MAIL_INPUT);
            assert_eq!(next.lines.len(), 1);
        }

        #[test]
        fn code_mismatch() {
            let mut assembler = ReplyAssembler::new();
            assembler.push(line("250-a").unwrap()).unwrap();
            assert!(matches!(
                assembler.push(line("251 b").unwrap()),
                Err(Error::Protocol(_))
            ));
        }
    }

    proptest! {
        #[test]
        fn chunked_input_yields_one_reply(
            code in 200u16..600,
            texts in prop::collection::vec("[ -~]{0,40}", 1..8),
            cut in any::<prop::sample::Index>(),
        ) {
            let mut wire = Vec::new();
            for (i, text) in texts.iter().enumerate() {
                let separator = if i + 1 == texts.len() { ' ' } else { '-' };
                wire.extend_from_slice(format!("{code}{separator}{text}\r\n").as_bytes());
            }
            let split = cut.index(wire.len() + 1);

            let mut decoder = ReplyDecoder::new();
            let mut assembler = ReplyAssembler::new();
            let mut replies = Vec::new();
            for chunk in [&wire[..split], &wire[split..]] {
                decoder.extend(chunk);
                while let Some(line) = decoder.decode().unwrap() {
                    if let Some(reply) = assembler.push(line).unwrap() {
                        replies.push(reply);
                    }
                }
            }

            prop_assert_eq!(replies.len(), 1);
            prop_assert_eq!(replies[0].code.as_u16(), code);
            let decoded: Vec<String> = replies[0].text_lines().collect();
            prop_assert_eq!(decoded, texts);
        }
    }
}
