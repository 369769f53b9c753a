//! Encoding helpers for header values and binary payloads.
//!
//! Supports Base64 (plain and line-wrapped) and RFC 2047 encoded-words.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Maximum line length for wrapped Base64 payloads.
pub const MAX_LINE_LENGTH: usize = 76;

/// Standard Base64 of `data`, without line breaks.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Base64 of `data` split into CRLF-separated lines of at most 76 characters.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let encoded = encode_base64(data);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2);

    // Base64 output is pure ASCII, so byte chunks are valid char boundaries.
    for (i, chunk) in encoded.as_bytes().chunks(MAX_LINE_LENGTH).enumerate() {
        if i > 0 {
            wrapped.push_str("\r\n");
        }
        wrapped.push_str(&String::from_utf8_lossy(chunk));
    }

    wrapped
}

/// Encodes a header value as a single UTF-8 Base64 encoded-word.
///
/// Format: `=?utf-8?B?encoded-text?=`. Plain ASCII input is encoded too.
#[must_use]
pub fn encode_word(text: &str) -> String {
    format!("=?utf-8?B?{}?=", encode_base64(text.as_bytes()))
}

/// Decodes Base64 produced by this module, skipping line breaks.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) fn decode_base64(data: &str) -> Vec<u8> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(cleaned).unwrap()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_base64() {
        assert_eq!(encode_base64(b"mailwisp"), "bWFpbHdpc3A=");
        assert_eq!(decode_base64("bWFp\r\nbHdp\nc3A="), b"mailwisp");
    }

    #[test]
    fn test_base64_wrapped_line_lengths() {
        let data = vec![0xAB_u8; 200];
        let wrapped = encode_base64_wrapped(&data);
        let lines: Vec<&str> = wrapped.split("\r\n").collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[..3].iter().all(|l| l.len() == MAX_LINE_LENGTH));
        assert!(lines[3].len() <= MAX_LINE_LENGTH);
        assert_eq!(decode_base64(&wrapped), data);
    }

    #[test]
    fn test_base64_wrapped_short_input_is_single_line() {
        assert_eq!(encode_base64_wrapped(b"abc"), "YWJj");
        assert_eq!(encode_base64_wrapped(b""), "");
    }

    #[test]
    fn test_encode_word_always_encodes() {
        assert_eq!(encode_word("Hello"), "=?utf-8?B?SGVsbG8=?=");
        assert_eq!(encode_word("Héllo"), "=?utf-8?B?SMOpbGxv?=");
    }

    proptest! {
        #[test]
        fn wrapped_base64_decodes_to_input(data in proptest::collection::vec(any::<u8>(), 0..600)) {
            let wrapped = encode_base64_wrapped(&data);
            prop_assert!(wrapped.split("\r\n").all(|l| l.len() <= MAX_LINE_LENGTH));
            prop_assert_eq!(decode_base64(&wrapped), data);
        }

        #[test]
        fn encoded_word_is_ascii(text in "\\PC*") {
            let word = encode_word(&text);
            prop_assert!(word.is_ascii());
            prop_assert!(word.starts_with("=?utf-8?B?"));
        }
    }
}
