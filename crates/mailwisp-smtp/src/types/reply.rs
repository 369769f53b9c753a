//! Server replies and their status codes.

use std::fmt;

use bytes::Bytes;

use crate::error::{Error, Result};

/// One decoded line of a server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// Reply code of this line.
    pub code: ReplyCode,
    /// Text after the code and separator.
    pub content: Bytes,
    /// True when the separator was a space (or absent), ending the reply.
    pub is_last: bool,
}

/// A whole server reply: one code and the text of each of its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Code shared by every line.
    pub code: ReplyCode,
    /// Text of every line, in order.
    pub lines: Vec<Bytes>,
}

impl Reply {
    /// Assembles a reply from already decoded parts.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, lines: Vec<Bytes>) -> Self {
        Self { code, lines }
    }

    /// Returns true for any code below 400.
    #[must_use]
    pub const fn is_successful(&self) -> bool {
        self.code.as_u16() < 400
    }

    /// Returns the lines as text, invalid UTF-8 replaced.
    pub fn text_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.lines
            .iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
    }

    /// All lines joined with `\n`.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.text_lines().collect::<Vec<_>>().join("\n")
    }

    /// Accepts the reply if its code is one of `accepted`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandFailed`] with the reply's code and text otherwise.
    pub fn require(self, accepted: &[ReplyCode]) -> Result<Self> {
        self.require_or(accepted, |reply| {
            Error::command_failed(reply.code.as_u16(), reply.message_text())
        })
    }

    /// Accepts the reply if its code is one of `accepted`, building the error otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error built by `error` when the code is not accepted.
    pub fn require_or(self, accepted: &[ReplyCode], error: impl FnOnce(&Self) -> Error) -> Result<Self> {
        if accepted.contains(&self.code) {
            Ok(self)
        } else {
            Err(error(&self))
        }
    }
}

/// Three-digit status code at the start of every reply line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Wraps a raw code. The decoder only produces values in `200..600`.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// The code as a number.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// First digit: 2 completed, 3 waiting for more input, 4 try later, 5 rejected.
    #[must_use]
    pub const fn class(self) -> u16 {
        self.0 / 100
    }

    /// 2xx.
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.class() == 2
    }

    /// 3xx, the server waits for the next piece of the exchange.
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.class() == 3
    }

    /// 4xx.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.class() == 4
    }

    /// 5xx.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.class() == 5
    }

    /// Greeting of a server willing to talk.
    pub const SERVICE_READY: Self = Self(220);
    /// Answer to QUIT.
    pub const CLOSING: Self = Self(221);
    /// Login accepted.
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// Generic acceptance.
    pub const OK: Self = Self(250);
    /// Recipient accepted for forwarding.
    pub const WILL_FORWARD: Self = Self(251);
    /// SASL continuation, carrying a base64 challenge.
    pub const AUTH_CHALLENGE: Self = Self(334);
    /// Go ahead with the message body.
    pub const START_MAIL_INPUT: Self = Self(354);
    /// Server is shutting the channel down.
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// Unknown command, e.g. EHLO on an old server.
    pub const NOT_RECOGNIZED: Self = Self(502);
    /// Credentials rejected.
    pub const AUTH_FAILED: Self = Self(535);
    /// No such mailbox or access denied.
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
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

    fn reply(code: u16, lines: &[&'static str]) -> Reply {
        Reply::new(
            ReplyCode::new(code),
            lines.iter().map(|l| Bytes::from_static(l.as_bytes())).collect(),
        )
    }

    mod reply_code_tests {
        use super::*;

        #[test]
        fn class_follows_first_digit() {
            assert_eq!(ReplyCode::START_MAIL_INPUT.class(), 3);
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::AUTH_SUCCEEDED.is_success());
            assert!(ReplyCode::AUTH_CHALLENGE.is_intermediate());
            assert!(ReplyCode::START_MAIL_INPUT.is_intermediate());
            assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
            assert!(ReplyCode::NOT_RECOGNIZED.is_permanent());
            assert!(ReplyCode::MAILBOX_UNAVAILABLE.is_permanent());
        }

        #[test]
        fn display_and_ordering() {
            assert_eq!(ReplyCode::WILL_FORWARD.to_string(), "251");
            assert!(ReplyCode::OK < ReplyCode::SERVICE_UNAVAILABLE);
        }
    }

    mod reply_tests {
        use super::*;

        #[test]
        fn successful_is_below_400() {
            assert!(reply(220, &["ready"]).is_successful());
            assert!(reply(354, &["go ahead"]).is_successful());
            assert!(reply(399, &[""]).is_successful());
            assert!(!reply(400, &[""]).is_successful());
            assert!(!reply(554, &["no"]).is_successful());
        }

        #[test]
        fn message_text_joins_lines() {
            let reply = reply(250, &["relay.test greets you", "SIZE 1000", "STARTTLS"]);
            assert_eq!(reply.message_text(), "relay.test greets you\nSIZE 1000\nSTARTTLS");
        }

        #[test]
        fn message_text_replaces_invalid_utf8() {
            let reply = Reply::new(ReplyCode::OK, vec![Bytes::from_static(b"ok \xff")]);
            assert_eq!(reply.message_text(), "ok \u{fffd}");
        }

        #[test]
        fn require_accepts_listed_codes() {
            let reply = reply(251, &["forwarding"]);
            let accepted = reply.require(&[ReplyCode::OK, ReplyCode::WILL_FORWARD]).unwrap();
            assert_eq!(accepted.code, ReplyCode::WILL_FORWARD);
        }

        #[test]
        fn require_reports_code_and_text() {
            let err = reply(550, &["no such user"])
                .require(&[ReplyCode::OK])
                .unwrap_err();
            assert!(matches!(
                err,
                Error::CommandFailed { code: 550, ref message } if message == "no such user"
            ));
        }

        #[test]
        fn require_or_builds_custom_error() {
            let err = reply(250, &["ok"])
                .require_or(&[ReplyCode::AUTH_CHALLENGE], |r| Error::LoginFailed {
                    code: r.code.as_u16(),
                    message: r.message_text(),
                })
                .unwrap_err();
            assert!(matches!(err, Error::LoginFailed { code: 250, .. }));
        }
    }
}
