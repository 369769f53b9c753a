//! SMTP service extensions advertised in the EHLO reply.

use std::fmt;

/// A capability the server advertised.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `STARTTLS`: the channel can be upgraded in place.
    StartTls,
    /// `8BITMIME`: bodies may carry raw 8-bit text.
    EightBitMime,
    /// `PIPELINING`: commands may be sent without waiting for each reply.
    Pipelining,
    /// `PIPECONNECT` (also spelled `PIPE-CONNECT`): EHLO may be sent before
    /// the greeting arrives.
    PipeConnect,
    /// `AUTH`: one entry per advertised mechanism.
    Auth(AuthMechanism),
    /// `SIZE`: largest accepted message in bytes, if the server said.
    Size(Option<usize>),
}

impl Capability {
    /// Parses one EHLO reply line into the capabilities it announces.
    ///
    /// Unknown keywords and the greeting line yield nothing. Both `AUTH PLAIN`
    /// and the legacy `AUTH=PLAIN` spelling are understood.
    #[must_use]
    pub fn parse_line(line: &str) -> Vec<Self> {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return Vec::new();
        };

        let (keyword, inline) = match first.split_once('=') {
            Some((keyword, value)) => (keyword, Some(value)),
            None => (first, None),
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => vec![Self::StartTls],
            "8BITMIME" => vec![Self::EightBitMime],
            "PIPELINING" => vec![Self::Pipelining],
            "PIPECONNECT" | "PIPE-CONNECT" => vec![Self::PipeConnect],
            "SIZE" => vec![Self::Size(
                inline.or_else(|| words.next()).and_then(|s| s.parse().ok()),
            )],
            "AUTH" => inline
                .into_iter()
                .chain(words)
                .filter_map(AuthMechanism::parse)
                .map(Self::Auth)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// SASL mechanism usable with `AUTH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// Username and password in one base64 blob.
    Plain,
    /// Username and password sent in two challenge rounds.
    Login,
    /// Keyed digest of a server challenge. Recognized but not implemented.
    CramMd5,
    /// `OAuth2` bearer token in the `XOAUTH2` format.
    XOAuth2,
}

impl AuthMechanism {
    const NAMES: [(Self, &'static str); 4] = [
        (Self::Plain, "PLAIN"),
        (Self::Login, "LOGIN"),
        (Self::CramMd5, "CRAM-MD5"),
        (Self::XOAuth2, "XOAUTH2"),
    ];

    /// Looks up a mechanism by its registered name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, known)| known.eq_ignore_ascii_case(name))
            .map(|(mechanism, _)| *mechanism)
    }

    /// Registered name, as sent after `AUTH`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        Self::NAMES[self as usize].1
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
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

    mod capability_parse_tests {
        use super::*;

        #[test]
        fn parse_keywords() {
            assert_eq!(Capability::parse_line("STARTTLS"), [Capability::StartTls]);
            assert_eq!(Capability::parse_line("starttls"), [Capability::StartTls]);
            assert_eq!(Capability::parse_line("8BITMIME"), [Capability::EightBitMime]);
            assert_eq!(Capability::parse_line("PIPELINING"), [Capability::Pipelining]);
            assert_eq!(Capability::parse_line("PIPECONNECT"), [Capability::PipeConnect]);
            assert_eq!(Capability::parse_line("pipeconnect"), [Capability::PipeConnect]);
            assert_eq!(Capability::parse_line("PIPE-CONNECT"), [Capability::PipeConnect]);
        }

        #[test]
        fn parse_auth_list() {
            assert_eq!(
                Capability::parse_line("AUTH PLAIN LOGIN XOAUTH2 GSSAPI"),
                [
                    Capability::Auth(AuthMechanism::Plain),
                    Capability::Auth(AuthMechanism::Login),
                    Capability::Auth(AuthMechanism::XOAuth2),
                ]
            );
        }

        #[test]
        fn parse_legacy_auth_spelling() {
            assert_eq!(
                Capability::parse_line("AUTH=LOGIN PLAIN"),
                [
                    Capability::Auth(AuthMechanism::Login),
                    Capability::Auth(AuthMechanism::Plain),
                ]
            );
        }

        #[test]
        fn parse_size() {
            assert_eq!(
                Capability::parse_line("SIZE 52428800"),
                [Capability::Size(Some(52_428_800))]
            );
            assert_eq!(Capability::parse_line("SIZE"), [Capability::Size(None)]);
        }

        #[test]
        fn parse_ignores_unknown_and_greeting() {
            assert!(Capability::parse_line("smtp.example.com Hello [10.0.0.1]").is_empty());
            assert!(Capability::parse_line("ENHANCEDSTATUSCODES").is_empty());
            assert!(Capability::parse_line("").is_empty());
        }
    }

    mod auth_mechanism_tests {
        use super::*;

        #[test]
        fn names_round_trip() {
            for (mechanism, name) in AuthMechanism::NAMES {
                assert_eq!(mechanism.as_str(), name);
                assert_eq!(AuthMechanism::parse(&name.to_lowercase()), Some(mechanism));
            }
        }

        #[test]
        fn unknown_names() {
            assert_eq!(AuthMechanism::parse("OAUTHBEARER"), None);
            assert_eq!(AuthMechanism::parse(""), None);
            assert_eq!(AuthMechanism::CramMd5.to_string(), "CRAM-MD5");
        }
    }
}
