//! Result of the EHLO/HELO exchange.

use std::collections::HashSet;

use super::capability::{AuthMechanism, Capability};
use super::reply::Reply;

/// Server capabilities learned from the last EHLO or HELO.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    /// Advertised capabilities.
    pub capabilities: HashSet<Capability>,
}

impl Handshake {
    /// Collects the capabilities from every line of a handshake reply.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        let capabilities = reply
            .text_lines()
            .flat_map(|line| Capability::parse_line(&line))
            .collect();
        Self { capabilities }
    }

    /// Checks if the server advertised a capability.
    #[must_use]
    pub fn supports(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Capability::StartTls)
    }

    /// Checks if an authentication mechanism is advertised.
    #[must_use]
    pub fn supports_auth(&self, mechanism: AuthMechanism) -> bool {
        self.supports(&Capability::Auth(mechanism))
    }

    /// Largest message the server accepts, if it announced one.
    ///
    /// `SIZE 0` and a bare `SIZE` mean there is no fixed limit.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.capabilities.iter().find_map(|capability| match capability {
            Capability::Size(size) => size.filter(|&limit| limit > 0),
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.capabilities
            .iter()
            .filter_map(|capability| match capability {
                Capability::Auth(mechanism) => Some(*mechanism),
                _ => None,
            })
            .collect()
    }

    /// Mechanism used when the caller does not pick one: PLAIN if advertised, else LOGIN.
    #[must_use]
    pub fn preferred_auth(&self) -> AuthMechanism {
        if self.supports_auth(AuthMechanism::Plain) {
            AuthMechanism::Plain
        } else {
            AuthMechanism::Login
        }
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
    use crate::types::ReplyCode;
    use bytes::Bytes;

    fn ehlo(lines: &[&'static str]) -> Handshake {
        Handshake::from_reply(&Reply::new(
            ReplyCode::OK,
            lines.iter().map(|l| Bytes::from_static(l.as_bytes())).collect(),
        ))
    }

    #[test]
    fn test_from_ehlo_reply() {
        let handshake = ehlo(&[
            "smtp.example.com greets you",
            "SIZE 35882577",
            "8BITMIME",
            "AUTH LOGIN PLAIN",
            "STARTTLS",
            "PIPELINING",
        ]);

        assert!(handshake.supports_starttls());
        assert!(handshake.supports(&Capability::EightBitMime));
        assert!(handshake.supports(&Capability::Pipelining));
        assert!(!handshake.supports(&Capability::PipeConnect));
        assert_eq!(handshake.max_message_size(), Some(35_882_577));
        assert_eq!(handshake.auth_mechanisms().len(), 2);
        assert_eq!(handshake.preferred_auth(), AuthMechanism::Plain);
    }

    #[test]
    fn test_helo_reply_has_no_capabilities() {
        let handshake = ehlo(&["smtp.example.com"]);
        assert!(handshake.capabilities.is_empty());
        assert_eq!(handshake.max_message_size(), None);
    }

    #[test]
    fn test_size_zero_means_unlimited() {
        assert_eq!(ehlo(&["host", "SIZE 0"]).max_message_size(), None);
        assert_eq!(ehlo(&["host", "SIZE"]).max_message_size(), None);
    }

    #[test]
    fn test_preferred_auth_falls_back_to_login() {
        assert_eq!(ehlo(&["host", "AUTH LOGIN"]).preferred_auth(), AuthMechanism::Login);
        assert_eq!(ehlo(&["host"]).preferred_auth(), AuthMechanism::Login);
    }
}
