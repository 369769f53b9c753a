//! Client commands and their wire encoding.

use crate::types::AuthMechanism;

/// A client request, one line on the wire except for [`Command::MailData`].
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain greeting, used when EHLO is refused.
    Helo {
        /// Name the client announces.
        hostname: String,
    },
    /// Extended greeting that asks for the capability list.
    Ehlo {
        /// Name the client announces.
        hostname: String,
    },
    /// Asks the server to switch the channel to TLS.
    StartTls,
    /// Opens a SASL exchange.
    Auth {
        /// Mechanism name sent after `AUTH`.
        mechanism: AuthMechanism,
        /// Base64 payload sent on the same line, if any.
        initial_response: Option<String>,
    },
    /// A bare SASL response line (base64 username or password for LOGIN).
    AuthResponse(String),
    /// Opens a transaction for the given reverse path, declaring an 8-bit body.
    MailFrom {
        /// Envelope sender.
        from: String,
    },
    /// Adds one envelope recipient.
    RcptTo {
        /// Envelope recipient.
        to: String,
    },
    /// Asks to start the message body.
    Data,
    /// The rendered message, sent after DATA was accepted.
    MailData(String),
    /// Aborts the current transaction.
    Rset,
    /// Ends the session.
    Quit,
}

impl Command {
    /// Name used in logs. Never includes arguments.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::AuthResponse(_) => "AUTH response",
            Self::MailFrom { .. } => "MAIL FROM",
            Self::RcptTo { .. } => "RCPT TO",
            Self::Data => "DATA",
            Self::MailData(_) => "message data",
            Self::Rset => "RSET",
            Self::Quit => "QUIT",
        }
    }

    /// Wire form of the command, terminated by CRLF.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut line = match self {
            Self::Helo { hostname } | Self::Ehlo { hostname } => {
                format!("{} {hostname}", self.name()).into_bytes()
            }
            Self::Auth {
                mechanism,
                initial_response: Some(initial),
            } => format!("AUTH {mechanism} {initial}").into_bytes(),
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {mechanism}").into_bytes(),
            Self::AuthResponse(response) => response.as_bytes().to_vec(),
            Self::MailFrom { from } => format!("MAIL FROM: <{from}> BODY=8BITMIME").into_bytes(),
            Self::RcptTo { to } => format!("RCPT TO: <{to}>").into_bytes(),
            Self::MailData(data) => {
                let mut body = dot_stuff(data.as_bytes());
                body.extend_from_slice(b"\r\n.");
                body
            }
            Self::StartTls | Self::Data | Self::Rset | Self::Quit => self.name().as_bytes().to_vec(),
        };
        line.extend_from_slice(b"\r\n");
        line
    }
}

/// Debug output hides arguments that may carry credentials or mail content.
impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Helo { hostname } | Self::Ehlo { hostname } => {
                write!(f, "{} {hostname}", self.name())
            }
            Self::Auth { mechanism, .. } => write!(f, "AUTH {mechanism}"),
            Self::MailFrom { from } => write!(f, "MAIL FROM <{from}>"),
            Self::RcptTo { to } => write!(f, "RCPT TO <{to}>"),
            Self::MailData(data) => write!(f, "message data ({} bytes)", data.len()),
            _ => f.write_str(self.name()),
        }
    }
}

/// Doubles a leading `.` on every line so no line of the message can end the data.
fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut line_start = true;
    for &byte in data {
        if line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        line_start = byte == b'\n';
    }
    out
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

    #[test]
    fn test_greetings_carry_hostname() {
        let ehlo = Command::Ehlo {
            hostname: "mx.local".into(),
        };
        let helo = Command::Helo {
            hostname: "mx.local".into(),
        };
        assert_eq!(ehlo.serialize(), b"EHLO mx.local\r\n");
        assert_eq!(helo.serialize(), b"HELO mx.local\r\n");
        assert_eq!(Command::StartTls.serialize(), b"STARTTLS\r\n");
    }

    #[test]
    fn test_auth_with_initial_response() {
        let auth = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AGJvYgBodW50ZXIy".into()),
        };
        assert_eq!(auth.serialize(), b"AUTH PLAIN AGJvYgBodW50ZXIy\r\n");
    }

    #[test]
    fn test_auth_login_steps() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        assert_eq!(cmd.serialize(), b"AUTH LOGIN\r\n");
        assert_eq!(
            Command::AuthResponse("dXNlcg==".into()).serialize(),
            b"dXNlcg==\r\n"
        );
    }

    #[test]
    fn test_mail_from_declares_8bitmime() {
        let mail_from = Command::MailFrom {
            from: "noreply@shop.test".into(),
        };
        assert_eq!(
            mail_from.serialize(),
            b"MAIL FROM: <noreply@shop.test> BODY=8BITMIME\r\n"
        );
    }

    #[test]
    fn test_rcpt_to_wraps_address() {
        let rcpt = Command::RcptTo {
            to: "buyer@shop.test".into(),
        };
        assert_eq!(rcpt.serialize(), b"RCPT TO: <buyer@shop.test>\r\n");
    }

    #[test]
    fn test_data_rset_quit() {
        assert_eq!(Command::Data.serialize(), b"DATA\r\n");
        assert_eq!(Command::Rset.serialize(), b"RSET\r\n");
        assert_eq!(Command::Quit.serialize(), b"QUIT\r\n");
    }

    #[test]
    fn test_mail_data_ends_with_marker() {
        let cmd = Command::MailData("Subject: x\r\n\r\nHello".into());
        assert_eq!(cmd.serialize(), b"Subject: x\r\n\r\nHello\r\n.\r\n");
    }

    #[test]
    fn test_mail_data_dot_stuffing() {
        let cmd = Command::MailData(".hidden\r\nline\r\n.\r\nmid.dot\n..two".into());
        assert_eq!(
            cmd.serialize(),
            b"..hidden\r\nline\r\n..\r\nmid.dot\n...two\r\n.\r\n"
        );
    }

    #[test]
    fn test_debug_hides_secrets() {
        let auth = Command::Auth {
            mechanism: AuthMechanism::XOAuth2,
            initial_response: Some("c2VjcmV0".into()),
        };
        assert_eq!(format!("{auth:?}"), "AUTH XOAUTH2");
        assert_eq!(
            format!("{:?}", Command::AuthResponse("c2VjcmV0".into())),
            "AUTH response"
        );
    }
}
