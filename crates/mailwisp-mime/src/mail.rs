//! Outgoing mail and its DATA rendering.

use crate::content::Content;
use crate::encoding::encode_word;
use crate::header::Headers;
use crate::user::MailUser;
use chrono::{DateTime, FixedOffset, Local};
use std::collections::BTreeSet;

/// `Date` header format (RFC 5322).
const DATE_FORMAT: &str = "%a, %-d %b %Y %H:%M:%S %z";

/// A mail ready to be sent over SMTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    /// Unique id, rendered as `Message-Id: <id@localhost>`.
    pub message_id: String,
    /// Sender.
    pub from: MailUser,
    /// Address replies should go to.
    pub reply_to: Option<MailUser>,
    /// Primary recipients.
    pub to: BTreeSet<MailUser>,
    /// Carbon copy recipients.
    pub cc: BTreeSet<MailUser>,
    /// Blind carbon copy recipients. Never rendered in headers.
    pub bcc: BTreeSet<MailUser>,
    /// Subject line.
    pub subject: String,
    /// Body.
    pub content: Content,
    /// Extra headers, overlaid on the content headers.
    pub custom_headers: Headers,
}

impl Mail {
    /// Creates a new mail with a freshly generated message id.
    pub fn new<U>(
        from: impl Into<MailUser>,
        to: impl IntoIterator<Item = U>,
        subject: impl Into<String>,
        content: impl Into<Content>,
    ) -> Self
    where
        U: Into<MailUser>,
    {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            reply_to: None,
            to: to.into_iter().map(Into::into).collect(),
            cc: BTreeSet::new(),
            bcc: BTreeSet::new(),
            subject: subject.into(),
            content: content.into(),
            custom_headers: Headers::new(),
        }
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, user: impl Into<MailUser>) -> Self {
        self.to.insert(user.into());
        self
    }

    /// Adds a CC recipient.
    #[must_use]
    pub fn cc(mut self, user: impl Into<MailUser>) -> Self {
        self.cc.insert(user.into());
        self
    }

    /// Adds a BCC recipient.
    #[must_use]
    pub fn bcc(mut self, user: impl Into<MailUser>) -> Self {
        self.bcc.insert(user.into());
        self
    }

    /// Sets the reply-to address.
    #[must_use]
    pub fn reply_to(mut self, user: impl Into<MailUser>) -> Self {
        self.reply_to = Some(user.into());
        self
    }

    /// Adds a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.set(name, value);
        self
    }

    /// Envelope recipients: to, then cc, then bcc, each address once.
    #[must_use]
    pub fn recipients(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(|user| user.email.as_str())
            .filter(|email| seen.insert(*email))
            .collect()
    }

    /// Headers of this mail, dated now.
    #[must_use]
    pub fn headers(&self) -> Headers {
        self.headers_at(&Local::now().fixed_offset())
    }

    /// Headers of this mail with the given `Date`.
    #[must_use]
    pub fn headers_at(&self, date: &DateTime<FixedOffset>) -> Headers {
        let mut headers = self.content.headers();
        for (name, value) in self.custom_headers.iter() {
            headers.set(name, value);
        }

        headers.set("MIME-Version", "1.0");
        headers.set("Message-Id", format!("<{}@localhost>", self.message_id));
        headers.set("Date", date.format(DATE_FORMAT).to_string());
        headers.set("From", self.from.to_string());
        headers.set("To", join_users(&self.to));
        if let Some(reply_to) = &self.reply_to {
            headers.set("Reply-To", reply_to.to_string());
        }
        if !self.cc.is_empty() {
            headers.set("Cc", join_users(&self.cc));
        }
        headers.set("Subject", encode_word(&self.subject));
        headers.set_if_absent("Content-Transfer-Encoding", "8bit");

        headers
    }

    /// Renders headers, blank line and body, dated now.
    #[must_use]
    pub fn render(&self) -> String {
        self.render_at(&Local::now().fixed_offset())
    }

    /// Renders headers, blank line and body with the given `Date`.
    ///
    /// Header lines end in CRLF, nested MIME bodies use LF. The SMTP end of
    /// data marker is not included.
    #[must_use]
    pub fn render_at(&self, date: &DateTime<FixedOffset>) -> String {
        let mut out = self.headers_at(date).to_string();
        out.push_str("\r\n");
        self.content.write_payload(&mut out);
        out
    }
}

fn join_users(users: &BTreeSet<MailUser>) -> String {
    users
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
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
    use crate::content::Block;
    use crate::content_type::ContentType;
    use crate::encoding::decode_base64;

    fn fixed_date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-03-05T09:04:05+01:00").unwrap()
    }

    fn sample() -> Mail {
        Mail::new(
            MailUser::with_name("Sender", "sender@example.com"),
            ["alice@example.com"],
            "Hello",
            Content::plain("Hello world"),
        )
    }

    #[test]
    fn test_header_order_and_values() {
        let mut mail = sample();
        mail.message_id = "ID1".into();
        let headers = mail.headers_at(&fixed_date());
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();

        assert_eq!(
            names,
            [
                "Content-Type",
                "MIME-Version",
                "Message-Id",
                "Date",
                "From",
                "To",
                "Subject",
                "Content-Transfer-Encoding"
            ]
        );
        assert_eq!(headers.get("Message-Id"), Some("<ID1@localhost>"));
        assert_eq!(headers.get("Date"), Some("Tue, 5 Mar 2024 09:04:05 +0100"));
        assert_eq!(headers.get("From"), Some("Sender <sender@example.com>"));
        assert_eq!(headers.get("To"), Some("<alice@example.com>"));
        assert_eq!(headers.get("Subject"), Some("=?utf-8?B?SGVsbG8=?="));
    }

    #[test]
    fn test_custom_headers_overlay_content_headers() {
        let mail = sample()
            .header("content-type", "text/markdown")
            .header("X-Campaign", "spring")
            .header("From", "spoofed@example.com");
        let headers = mail.headers_at(&fixed_date());

        assert_eq!(headers.get("Content-Type"), Some("text/markdown"));
        assert_eq!(headers.get("X-Campaign"), Some("spring"));
        assert_eq!(headers.get("From"), Some("Sender <sender@example.com>"));
    }

    #[test]
    fn test_reply_to_and_cc() {
        let mail = sample()
            .reply_to("replies@example.com")
            .cc(MailUser::with_name("Bob", "bob@example.com"))
            .cc("carol@example.com");
        let headers = mail.headers_at(&fixed_date());

        assert_eq!(headers.get("Reply-To"), Some("<replies@example.com>"));
        assert_eq!(
            headers.get("Cc"),
            Some("<carol@example.com>, Bob <bob@example.com>")
        );
    }

    #[test]
    fn test_bcc_never_rendered() {
        let mail = sample().bcc("hidden@example.com");
        let rendered = mail.render_at(&fixed_date());

        assert!(!rendered.contains("hidden@example.com"));
        assert!(!mail.headers_at(&fixed_date()).contains("Bcc"));
        assert!(mail.recipients().contains(&"hidden@example.com"));
    }

    #[test]
    fn test_recipients_order_and_dedup() {
        let mail = Mail::new(
            "sender@example.com",
            ["b@example.com", "a@example.com"],
            "s",
            "body",
        )
        .cc("c@example.com")
        .cc(MailUser::with_name("A again", "a@example.com"))
        .bcc("d@example.com");

        assert_eq!(
            mail.recipients(),
            ["a@example.com", "b@example.com", "c@example.com", "d@example.com"]
        );
    }

    #[test]
    fn test_subject_is_encoded_word() {
        let mut mail = sample();
        mail.subject = "Grüße".into();
        let headers = mail.headers_at(&fixed_date());
        let subject = headers.get("Subject").unwrap();
        let inner = subject
            .strip_prefix("=?utf-8?B?")
            .and_then(|s| s.strip_suffix("?="))
            .unwrap();

        assert_eq!(decode_base64(inner), "Grüße".as_bytes());
    }

    #[test]
    fn test_render_plain() {
        let mut mail = sample();
        mail.message_id = "ID1".into();

        assert_eq!(
            mail.render_at(&fixed_date()),
            "Content-Type: text/plain; charset=utf-8\r\n\
             MIME-Version: 1.0\r\n\
             Message-Id: <ID1@localhost>\r\n\
             Date: Tue, 5 Mar 2024 09:04:05 +0100\r\n\
             From: Sender <sender@example.com>\r\n\
             To: <alice@example.com>\r\n\
             Subject: =?utf-8?B?SGVsbG8=?=\r\n\
             Content-Transfer-Encoding: 8bit\r\n\
             \r\n\
             Hello world"
        );
    }

    #[test]
    fn test_render_alternative_uses_header_boundary() {
        let mut mail = sample();
        mail.content = Content::alternative("T", "<p>T</p>");
        let rendered = mail.render_at(&fixed_date());

        let (head, body) = rendered.split_once("\r\n\r\n").unwrap();
        let content_type = head
            .split("\r\n")
            .find_map(|line| line.strip_prefix("Content-Type: "))
            .map(str::parse::<ContentType>)
            .unwrap()
            .unwrap();
        assert_eq!(content_type.subtype(), "alternative");
        let boundary = content_type.boundary().unwrap();

        let delimiter = format!("--{boundary}\n");
        let parts: Vec<&str> = body.split(delimiter.as_str()).skip(1).collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("Content-Type: text/plain; charset=utf-8\n"));
        assert!(parts[1].starts_with("Content-Type: text/html; charset=utf-8\n"));
        assert!(parts[1].ends_with(&format!("<p>T</p>\n--{boundary}--")));
    }

    #[test]
    fn test_single_image_keeps_base64_encoding() {
        let mut mail = sample();
        mail.content = Content::from(Block::Image(crate::content::Image::png(b"img")));
        let headers = mail.headers_at(&fixed_date());

        assert_eq!(headers.get("Content-Transfer-Encoding"), Some("base64"));
        assert_eq!(headers.get("Content-Type"), Some("image/png"));
    }
}
