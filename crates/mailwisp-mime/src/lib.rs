//! # mailwisp-mime
//!
//! Mail data model and MIME serializer for outgoing SMTP messages.
//!
//! ## Features
//!
//! - **Content tree**: plain, HTML, text/HTML alternatives, inline images and
//!   attachments, folded into a single part or a `multipart/mixed` body
//! - **Deterministic rendering**: ordered headers, CRLF header lines and the
//!   exact body layout carried by the SMTP `DATA` command
//! - **Encoding**: Base64 (wrapped at 76 characters) and RFC 2047 encoded-words
//!
//! ## Quick Start
//!
//! ```
//! use mailwisp_mime::{Content, Image, Mail, MailUser};
//!
//! let content = Content::build(vec![
//!     Content::plain("Welcome aboard."),
//!     Content::from(Image::png(b"\x89PNG").filename("logo.png")),
//!     Content::alternative("**Bye**", "<b>Bye</b>"),
//! ]);
//!
//! let mail = Mail::new(
//!     MailUser::with_name("Team", "team@example.com"),
//!     ["user@example.com"],
//!     "Welcome!",
//!     content,
//! )
//! .cc("manager@example.com");
//!
//! let data = mail.render();
//! assert!(data.contains("Content-Type: multipart/mixed; boundary="));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content;
mod content_type;
mod error;
mod header;
mod mail;
mod user;

pub mod encoding;

pub use content::{Attachment, Block, Content, ContentId, Disposition, Image};
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use mail::Mail;
pub use user::MailUser;
