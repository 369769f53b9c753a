//! # mailwisp-smtp
//!
//! Asynchronous SMTP client built on a single connection actor.
//!
//! ## Features
//!
//! - **Serialized connection**: one task owns the stream, requests from any
//!   number of callers are written one at a time and answered in order
//! - **Session setup**: greeting, EHLO with HELO fallback, STARTTLS with a
//!   fresh handshake over TLS, or implicit TLS
//! - **Authentication**: PLAIN, LOGIN and XOAUTH2
//! - **Mail transactions**: envelope from the mail's to/cc/bcc sets, DATA
//!   with dot-stuffing
//! - **Resilient sender**: a queue that reconnects with a fixed backoff
//!
//! ## Quick Start
//!
//! ```no_run
//! use mailwisp_mime::{Content, Mail};
//! use mailwisp_smtp::{Client, Config};
//!
//! # async fn run() -> mailwisp_smtp::Result<()> {
//! let client = Client::connect(&Config::new("smtp.example.com")).await?;
//! client.login("user@example.com", "password").await?;
//!
//! let mail = Mail::new(
//!     "user@example.com",
//!     ["friend@example.com"],
//!     "Hello",
//!     Content::plain("Hello, World!"),
//! );
//! client.send_mail(&mail).await?;
//! client.quit().await
//! # }
//! ```
//!
//! ## Background Sending
//!
//! ```no_run
//! use mailwisp_mime::Mail;
//! use mailwisp_smtp::{Config, Credentials, Sender, SenderConfig};
//!
//! # async fn run(mail: Mail) -> mailwisp_smtp::Result<()> {
//! let config = SenderConfig::new(Config::new("smtp.example.com"));
//! let (sender, _task) = Sender::spawn(config, Credentials::new("user", "password"));
//!
//! sender.send_mail(mail).await?;
//! sender.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command builders
//! - [`connection`]: Connection actor, client session and configuration
//! - [`parser`]: Streaming reply parser
//! - [`sender`]: Queue with automatic reconnects
//! - [`types`]: Replies, capabilities and handshake results

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod sender;
pub mod types;

pub use connection::{Client, Config, ConfigBuilder, Connection, Security, SmtpStream, TlsConfig};
pub use error::{Error, Result};
pub use sender::{ConnectHook, Credentials, Sender, SenderConfig, SenderHandle};
pub use types::{AuthMechanism, Capability, Handshake, Reply, ReplyCode, ReplyLine};
