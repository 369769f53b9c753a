//! SMTP connection management.
//!
//! [`Connection`] is the actor owning the stream; [`Client`] drives the
//! session (greeting, handshake, STARTTLS, AUTH, mail transactions) on top of it.

mod actor;
mod client;
mod config;
mod stream;

pub use actor::Connection;
pub(crate) use actor::shutdown_requested;
pub use client::Client;
pub use config::{Config, ConfigBuilder, Security, TlsConfig};
pub use stream::{
    BoxedTransport, SmtpStream, Transport, connect, connect_tls, create_tls_connector, server_name,
};
