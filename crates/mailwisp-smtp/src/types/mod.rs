//! Core SMTP types.

mod capability;
mod handshake;
mod reply;

pub use capability::{AuthMechanism, Capability};
pub use handshake::Handshake;
pub use reply::{Reply, ReplyCode, ReplyLine};
