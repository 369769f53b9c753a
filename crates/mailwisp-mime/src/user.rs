//! Mail participants.

use std::fmt;

/// A sender or recipient of a mail.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MailUser {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub email: String,
}

impl MailUser {
    /// Creates a user with just an address.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Creates a user with a display name and address.
    #[must_use]
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }
}

impl From<&str> for MailUser {
    fn from(email: &str) -> Self {
        Self::new(email)
    }
}

impl From<String> for MailUser {
    fn from(email: String) -> Self {
        Self::new(email)
    }
}

/// Renders `name <email>` or `<email>`.
impl fmt::Display for MailUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.email),
            None => write!(f, "<{}>", self.email),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_name() {
        assert_eq!(MailUser::new("user@example.com").to_string(), "<user@example.com>");
    }

    #[test]
    fn test_display_with_name() {
        let user = MailUser::with_name("John Doe", "john@example.com");
        assert_eq!(user.to_string(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_equality_includes_name() {
        assert_eq!(MailUser::from("a@example.com"), MailUser::new("a@example.com"));
        assert_ne!(
            MailUser::with_name("A", "a@example.com"),
            MailUser::new("a@example.com")
        );
    }
}
