//! Ordered header collection.

use std::fmt;

/// Header block of a mail or MIME part.
///
/// Names are matched case-insensitively. Headers keep the position of their
/// first insertion; [`Headers::set`] overwrites the value in place so the
/// rendered order is stable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// An empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header value, replacing any existing value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.entries[index] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Sets a header value only if the header is not present yet.
    pub fn set_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if self.position(&name).is_none() {
            self.entries.push((name, value.into()));
        }
    }

    /// Gets the value of a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Checks if a header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Returns an iterator over all headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Joins the header lines with the given separator, without a trailing one.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        self.iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

/// Renders every header as `Name: value\r\n`.
impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
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

    #[test]
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.is_empty());
        assert_eq!(headers.to_string(), "");
    }

    #[test]
    fn test_headers_set_get() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_set_overwrites_in_place() {
        let mut headers = Headers::new();
        headers.set("To", "alice@example.com");
        headers.set("Subject", "Hi");
        headers.set("to", "bob@example.com");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.to_string(), "to: bob@example.com\r\nSubject: Hi\r\n");
    }

    #[test]
    fn test_headers_set_if_absent() {
        let mut headers = Headers::new();
        headers.set("Content-Transfer-Encoding", "base64");
        headers.set_if_absent("Content-Transfer-Encoding", "8bit");
        headers.set_if_absent("X-Mailer", "mailwisp");

        assert_eq!(headers.get("Content-Transfer-Encoding"), Some("base64"));
        assert_eq!(headers.get("X-Mailer"), Some("mailwisp"));
    }

    #[test]
    fn test_headers_join() {
        let headers: Headers = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(headers.join("\r\n"), "A: 1\r\nB: 2");
        assert_eq!(headers.to_string(), "A: 1\r\nB: 2\r\n");
    }
}
