//! `Content-Type` header values.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Characters that force a parameter value into a quoted string (RFC 2045 tspecials).
const TSPECIALS: &str = "()<>@,;:\\\"/[]?=";

/// A media type such as `text/plain; charset=utf-8`.
///
/// The `type/subtype` essence is stored lowercased. Parameter names are
/// lowercased too and keep insertion order, so the rendered header is stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    essence: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    /// Builds a media type from its `type/subtype` essence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentType`] if either half is missing.
    pub fn new(essence: &str) -> Result<Self> {
        let essence = essence.trim();
        match essence.split_once('/') {
            Some((top, sub)) if !top.trim().is_empty() && !sub.trim().is_empty() => Ok(Self {
                essence: format!("{}/{}", top.trim(), sub.trim()).to_ascii_lowercase(),
                params: Vec::new(),
            }),
            _ => Err(Error::InvalidContentType(essence.to_string())),
        }
    }

    /// `text/<subtype>; charset=utf-8`, used for every text block.
    #[must_use]
    pub fn utf8_text(subtype: &str) -> Self {
        Self {
            essence: format!("text/{subtype}"),
            params: vec![("charset".to_string(), "utf-8".to_string())],
        }
    }

    /// `multipart/<subtype>; boundary=<boundary>`.
    #[must_use]
    pub fn multipart(subtype: &str, boundary: &str) -> Self {
        Self {
            essence: format!("multipart/{subtype}"),
            params: vec![("boundary".to_string(), boundary.to_string())],
        }
    }

    /// `image/<subtype>` without parameters.
    #[must_use]
    pub fn image(subtype: &str) -> Self {
        Self {
            essence: format!("image/{subtype}"),
            params: Vec::new(),
        }
    }

    /// Sets a parameter. A parameter of the same name keeps its slot.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.params.iter().position(|(n, _)| *n == name) {
            Some(index) => self.params[index].1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// Looks up a parameter by name, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find_map(|(n, v)| n.eq_ignore_ascii_case(name).then_some(v.as_str()))
    }

    /// The `type/subtype` part.
    #[must_use]
    pub fn essence(&self) -> &str {
        &self.essence
    }

    /// The part after the slash.
    #[must_use]
    pub fn subtype(&self) -> &str {
        self.essence.split_once('/').map_or("", |(_, sub)| sub)
    }

    /// The `boundary` parameter.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.get("boundary")
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments = s.split(';');
        let mut parsed = Self::new(segments.next().unwrap_or_default())?;
        for (name, value) in segments.filter_map(|segment| segment.split_once('=')) {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            parsed = parsed.param(name.trim(), value);
        }
        Ok(parsed)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.essence)?;
        for (name, value) in &self.params {
            let needs_quotes = value.is_empty()
                || value
                    .chars()
                    .any(|c| c.is_ascii_whitespace() || TSPECIALS.contains(c));
            if needs_quotes {
                write!(f, "; {name}=\"{value}\"")?;
            } else {
                write!(f, "; {name}={value}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_text_blocks_declare_utf8() {
        assert_eq!(
            ContentType::utf8_text("html").to_string(),
            "text/html; charset=utf-8"
        );
    }

    #[test]
    fn test_generated_boundary_renders_bare() {
        let ct = ContentType::multipart("alternative", "0d3c1f4e-8a1b-4c2d-9e0f-123456789abc");

        assert_eq!(ct.boundary(), Some("0d3c1f4e-8a1b-4c2d-9e0f-123456789abc"));
        assert_eq!(
            ct.to_string(),
            "multipart/alternative; boundary=0d3c1f4e-8a1b-4c2d-9e0f-123456789abc"
        );
    }

    #[test]
    fn test_from_str_normalizes_case() {
        let ct: ContentType = " Text/PLAIN ; Charset=UTF-8".parse().unwrap();

        assert_eq!(ct.essence(), "text/plain");
        assert_eq!(ct.subtype(), "plain");
        assert_eq!(ct.get("charset"), Some("UTF-8"));
        assert_eq!(ct.to_string(), "text/plain; charset=UTF-8");
    }

    #[test]
    fn test_quoted_boundary_survives_roundtrip() {
        let header = "multipart/mixed; boundary=\"----=_Part_123\"";
        let ct: ContentType = header.parse().unwrap();

        assert_eq!(ct.boundary(), Some("----=_Part_123"));
        assert_eq!(ct.to_string(), header);
    }

    #[test]
    fn test_rejects_missing_subtype() {
        for bad in ["", "text", "text/", "/plain"] {
            assert!(bad.parse::<ContentType>().is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_param_keeps_position() {
        let ct = ContentType::utf8_text("plain")
            .param("format", "flowed")
            .param("CHARSET", "iso-8859-1");

        assert_eq!(
            ct.to_string(),
            "text/plain; charset=iso-8859-1; format=flowed"
        );
    }
}
