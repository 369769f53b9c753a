//! Mail body content tree.
//!
//! A [`Content`] is either a single [`Block`] or a `multipart/mixed` sequence
//! of blocks sharing one boundary. Boundaries are fresh UUIDs generated when
//! the content is constructed.
//!
//! Block payloads are not escaped against their boundary. Callers must not
//! put a boundary string inside text they hand to a multipart.

use crate::content_type::ContentType;
use crate::encoding::encode_base64_wrapped;
use crate::error::Result;
use crate::header::Headers;
use std::fmt;

fn new_boundary() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Content disposition of a binary part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    /// Displayed inline with the message body.
    #[default]
    Inline,
    /// Offered as a downloadable attachment.
    Attachment,
}

impl Disposition {
    /// Returns the header token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }

    fn header_value(self, filename: Option<&str>) -> String {
        match filename {
            Some(filename) => format!("{}; filename=\"{filename}\"", self.as_str()),
            None => self.as_str().to_string(),
        }
    }
}

/// Identifier referenced from HTML as `cid:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    /// Creates a content id with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContentId {
    fn default() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inline image part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Media type, e.g. `image/png`.
    pub mime: ContentType,
    /// Base64 payload wrapped at 76 characters.
    pub base64: String,
    /// File name announced in `Content-Disposition`.
    pub filename: Option<String>,
    /// Content disposition.
    pub disposition: Disposition,
    /// Content id.
    pub content_id: ContentId,
}

impl Image {
    /// Creates an image from raw bytes and a media type such as `image/webp`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentType`](crate::Error::InvalidContentType)
    /// if `mime` has no `type/subtype`.
    pub fn new(data: &[u8], mime: &str) -> Result<Self> {
        Ok(Self::with_type(data, mime.parse()?))
    }

    /// Creates an `image/png` image.
    #[must_use]
    pub fn png(data: &[u8]) -> Self {
        Self::with_type(data, ContentType::image("png"))
    }

    /// Creates an `image/jpeg` image.
    #[must_use]
    pub fn jpeg(data: &[u8]) -> Self {
        Self::with_type(data, ContentType::image("jpeg"))
    }

    fn with_type(data: &[u8], mime: ContentType) -> Self {
        Self {
            mime,
            base64: encode_base64_wrapped(data),
            filename: None,
            disposition: Disposition::Inline,
            content_id: ContentId::default(),
        }
    }

    /// Sets the file name.
    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the disposition.
    #[must_use]
    pub const fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }

    /// Sets the content id.
    #[must_use]
    pub fn content_id(mut self, content_id: ContentId) -> Self {
        self.content_id = content_id;
        self
    }
}

/// Binary attachment part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Media type, e.g. `application/pdf`.
    pub mime: ContentType,
    /// Base64 payload wrapped at 76 characters.
    pub base64: String,
    /// File name announced in `Content-Disposition`.
    pub filename: Option<String>,
    /// Content disposition.
    pub disposition: Disposition,
}

impl Attachment {
    /// Creates an attachment from raw bytes and its media type.
    ///
    /// The media type is normalized, so `Text/CSV` is sent as `text/csv`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContentType`](crate::Error::InvalidContentType)
    /// if `mime` has no `type/subtype`.
    pub fn new(data: &[u8], mime: &str) -> Result<Self> {
        Ok(Self {
            mime: mime.parse()?,
            base64: encode_base64_wrapped(data),
            filename: None,
            disposition: Disposition::Inline,
        })
    }

    /// Sets the file name.
    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Sets the disposition.
    #[must_use]
    pub const fn disposition(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self
    }
}

/// A leaf of the content tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// `text/plain` body.
    Plain(String),
    /// `text/html` body.
    Html(String),
    /// Base64 encoded image.
    Image(Image),
    /// Base64 encoded attachment.
    Attachment(Attachment),
    /// `multipart/alternative` with a text and an HTML rendition.
    Alternative {
        /// Boundary between the two renditions.
        boundary: String,
        /// Plain text rendition.
        text: String,
        /// HTML rendition.
        html: String,
    },
}

impl Block {
    /// Headers describing this block.
    #[must_use]
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        match self {
            Self::Plain(_) => headers.set("Content-Type", ContentType::utf8_text("plain").to_string()),
            Self::Html(_) => headers.set("Content-Type", ContentType::utf8_text("html").to_string()),
            Self::Alternative { boundary, .. } => headers.set(
                "Content-Type",
                ContentType::multipart("alternative", boundary).to_string(),
            ),
            Self::Image(image) => {
                headers.set("Content-Type", image.mime.to_string());
                headers.set(
                    "Content-Disposition",
                    image.disposition.header_value(image.filename.as_deref()),
                );
                headers.set("Content-ID", format!("<{}>", image.content_id));
                headers.set("Content-Transfer-Encoding", "base64");
            }
            Self::Attachment(attachment) => {
                headers.set("Content-Type", attachment.mime.to_string());
                headers.set(
                    "Content-Disposition",
                    attachment
                        .disposition
                        .header_value(attachment.filename.as_deref()),
                );
                headers.set("Content-Transfer-Encoding", "base64");
            }
        }
        headers
    }

    /// Appends the block body to `out`.
    pub fn write_payload(&self, out: &mut String) {
        match self {
            Self::Plain(text) | Self::Html(text) => out.push_str(text),
            Self::Image(Image { base64, .. }) | Self::Attachment(Attachment { base64, .. }) => {
                out.push_str(base64);
            }
            Self::Alternative {
                boundary,
                text,
                html,
            } => {
                for (content_type, body) in [
                    (ContentType::utf8_text("plain"), text),
                    (ContentType::utf8_text("html"), html),
                ] {
                    out.push_str(&format!(
                        "--{boundary}\nContent-Type: {content_type}\nContent-Transfer-Encoding: 8bit\n\n{body}\n"
                    ));
                }
                out.push_str(&format!("--{boundary}--"));
            }
        }
    }
}

/// Mail body: a single block or a `multipart/mixed` sequence of blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// One block rendered directly as the body.
    Single(Block),
    /// Several blocks separated by `--boundary` lines.
    Multipart {
        /// Boundary between blocks.
        boundary: String,
        /// Blocks in order.
        blocks: Vec<Block>,
    },
}

impl Content {
    /// Plain text body.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Single(Block::Plain(text.into()))
    }

    /// HTML body.
    #[must_use]
    pub fn html(html: impl Into<String>) -> Self {
        Self::Single(Block::Html(html.into()))
    }

    /// Text and HTML renditions of the same body.
    #[must_use]
    pub fn alternative(text: impl Into<String>, html: impl Into<String>) -> Self {
        Self::Single(Block::Alternative {
            boundary: new_boundary(),
            text: text.into(),
            html: html.into(),
        })
    }

    /// Flattens every piece into one `multipart/mixed` content.
    pub fn multipart<I>(pieces: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Self>,
    {
        Self::Multipart {
            boundary: new_boundary(),
            blocks: pieces
                .into_iter()
                .flat_map(|piece| piece.into().into_blocks())
                .collect(),
        }
    }

    /// Folds a sequence of pieces: one block stays single, anything else
    /// becomes a multipart.
    pub fn build<I>(pieces: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Self>,
    {
        let mut blocks: Vec<Block> = pieces
            .into_iter()
            .flat_map(|piece| piece.into().into_blocks())
            .collect();

        match blocks.pop() {
            Some(block) if blocks.is_empty() => Self::Single(block),
            Some(block) => {
                blocks.push(block);
                Self::Multipart {
                    boundary: new_boundary(),
                    blocks,
                }
            }
            None => Self::Multipart {
                boundary: new_boundary(),
                blocks,
            },
        }
    }

    /// Returns the blocks of this content.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        match self {
            Self::Single(block) => std::slice::from_ref(block),
            Self::Multipart { blocks, .. } => blocks,
        }
    }

    /// Consumes the content, returning its blocks.
    #[must_use]
    pub fn into_blocks(self) -> Vec<Block> {
        match self {
            Self::Single(block) => vec![block],
            Self::Multipart { blocks, .. } => blocks,
        }
    }

    /// Top-level headers of this content.
    #[must_use]
    pub fn headers(&self) -> Headers {
        match self {
            Self::Single(block) => block.headers(),
            Self::Multipart { boundary, .. } => [(
                "Content-Type",
                ContentType::multipart("mixed", boundary).to_string(),
            )]
            .into_iter()
            .collect(),
        }
    }

    /// Appends the rendered body to `out`.
    ///
    /// Multipart blocks are introduced by `--boundary`, followed by the block
    /// headers joined with CRLF, a blank line, the payload and a line feed.
    /// No closing delimiter is written.
    pub fn write_payload(&self, out: &mut String) {
        match self {
            Self::Single(block) => block.write_payload(out),
            Self::Multipart { boundary, blocks } => {
                for block in blocks {
                    out.push_str(&format!("--{boundary}\n{}\n\n", block.headers().join("\r\n")));
                    block.write_payload(out);
                    out.push('\n');
                }
            }
        }
    }
}

impl From<Block> for Content {
    fn from(block: Block) -> Self {
        Self::Single(block)
    }
}

impl From<Image> for Content {
    fn from(image: Image) -> Self {
        Self::Single(Block::Image(image))
    }
}

impl From<Attachment> for Content {
    fn from(attachment: Attachment) -> Self {
        Self::Single(Block::Attachment(attachment))
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::plain(text)
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::plain(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn payload(content: &Content) -> String {
        let mut out = String::new();
        content.write_payload(&mut out);
        out
    }

    mod block_tests {
        use super::*;

        #[test]
        fn plain_headers_and_payload() {
            let content = Content::plain("Hello world");
            assert_eq!(
                content.headers().get("Content-Type"),
                Some("text/plain; charset=utf-8")
            );
            assert_eq!(payload(&content), "Hello world");
        }

        #[test]
        fn html_headers() {
            let content = Content::html("<p>Hi</p>");
            assert_eq!(
                content.headers().get("Content-Type"),
                Some("text/html; charset=utf-8")
            );
            assert_eq!(payload(&content), "<p>Hi</p>");
        }

        #[test]
        fn alternative_renders_two_parts() {
            let content = Content::Single(Block::Alternative {
                boundary: "b1".into(),
                text: "T".into(),
                html: "<p>T</p>".into(),
            });

            assert_eq!(
                content.headers().get("Content-Type"),
                Some("multipart/alternative; boundary=b1")
            );
            assert_eq!(
                payload(&content),
                "--b1\nContent-Type: text/plain; charset=utf-8\nContent-Transfer-Encoding: 8bit\n\nT\n\
                 --b1\nContent-Type: text/html; charset=utf-8\nContent-Transfer-Encoding: 8bit\n\n<p>T</p>\n\
                 --b1--"
            );
        }

        #[test]
        fn image_headers() {
            let image = Image::png(b"png-bytes")
                .filename("shot.png")
                .content_id(ContentId::new("logo"));
            let headers = Content::from(image).headers();

            assert_eq!(
                headers.join("\n"),
                "Content-Type: image/png\n\
                 Content-Disposition: inline; filename=\"shot.png\"\n\
                 Content-ID: <logo>\n\
                 Content-Transfer-Encoding: base64"
            );
        }

        #[test]
        fn attachment_headers_and_payload() {
            let attachment = Attachment::new(b"Hello, World!", "application/octet-stream")
                .unwrap()
                .disposition(Disposition::Attachment);
            let content = Content::from(attachment);
            let headers = content.headers();

            assert_eq!(headers.get("Content-Disposition"), Some("attachment"));
            assert_eq!(headers.get("Content-Transfer-Encoding"), Some("base64"));
            assert!(!headers.contains("Content-ID"));
            assert_eq!(payload(&content), "SGVsbG8sIFdvcmxkIQ==");
        }

        #[test]
        fn media_type_is_validated_and_normalized() {
            let attachment = Attachment::new(b"%PDF", " Application/PDF; name=\"q3 report.pdf\"").unwrap();
            assert_eq!(
                Content::from(attachment).headers().get("Content-Type"),
                Some("application/pdf; name=\"q3 report.pdf\"")
            );

            let image = Image::new(b"RIFF", "image/webp").unwrap();
            assert_eq!(image.mime.subtype(), "webp");

            assert!(matches!(
                Attachment::new(b"x", "pdf"),
                Err(crate::Error::InvalidContentType(ref value)) if value == "pdf"
            ));
            assert!(Image::new(b"x", "").is_err());
        }
    }

    mod tree_tests {
        use super::*;

        #[test]
        fn build_single_piece_stays_single() {
            let content = Content::build(["only"]);
            assert!(matches!(content, Content::Single(Block::Plain(ref t)) if t == "only"));
        }

        #[test]
        fn build_several_pieces_becomes_multipart() {
            let content = Content::build(vec![
                Content::plain("a"),
                Content::from(Image::jpeg(b"x")),
                Content::multipart(["b", "c"]),
            ]);

            let Content::Multipart { blocks, .. } = &content else {
                panic!("expected multipart");
            };
            assert_eq!(blocks.len(), 4);
            assert!(matches!(blocks[1], Block::Image(_)));
        }

        #[test]
        fn multipart_always_multipart() {
            let content = Content::multipart(["a"]);
            assert!(matches!(content, Content::Multipart { ref blocks, .. } if blocks.len() == 1));
        }

        #[test]
        fn boundaries_are_unique() {
            let (Content::Multipart { boundary: a, .. }, Content::Multipart { boundary: b, .. }) =
                (Content::multipart(["x"]), Content::multipart(["x"]))
            else {
                panic!("expected multipart");
            };
            assert_ne!(a, b);
        }

        #[test]
        fn multipart_payload_layout() {
            let content = Content::Multipart {
                boundary: "XYZ".into(),
                blocks: vec![Block::Plain("one".into()), Block::Html("<b>two</b>".into())],
            };

            assert_eq!(
                content.headers().get("Content-Type"),
                Some("multipart/mixed; boundary=XYZ")
            );
            assert_eq!(
                payload(&content),
                "--XYZ\nContent-Type: text/plain; charset=utf-8\n\none\n\
                 --XYZ\nContent-Type: text/html; charset=utf-8\n\n<b>two</b>\n"
            );
        }

        #[test]
        fn multipart_block_headers_are_crlf_joined() {
            let content = Content::Multipart {
                boundary: "XYZ".into(),
                blocks: vec![Block::Attachment(Attachment::new(b"a", "text/csv").unwrap())],
            };

            assert!(payload(&content).starts_with(
                "--XYZ\nContent-Type: text/csv\r\nContent-Disposition: inline\r\nContent-Transfer-Encoding: base64\n\n"
            ));
        }
    }
}
