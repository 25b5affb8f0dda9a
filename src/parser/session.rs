//! Parse sessions.
//!
//! A [`MailParser`] holds at most one message source. Setting the source
//! tokenizes and classifies the message; every query after that reads the
//! classified tree. Adding middleware re-runs classification on the
//! tokenized tree, so middleware can be added before or after the source.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::body::{BodyAssembler, BodyType};
use super::charset::CharsetNormalizer;
use super::classify::{nearest_related, Classifier};
use super::header;
use super::middleware::{Middleware, MiddlewareStack};
use super::tokenizer::{Tokenizer, MAX_DEPTH};
use crate::error::{MimeError, Result};
use crate::export::attachment::{self, FilenameStrategy, SavedAttachment};
use crate::model::address::EmailAddress;
use crate::model::attachment::Attachment;
use crate::model::header::HeaderField;
use crate::model::part::{MimePart, PartId, PartRole};
use crate::store::source::Source;

/// Parser settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Charset for undeclared 8-bit text that is not valid UTF-8.
    pub default_charset: String,
    /// Maximum multipart nesting depth.
    pub max_depth: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_charset: "iso-8859-1".to_string(),
            max_depth: MAX_DEPTH,
        }
    }
}

/// A decoded header value: one string, or all values of a repeated header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    fn from_values(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            Self::Single(values.remove(0))
        } else {
            Self::Multiple(values)
        }
    }

    /// First (or only) value.
    pub fn first(&self) -> &str {
        match self {
            Self::Single(v) => v,
            Self::Multiple(vs) => vs.first().map_or("", String::as_str),
        }
    }

    /// All values in header order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(v) => vec![v.as_str()],
            Self::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.values().join("\n"))
    }
}

struct Message {
    source: Source,
    /// Tree as produced by the tokenizer, before any middleware ran.
    tokenized: MimePart,
    root: MimePart,
}

/// Parses one message and answers queries about it.
///
/// ```
/// use mimeshell::parser::body::BodyType;
/// use mimeshell::parser::session::MailParser;
///
/// let mut parser = MailParser::new();
/// parser.set_text("Subject: Hello\r\n\r\nHi there\r\n")?;
/// assert_eq!(parser.get_header("subject")?.unwrap().first(), "Hello");
/// assert_eq!(parser.get_message_body(BodyType::Text)?, "Hi there\r\n");
/// # Ok::<(), mimeshell::error::MimeError>(())
/// ```
pub struct MailParser {
    config: ParserConfig,
    charsets: CharsetNormalizer,
    middleware: MiddlewareStack,
    message: Option<Message>,
}

impl Default for MailParser {
    fn default() -> Self {
        Self::with_config(ParserConfig::default())
    }
}

impl MailParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ParserConfig) -> Self {
        let charsets = CharsetNormalizer::new(&config.default_charset);
        Self {
            config,
            charsets,
            middleware: MiddlewareStack::new(),
            message: None,
        }
    }

    // ── Source selection ────────────────────────────────────────

    /// Parse the message file at `path`.
    pub fn set_path(&mut self, path: impl AsRef<Path>) -> Result<&mut Self> {
        self.ensure_no_source()?;
        let source = Source::open(path)?;
        self.load(source)
    }

    /// Parse a message read from `reader`. The reader is kept until the
    /// parser is dropped.
    pub fn set_stream(&mut self, reader: impl Read + 'static) -> Result<&mut Self> {
        self.ensure_no_source()?;
        let source = Source::from_reader(reader)?;
        self.load(source)
    }

    /// Parse an in-memory message.
    pub fn set_text(&mut self, data: impl Into<Vec<u8>>) -> Result<&mut Self> {
        self.ensure_no_source()?;
        self.load(Source::from_bytes(data))
    }

    /// Append `middleware` to the classification chain. It runs before any
    /// middleware added earlier.
    pub fn add_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middleware.add(middleware);
        if let Some(mut message) = self.message.take() {
            message.root = classify(&message.tokenized, message.source.data(), &self.middleware);
            self.message = Some(message);
        }
        self
    }

    fn ensure_no_source(&self) -> Result<()> {
        match self.message {
            Some(_) => Err(MimeError::Configuration(
                "a message source is already set".to_string(),
            )),
            None => Ok(()),
        }
    }

    fn load(&mut self, source: Source) -> Result<&mut Self> {
        let start = source.message_start();
        let tokenized = Tokenizer::new(source.data(), &self.charsets)
            .with_max_depth(self.config.max_depth)
            .tokenize(start)?;
        let root = classify(&tokenized, source.data(), &self.middleware);
        debug!(source = ?source, parts = root.walk().count(), "Message parsed");
        self.message = Some(Message {
            source,
            tokenized,
            root,
        });
        Ok(self)
    }

    fn message(&self) -> Result<&Message> {
        self.message.as_ref().ok_or_else(|| {
            MimeError::Configuration(
                "no message source set; call set_path, set_stream or set_text first".to_string(),
            )
        })
    }

    // ── Headers ─────────────────────────────────────────────────

    /// Undecoded values of every top-level header called `name`.
    ///
    /// `None` when the header is absent; an empty header yields `Some` with
    /// an empty string.
    pub fn get_raw_header(&self, name: &str) -> Result<Option<Vec<String>>> {
        let values: Vec<String> = self
            .message()?
            .root
            .headers
            .all(name)
            .map(HeaderField::raw_value)
            .collect();
        Ok((!values.is_empty()).then_some(values))
    }

    /// Decoded value of a header, or all values when it repeats.
    pub fn get_header(&self, name: &str) -> Result<Option<HeaderValue>> {
        let values: Vec<String> = self
            .message()?
            .root
            .headers
            .all(name)
            .map(|f| header::decode_value(&f.value, &self.charsets))
            .collect();
        Ok((!values.is_empty()).then(|| HeaderValue::from_values(values)))
    }

    /// Every top-level header, decoded, names lower-cased, in first-seen order.
    pub fn get_headers(&self) -> Result<Vec<(String, HeaderValue)>> {
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for field in &self.message()?.root.headers {
            let name = field.name.to_ascii_lowercase();
            let value = header::decode_value(&field.value, &self.charsets);
            match grouped.iter_mut().find(|(n, _)| *n == name) {
                Some((_, values)) => values.push(value),
                None => grouped.push((name, vec![value])),
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(name, values)| (name, HeaderValue::from_values(values)))
            .collect())
    }

    /// The top-level header block as text, up to (not including) the blank
    /// separator line.
    pub fn get_headers_raw(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.get_headers_raw_bytes()?).into_owned())
    }

    /// Byte-exact top-level header block.
    pub fn get_headers_raw_bytes(&self) -> Result<&[u8]> {
        let message = self.message()?;
        Ok(message
            .source
            .data()
            .get(message.root.header_range.clone())
            .unwrap_or_default())
    }

    /// Parsed address list of every header called `name` (From, To, ...).
    ///
    /// Empty when the header is absent.
    pub fn get_addresses(&self, name: &str) -> Result<Vec<EmailAddress>> {
        Ok(self
            .message()?
            .root
            .headers
            .all(name)
            .flat_map(|f| header::parse_address_list(&self.charsets.guess(&f.value), &self.charsets))
            .collect())
    }

    /// `Date:` header as UTC.
    pub fn date(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .message()?
            .root
            .headers
            .first("date")
            .and_then(|f| header::parse_date(&self.charsets.guess(&f.value))))
    }

    /// Charset of the body: the first text body part's, then the first HTML
    /// body part's, then the top-level Content-Type's.
    pub fn charset(&self) -> Result<Option<String>> {
        let root = &self.message()?.root;
        let body_charset = [PartRole::TextBody, PartRole::HtmlBody]
            .into_iter()
            .find_map(|role| {
                root.walk()
                    .find(|p| p.role == role)
                    .and_then(|p| p.content_type.charset())
            });
        Ok(body_charset
            .or_else(|| root.content_type.charset())
            .map(|c| c.to_ascii_lowercase()))
    }

    // ── Bodies ──────────────────────────────────────────────────

    /// Text, HTML or HTML-with-embedded-resources body. Empty when the
    /// message has no such part.
    pub fn get_message_body(&self, kind: BodyType) -> Result<String> {
        let message = self.message()?;
        Ok(BodyAssembler::new(&message.root, message.source.data(), &self.charsets).assemble(kind))
    }

    // ── Attachments ─────────────────────────────────────────────

    /// Attachments in document order; inline resources only when
    /// `include_inline`.
    pub fn get_attachments(&self, include_inline: bool) -> Result<Vec<Attachment<'_>>> {
        let message = self.message()?;
        let data = message.source.data();
        Ok(message
            .root
            .walk()
            .filter_map(|p| match p.role {
                PartRole::Attachment => Some(Attachment::new(p, data, false)),
                PartRole::Inline if include_inline => Some(Attachment::new(p, data, true)),
                _ => None,
            })
            .collect())
    }

    /// Inline resources that belong to the same `multipart/related` as the
    /// body parts of `kind`.
    pub fn get_inline_parts(&self, kind: BodyType) -> Result<Vec<Attachment<'_>>> {
        let message = self.message()?;
        let root = &message.root;
        let role = kind.role();
        // Body parts outside any multipart/related have no inline resources.
        let anchors: Vec<PartId> = root
            .walk()
            .filter(|p| p.role == role)
            .filter_map(|p| nearest_related(root, &p.id))
            .collect();

        Ok(root
            .walk()
            .filter(|p| {
                p.role == PartRole::Inline
                    && nearest_related(root, &p.id).is_some_and(|id| anchors.contains(&id))
            })
            .map(|p| Attachment::new(p, message.source.data(), true))
            .collect())
    }

    /// Write attachments into `dir`; see
    /// [`save_attachments`](crate::export::attachment::save_attachments).
    pub fn save_attachments(
        &self,
        dir: impl AsRef<Path>,
        include_inline: bool,
        strategy: FilenameStrategy,
    ) -> Result<Vec<SavedAttachment>> {
        let attachments = self.get_attachments(include_inline)?;
        attachment::save_attachments(&attachments, dir.as_ref(), strategy)
    }

    // ── Raw access ──────────────────────────────────────────────

    /// The raw message bytes.
    pub fn get_data(&self) -> Result<&[u8]> {
        Ok(self.message()?.source.data())
    }

    /// A readable handle over the raw message bytes.
    pub fn get_stream(&self) -> Result<Cursor<&[u8]>> {
        Ok(Cursor::new(self.get_data()?))
    }

    /// `true` when the source was set with [`set_stream`](Self::set_stream).
    pub fn is_stream(&self) -> Result<bool> {
        Ok(self.message()?.source.is_stream())
    }

    pub fn source_path(&self) -> Result<Option<&Path>> {
        Ok(self.message()?.source.path())
    }

    /// The classified part tree.
    pub fn get_parts(&self) -> Result<&MimePart> {
        Ok(&self.message()?.root)
    }
}

fn classify(tokenized: &MimePart, data: &[u8], middleware: &MiddlewareStack) -> MimePart {
    let mut root = tokenized.clone();
    Classifier::new(data, middleware).classify(&mut root);
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::middleware::SkipContentTypes;

    const SIGNED: &str = "From: a@example.com\r\nSubject: signed\r\nContent-Type: multipart/signed; boundary=s\r\n\r\n--s\r\nContent-Type: text/plain\r\n\r\nhello\r\n--s\r\nContent-Type: application/pgp-signature; name=signature.asc\r\n\r\n-----BEGIN PGP SIGNATURE-----\r\n--s--\r\n";

    #[test]
    fn test_queries_without_source_fail() {
        let parser = MailParser::new();
        assert!(matches!(
            parser.get_header("subject"),
            Err(MimeError::Configuration(_))
        ));
        assert!(matches!(
            parser.get_message_body(BodyType::Text),
            Err(MimeError::Configuration(_))
        ));
    }

    #[test]
    fn test_second_source_is_rejected() {
        let mut parser = MailParser::new();
        parser.set_text("Subject: one\n\n").unwrap();
        let err = parser.set_text("Subject: two\n\n").err().unwrap();
        assert!(matches!(err, MimeError::Configuration(_)));
        assert_eq!(parser.get_header("subject").unwrap().unwrap().first(), "one");
    }

    #[test]
    fn test_failed_parse_leaves_parser_unset() {
        let mut parser = MailParser::new();
        assert!(matches!(
            parser.set_text(""),
            Err(MimeError::ParseFailure { .. })
        ));
        assert!(parser.get_data().is_err());
    }

    #[test]
    fn test_absent_vs_empty_header() {
        let mut parser = MailParser::new();
        parser.set_text("Subject:\r\nX-Empty: \r\n\r\nbody").unwrap();
        assert_eq!(parser.get_raw_header("X-Missing").unwrap(), None);
        assert_eq!(parser.get_header("X-Missing").unwrap(), None);
        assert_eq!(
            parser.get_raw_header("x-empty").unwrap(),
            Some(vec![String::new()])
        );
        assert_eq!(
            parser.get_header("subject").unwrap(),
            Some(HeaderValue::Single(String::new()))
        );
    }

    #[test]
    fn test_repeated_headers() {
        let mut parser = MailParser::new();
        parser
            .set_text("Received: one\r\nSubject: =?UTF-8?Q?Caf=C3=A9?=\r\nReceived: two\r\n\r\n")
            .unwrap();
        assert_eq!(
            parser.get_header("received").unwrap(),
            Some(HeaderValue::Multiple(vec!["one".into(), "two".into()]))
        );
        let headers = parser.get_headers().unwrap();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["received", "subject"]);
        assert_eq!(headers[1].1.first(), "Café");
        assert_eq!(
            parser.get_raw_header("subject").unwrap(),
            Some(vec!["=?UTF-8?Q?Caf=C3=A9?=".to_string()])
        );
    }

    #[test]
    fn test_middleware_added_after_source() {
        let mut parser = MailParser::new();
        parser.set_text(SIGNED).unwrap();
        assert_eq!(parser.get_attachments(false).unwrap().len(), 1);

        parser.add_middleware(SkipContentTypes::signatures());
        assert!(parser.get_attachments(false).unwrap().is_empty());
        assert_eq!(parser.get_message_body(BodyType::Text).unwrap(), "hello");
    }

    #[test]
    fn test_charset_and_date() {
        let mut parser = MailParser::new();
        parser
            .set_text(
                &b"Date: Mon, 15 Jan 2024 10:30:00 +0100\r\nContent-Type: text/plain; charset=\"ISO-8859-1\"\r\n\r\ncaf\xe9"[..],
            )
            .unwrap();
        assert_eq!(parser.charset().unwrap().as_deref(), Some("iso-8859-1"));
        assert_eq!(
            parser.date().unwrap().unwrap().to_rfc3339(),
            "2024-01-15T09:30:00+00:00"
        );
        assert_eq!(parser.get_message_body(BodyType::Text).unwrap(), "café");
    }

    #[test]
    fn test_stream_source() {
        let mut parser = MailParser::new();
        parser
            .set_stream(Cursor::new(b"Subject: streamed\n\nbody".to_vec()))
            .unwrap();
        assert!(parser.is_stream().unwrap());
        assert_eq!(parser.get_data().unwrap(), b"Subject: streamed\n\nbody");
        let mut raw = String::new();
        parser.get_stream().unwrap().read_to_string(&mut raw).unwrap();
        assert!(raw.starts_with("Subject: streamed"));
    }

    #[test]
    fn test_mbox_envelope_is_skipped() {
        let mut parser = MailParser::new();
        parser
            .set_text("From someone@example.com Mon Jan  1 00:00:00 2024\nSubject: boxed\n\nhi\n")
            .unwrap();
        assert_eq!(parser.get_headers_raw().unwrap(), "Subject: boxed\n");
    }
}
