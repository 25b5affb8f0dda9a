//! The MIME part tree.

use std::cell::OnceCell;
use std::fmt;
use std::ops::Range;

use super::header::HeaderMap;
use crate::parser::transfer;

/// Position of a part in the tree: `1` is the root, `1.2` its second child.
///
/// Ordering follows document order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct PartId(Vec<usize>);

impl PartId {
    /// Id of the root part.
    pub fn root() -> Self {
        Self(vec![1])
    }

    /// Id of the `index`-th (zero-based) child of this part.
    pub fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index + 1);
        Self(path)
    }

    /// Nesting depth (root = 0).
    pub fn depth(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// `true` if `self` lies strictly inside `other`'s subtree.
    pub fn is_descendant_of(&self, other: &PartId) -> bool {
        self.0.len() > other.0.len() && self.0.starts_with(&other.0)
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for n in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{n}")?;
            first = false;
        }
        Ok(())
    }
}

/// A parsed `Content-Type` value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContentType {
    /// Top-level type, lower-cased (`"text"`).
    pub mime_type: String,
    /// Subtype, lower-cased (`"plain"`).
    pub subtype: String,
    /// Parameters with lower-cased names and decoded values, in order.
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// Build a content type without parameters.
    pub fn new(mime_type: &str, subtype: &str) -> Self {
        Self {
            mime_type: mime_type.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    /// RFC 2045 default: `text/plain`.
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// `"type/subtype"`.
    pub fn essence(&self) -> String {
        format!("{}/{}", self.mime_type, self.subtype)
    }

    /// Case-insensitive match against `"type/subtype"`.
    pub fn is(&self, essence: &str) -> bool {
        match essence.split_once('/') {
            Some((t, s)) => {
                self.mime_type.eq_ignore_ascii_case(t) && self.subtype.eq_ignore_ascii_case(s)
            }
            None => false,
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.mime_type == "multipart"
    }

    /// Value of a parameter (name matched case-insensitively).
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset").filter(|c| !c.is_empty())
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mime_type, self.subtype)
    }
}

/// A parsed `Content-Disposition` value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContentDisposition {
    /// Disposition type, lower-cased (`"attachment"`, `"inline"`, ...).
    pub kind: String,
    /// Parameters with lower-cased names and decoded values.
    pub params: Vec<(String, String)>,
}

impl ContentDisposition {
    pub fn is_attachment(&self) -> bool {
        self.kind == "attachment"
    }

    pub fn is_inline(&self) -> bool {
        self.kind == "inline"
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// `Content-Transfer-Encoding` of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Parse a header value. Unknown tokens are treated as identity (`7bit`).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "binary" => Self::Binary,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            _ => Self::SevenBit,
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::Binary => "binary",
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
        })
    }
}

/// Role assigned to a part by the classification walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartRole {
    /// Not reached by the walk (e.g. below a suppressed container).
    Unclassified,
    /// A multipart container; content lives in its children.
    Container,
    /// Contributes to the plain-text body.
    TextBody,
    /// Contributes to the HTML body.
    HtmlBody,
    /// Resource rendered inside an HTML body.
    Inline,
    /// Downloadable attachment.
    Attachment,
    /// Suppressed by middleware or superseded by a later alternative.
    Ignored,
}

/// One node of the part tree.
///
/// A multipart node has an empty body and owns its children; any other node
/// has no children.
#[derive(Debug, Clone)]
pub struct MimePart {
    pub id: PartId,
    pub headers: HeaderMap,
    pub content_type: ContentType,
    pub disposition: Option<ContentDisposition>,
    /// Content-ID without the surrounding angle brackets.
    pub content_id: Option<String>,
    pub transfer_encoding: TransferEncoding,
    /// Whole part (headers + body) inside the message buffer.
    pub range: Range<usize>,
    /// Header block, excluding the blank separator line.
    pub header_range: Range<usize>,
    /// Everything after the header block. For multipart nodes this spans
    /// preamble, delimiters and children; their own decoded body is empty.
    pub body_range: Range<usize>,
    pub children: Vec<MimePart>,
    pub role: PartRole,
    decoded: OnceCell<Vec<u8>>,
}

impl MimePart {
    /// Create a leaf part with default headers over the given ranges.
    pub fn new(
        id: PartId,
        range: Range<usize>,
        header_range: Range<usize>,
        body_range: Range<usize>,
    ) -> Self {
        Self {
            id,
            headers: HeaderMap::new(),
            content_type: ContentType::text_plain(),
            disposition: None,
            content_id: None,
            transfer_encoding: TransferEncoding::SevenBit,
            range,
            header_range,
            body_range,
            children: Vec::new(),
            role: PartRole::Unclassified,
            decoded: OnceCell::new(),
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type.is_multipart()
    }

    /// Lower-cased `"type/subtype"`.
    pub fn mime_type(&self) -> String {
        self.content_type.essence()
    }

    /// Declared filename: `Content-Disposition; filename=` first, then
    /// `Content-Type; name=`.
    pub fn filename(&self) -> Option<&str> {
        self.disposition
            .as_ref()
            .and_then(|d| d.param("filename"))
            .or_else(|| self.content_type.param("name"))
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    /// The still-encoded body bytes.
    pub fn raw_body<'a>(&self, source: &'a [u8]) -> &'a [u8] {
        source.get(self.body_range.clone()).unwrap_or_default()
    }

    /// Body bytes with the transfer encoding removed.
    ///
    /// Decoded once, then cached on the part. Always empty for multipart
    /// nodes.
    pub fn decoded_body(&self, source: &[u8]) -> &[u8] {
        self.decoded.get_or_init(|| {
            if self.is_multipart() {
                Vec::new()
            } else {
                transfer::decode(self.raw_body(source), self.transfer_encoding)
            }
        })
    }

    /// Replace the decoded content of this part.
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.decoded = OnceCell::from(content);
    }

    /// Depth-first, document-order iterator over this part and its descendants.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Iterator returned by [`MimePart::walk`].
pub struct Walk<'a> {
    stack: Vec<&'a MimePart>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a MimePart;

    fn next(&mut self) -> Option<Self::Item> {
        let part = self.stack.pop()?;
        self.stack.extend(part.children.iter().rev());
        Some(part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_id_display_and_order() {
        let root = PartId::root();
        let a = root.child(0);
        let b = root.child(1);
        let a1 = a.child(0);
        assert_eq!(root.to_string(), "1");
        assert_eq!(a1.to_string(), "1.1.1");
        assert!(a < a1 && a1 < b);
        assert!(a1.is_descendant_of(&root));
        assert!(!a.is_descendant_of(&a));
        assert_eq!(a1.depth(), 2);
    }

    #[test]
    fn test_content_type_helpers() {
        let mut ct = ContentType::new("Multipart", "Mixed");
        ct.params.push(("boundary".into(), "xyz".into()));
        assert!(ct.is_multipart());
        assert!(ct.is("multipart/MIXED"));
        assert_eq!(ct.boundary(), Some("xyz"));
        assert_eq!(ct.to_string(), "multipart/mixed");
    }

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse(" BASE64 "), TransferEncoding::Base64);
        assert_eq!(TransferEncoding::parse("x-uuencode"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_set_content_overrides_decoding() {
        let source = b"SGVsbG8=";
        let mut part = MimePart::new(PartId::root(), 0..8, 0..0, 0..8);
        part.transfer_encoding = TransferEncoding::Base64;
        assert_eq!(part.decoded_body(source), b"Hello");
        part.set_content(b"replaced".to_vec());
        assert_eq!(part.decoded_body(source), b"replaced");
    }

    #[test]
    fn test_walk_is_document_order() {
        let mut root = MimePart::new(PartId::root(), 0..0, 0..0, 0..0);
        let mut first = MimePart::new(root.id.child(0), 0..0, 0..0, 0..0);
        first.children.push(MimePart::new(first.id.child(0), 0..0, 0..0, 0..0));
        root.children.push(first);
        root.children.push(MimePart::new(root.id.child(1), 0..0, 0..0, 0..0));
        let ids: Vec<String> = root.walk().map(|p| p.id.to_string()).collect();
        assert_eq!(ids, vec!["1", "1.1", "1.1.1", "1.2"]);
    }
}
