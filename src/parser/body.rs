//! Body assembly from classified parts.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use super::charset::CharsetNormalizer;
use super::transfer;
use crate::model::part::{MimePart, PartRole};

/// Which rendering of the message body to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyType {
    Text,
    Html,
    /// HTML with `cid:` references replaced by `data:` URIs.
    HtmlEmbedded,
}

impl BodyType {
    /// Role of the parts that make up this body.
    pub fn role(self) -> PartRole {
        match self {
            Self::Text => PartRole::TextBody,
            Self::Html | Self::HtmlEmbedded => PartRole::HtmlBody,
        }
    }
}

impl FromStr for BodyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            "htmlembedded" | "html-embedded" => Ok(Self::HtmlEmbedded),
            other => Err(format!("unknown body type: {other}")),
        }
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Html => "html",
            Self::HtmlEmbedded => "htmlEmbedded",
        })
    }
}

/// Renders body strings from a classified part tree.
pub struct BodyAssembler<'a> {
    root: &'a MimePart,
    source: &'a [u8],
    charsets: &'a CharsetNormalizer,
}

impl<'a> BodyAssembler<'a> {
    pub fn new(root: &'a MimePart, source: &'a [u8], charsets: &'a CharsetNormalizer) -> Self {
        Self {
            root,
            source,
            charsets,
        }
    }

    /// Concatenate the body candidates for `kind` in document order.
    ///
    /// Empty when the message has no such part.
    pub fn assemble(&self, kind: BodyType) -> String {
        let role = kind.role();
        let body: String = self
            .root
            .walk()
            .filter(|p| p.role == role)
            .map(|p| self.text_of(p))
            .collect();

        match kind {
            BodyType::HtmlEmbedded => {
                embed_cids(&body, |cid| self.resolve_cid(cid).map(|p| self.data_uri(p)))
            }
            BodyType::Text | BodyType::Html => body,
        }
    }

    /// Decoded content of a part, converted with its declared charset.
    pub fn text_of(&self, part: &MimePart) -> String {
        self.charsets
            .normalize(part.decoded_body(self.source), part.content_type.charset())
    }

    /// Inline resources first, then any classified leaf with that Content-ID.
    fn resolve_cid(&self, cid: &str) -> Option<&'a MimePart> {
        let root = self.root;
        let leaves = move || {
            root.walk()
                .filter(move |p| !p.is_multipart() && p.content_id.as_deref() == Some(cid))
        };
        leaves()
            .find(|p| p.role == PartRole::Inline)
            .or_else(|| {
                leaves().find(|p| !matches!(p.role, PartRole::Unclassified | PartRole::Ignored))
            })
    }

    fn data_uri(&self, part: &MimePart) -> String {
        format!(
            "data:{};base64,{}",
            part.mime_type(),
            transfer::encode_base64(part.decoded_body(self.source))
        )
    }
}

/// Replace every resolvable `cid:ID` reference in `html` with the string
/// returned by `resolve`.
///
/// The id ends at a quote, `)`, `>` or whitespace. Unresolved references are
/// left as they are.
pub fn embed_cids<F>(html: &str, resolve: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len());
    let mut copied = 0;
    let mut i = 0;

    while i + 4 <= bytes.len() {
        if !bytes[i..i + 4].eq_ignore_ascii_case(b"cid:") {
            i += 1;
            continue;
        }
        let start = i + 4;
        let end = bytes[start..]
            .iter()
            .position(|&b| matches!(b, b'"' | b'\'' | b')' | b'>') || b.is_ascii_whitespace())
            .map_or(bytes.len(), |p| start + p);
        let cid = &html[start..end];

        match (!cid.is_empty()).then(|| resolve(cid)).flatten() {
            Some(replacement) => {
                out.push_str(&html[copied..i]);
                out.push_str(&replacement);
                copied = end;
            }
            None => trace!(cid, "Unresolved cid reference"),
        }
        i = end.max(start);
    }

    out.push_str(&html[copied..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::classify::Classifier;
    use crate::parser::middleware::MiddlewareStack;
    use crate::parser::tokenizer::Tokenizer;

    const RELATED: &[u8] = b"Content-Type: multipart/alternative; boundary=a\r\n\r\n--a\r\nContent-Type: text/plain; charset=iso-8859-1\r\nContent-Transfer-Encoding: quoted-printable\r\n\r\nCaf=E9\r\n--a\r\nContent-Type: multipart/related; boundary=r\r\n\r\n--r\r\nContent-Type: text/html; charset=utf-8\r\n\r\n<img src=\"cid:logo\"><img src='cid:missing'>\r\n--r\r\nContent-Type: image/png\r\nContent-ID: <logo>\r\nContent-Transfer-Encoding: base64\r\n\r\niVBORw==\r\n--r--\r\n--a--\r\n";

    fn render(data: &[u8], kind: BodyType) -> String {
        let charsets = CharsetNormalizer::default();
        let mut root = Tokenizer::new(data, &charsets).tokenize(0).unwrap();
        Classifier::new(data, &MiddlewareStack::new()).classify(&mut root);
        BodyAssembler::new(&root, data, &charsets).assemble(kind)
    }

    #[test]
    fn test_text_body_is_decoded_and_converted() {
        assert_eq!(render(RELATED, BodyType::Text), "Café");
    }

    #[test]
    fn test_html_keeps_cid_references() {
        assert_eq!(
            render(RELATED, BodyType::Html),
            "<img src=\"cid:logo\"><img src='cid:missing'>"
        );
    }

    #[test]
    fn test_html_embedded_rewrites_resolvable_cids() {
        assert_eq!(
            render(RELATED, BodyType::HtmlEmbedded),
            "<img src=\"data:image/png;base64,iVBORw==\"><img src='cid:missing'>"
        );
    }

    #[test]
    fn test_missing_html_is_empty() {
        assert_eq!(render(b"Subject: plain\n\nhello", BodyType::Html), "");
    }

    #[test]
    fn test_body_type_from_str() {
        assert_eq!("htmlEmbedded".parse::<BodyType>(), Ok(BodyType::HtmlEmbedded));
        assert_eq!("TEXT".parse::<BodyType>(), Ok(BodyType::Text));
        assert!("pdf".parse::<BodyType>().is_err());
    }
}
