//! Splits a raw message into the MIME part tree.
//!
//! Works on byte offsets into the message buffer; nothing is copied. The
//! tokenizer is tolerant of:
//!
//! - Mixed `\n` and `\r\n` line endings
//! - Folded headers (unfolded into one value)
//! - A missing blank line between headers and body
//! - Missing or malformed `Content-Type` (treated as `text/plain`)
//! - Preamble and epilogue text around multipart bodies (discarded)
//! - An unterminated final boundary (remaining bytes form the last part)
//!
//! Only the top-level header block can make a parse fail.

use std::ops::Range;

use tracing::{debug, warn};

use super::charset::CharsetNormalizer;
use super::header;
use crate::error::{MimeError, Result};
use crate::model::header::{HeaderField, HeaderMap};
use crate::model::part::{ContentType, MimePart, PartId, TransferEncoding};

/// Default maximum multipart nesting depth.
pub const MAX_DEPTH: usize = 32;

/// A parsed header block.
#[derive(Debug)]
pub struct HeaderBlock {
    pub headers: HeaderMap,
    /// End of the header lines (start of the blank separator line).
    pub header_end: usize,
    /// First byte of the body.
    pub body_start: usize,
}

/// Builds a part tree from a message buffer.
pub struct Tokenizer<'a> {
    data: &'a [u8],
    charsets: &'a CharsetNormalizer,
    max_depth: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(data: &'a [u8], charsets: &'a CharsetNormalizer) -> Self {
        Self {
            data,
            charsets,
            max_depth: MAX_DEPTH,
        }
    }

    /// Override the nesting limit.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Tokenize the message that starts at byte `start`.
    pub fn tokenize(&self, start: usize) -> Result<MimePart> {
        if start >= self.data.len() {
            return Err(MimeError::parse(start, "empty message"));
        }
        let root = self.build_part(
            PartId::root(),
            start..self.data.len(),
            0,
            ContentType::text_plain(),
            true,
        )?;
        debug!(parts = root.walk().count(), "Tokenized message");
        Ok(root)
    }

    fn build_part(
        &self,
        id: PartId,
        range: Range<usize>,
        depth: usize,
        default_type: ContentType,
        strict: bool,
    ) -> Result<MimePart> {
        let block = parse_header_block(self.data, range.clone(), strict)?;
        let mut part = MimePart::new(
            id,
            range.clone(),
            range.start..block.header_end,
            block.body_start..range.end,
        );
        part.headers = block.headers;
        self.apply_headers(&mut part, default_type);

        if !part.is_multipart() {
            return Ok(part);
        }

        if depth >= self.max_depth {
            warn!(part = %part.id, depth, "Multipart nesting too deep, treating as leaf");
            part.content_type = ContentType::text_plain();
            return Ok(part);
        }

        let Some(boundary) = part.content_type.boundary().map(str::to_string) else {
            warn!(part = %part.id, "Multipart without boundary, treating as text/plain");
            part.content_type = ContentType::text_plain();
            return Ok(part);
        };

        let Some(child_ranges) = split_multipart(self.data, part.body_range.clone(), &boundary)
        else {
            warn!(
                part = %part.id,
                boundary = %boundary,
                "Boundary never found, treating as text/plain"
            );
            part.content_type = ContentType::text_plain();
            return Ok(part);
        };

        let child_default = if part.content_type.subtype == "digest" {
            ContentType::new("message", "rfc822")
        } else {
            ContentType::text_plain()
        };

        for (i, child_range) in child_ranges.into_iter().enumerate() {
            let child = self.build_part(
                part.id.child(i),
                child_range,
                depth + 1,
                child_default.clone(),
                false,
            )?;
            part.children.push(child);
        }
        Ok(part)
    }

    fn apply_headers(&self, part: &mut MimePart, default_type: ContentType) {
        let text = |name: &str| {
            part.headers
                .first(name)
                .map(|f| self.charsets.guess(&f.value))
        };

        part.content_type = text("content-type")
            .and_then(|v| header::parse_content_type(&v, self.charsets))
            .unwrap_or(default_type);
        part.disposition =
            text("content-disposition").and_then(|v| header::parse_disposition(&v, self.charsets));
        part.content_id = text("content-id").and_then(|v| header::parse_content_id(&v));
        part.transfer_encoding = text("content-transfer-encoding")
            .map(|v| TransferEncoding::parse(&v))
            .unwrap_or(TransferEncoding::SevenBit);
    }
}

/// Parse the header block at the start of `range`.
///
/// With `strict`, a first line that is neither a header nor blank is a
/// [`MimeError::ParseFailure`]. Otherwise such a line simply starts the body.
pub fn parse_header_block(data: &[u8], range: Range<usize>, strict: bool) -> Result<HeaderBlock> {
    let end = range.end;
    let mut pos = range.start;
    let mut headers = HeaderMap::new();
    let mut current: Option<(String, Vec<u8>, usize)> = None;

    let (header_end, body_start) = loop {
        if pos >= end {
            break (end, end);
        }
        let (line_end, next) = line_bounds(data, pos, end);
        let line = &data[pos..line_end];

        if line.is_empty() {
            break (pos, next);
        }

        if line[0] == b' ' || line[0] == b'\t' {
            match current.as_mut() {
                // Unfolding drops only the line break; the leading WSP stays.
                Some((_, value, _)) => {
                    let folded = trim_end_wsp(line);
                    if value.is_empty() {
                        value.extend_from_slice(trim_wsp(folded));
                    } else {
                        value.extend_from_slice(folded);
                    }
                }
                None if strict && headers.is_empty() => {
                    return Err(MimeError::parse(pos, "message starts with a continuation line"));
                }
                None => {
                    debug!(offset = pos, "Indented line before any header, starting body");
                    break (pos, pos);
                }
            }
        } else if let Some((name, value)) = split_field(line) {
            if let Some((name, value, start)) = current.take() {
                headers.push(HeaderField {
                    name,
                    value,
                    raw: start..pos,
                });
            }
            current = Some((name, value, pos));
        } else if strict && headers.is_empty() && current.is_none() {
            return Err(MimeError::parse(pos, "input does not start with a header field"));
        } else {
            debug!(offset = pos, "Header block ended without blank line");
            break (pos, pos);
        }

        pos = next;
    };

    if let Some((name, value, start)) = current.take() {
        headers.push(HeaderField {
            name,
            value,
            raw: start..header_end,
        });
    }

    Ok(HeaderBlock {
        headers,
        header_end,
        body_start,
    })
}

/// Split a `Name: value` line. Names are printable ASCII without spaces;
/// whitespace before the colon (obsolete syntax) is tolerated.
fn split_field(line: &[u8]) -> Option<(String, Vec<u8>)> {
    let colon = line.iter().position(|&b| b == b':')?;
    let name = trim_wsp(&line[..colon]);
    if name.is_empty() || !name.iter().all(|&b| (33..=126).contains(&b)) {
        return None;
    }
    let value = trim_wsp(&line[colon + 1..]);
    Some((String::from_utf8_lossy(name).into_owned(), value.to_vec()))
}

/// Locate the child part ranges of a multipart body.
///
/// The line break before each delimiter belongs to the delimiter. Returns
/// `None` when the boundary never occurs.
pub fn split_multipart(
    data: &[u8],
    body: Range<usize>,
    boundary: &str,
) -> Option<Vec<Range<usize>>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut found = false;
    let mut closed = false;
    let mut pos = body.start;

    while pos < body.end {
        let (line_end, next) = line_bounds(data, pos, body.end);
        if let Some(is_close) = match_delimiter(&data[pos..line_end], delimiter) {
            found = true;
            if let Some(start) = current_start.take() {
                parts.push(start..strip_newline_before(data, start, pos));
            }
            if is_close {
                closed = true;
                break;
            }
            current_start = Some(next);
        }
        pos = next;
    }

    if !found {
        return None;
    }
    if let Some(start) = current_start {
        debug!(offset = start, "Unterminated multipart, last part runs to end");
        if start < body.end || parts.is_empty() {
            parts.push(start..body.end);
        }
    }
    if !closed {
        debug!(boundary, "Missing closing delimiter");
    }
    Some(parts)
}

/// `Some(true)` for a close delimiter, `Some(false)` for a part delimiter.
fn match_delimiter(line: &[u8], delimiter: &[u8]) -> Option<bool> {
    let rest = line.strip_prefix(delimiter)?;
    let (is_close, tail) = match rest.strip_prefix(b"--") {
        Some(tail) => (true, tail),
        None => (false, rest),
    };
    if tail.iter().all(|&b| b == b' ' || b == b'\t') {
        Some(is_close)
    } else {
        None
    }
}

fn strip_newline_before(data: &[u8], start: usize, pos: usize) -> usize {
    let mut end = pos;
    if end > start && data[end - 1] == b'\n' {
        end -= 1;
        if end > start && data[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

/// Returns `(line_end, next_line_start)` for the line at `pos`; `line_end`
/// excludes the line terminator.
fn line_bounds(data: &[u8], pos: usize, end: usize) -> (usize, usize) {
    match data[pos..end].iter().position(|&b| b == b'\n') {
        Some(i) => {
            let lf = pos + i;
            let line_end = if lf > pos && data[lf - 1] == b'\r' {
                lf - 1
            } else {
                lf
            };
            (line_end, lf + 1)
        }
        None => {
            let line_end = if end > pos && data[end - 1] == b'\r' {
                end - 1
            } else {
                end
            };
            (line_end, end)
        }
    }
}

fn trim_end_wsp(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

fn trim_wsp(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::header::HeaderField;

    fn tokenize(data: &[u8]) -> Result<MimePart> {
        let charsets = CharsetNormalizer::default();
        Tokenizer::new(data, &charsets).tokenize(0)
    }

    fn body<'a>(data: &'a [u8], part: &MimePart) -> &'a [u8] {
        &data[part.body_range.clone()]
    }

    #[test]
    fn test_simple_message() {
        let data = b"From: a@b.com\r\nSubject: Hi\r\n\r\nBody here\r\n";
        let root = tokenize(data).unwrap();
        assert_eq!(root.headers.len(), 2);
        assert!(root.content_type.is("text/plain"));
        assert_eq!(body(data, &root), b"Body here\r\n");
        assert_eq!(&data[root.header_range.clone()], b"From: a@b.com\r\nSubject: Hi\r\n");
    }

    #[test]
    fn test_folded_header_is_unfolded() {
        let data = b"Subject: This is a long\n\tsubject line\nFrom: user@example.com\n\nx";
        let root = tokenize(data).unwrap();
        let subject = root.headers.first("subject").unwrap();
        assert_eq!(subject.raw_value(), "This is a long\tsubject line");
        assert_eq!(&data[subject.raw.clone()], b"Subject: This is a long\n\tsubject line\n");
    }

    #[test]
    fn test_unfolding_keeps_whitespace() {
        let data = b"X-A: foo\r\n\tbar\r\nX-B:\r\n   baz  \r\n\r\n";
        let root = tokenize(data).unwrap();
        assert_eq!(root.headers.first("x-a").unwrap().raw_value(), "foo\tbar");
        assert_eq!(root.headers.first("x-b").unwrap().raw_value(), "baz");
    }

    #[test]
    fn test_indented_first_body_line_is_kept() {
        let data: &[u8] = b"Content-Type: multipart/mixed; boundary=b\n\n--b\n  indented first line\nsecond line\n--b--\n";
        let root = tokenize(data).unwrap();
        let child = &root.children[0];
        assert!(child.headers.is_empty());
        assert_eq!(body(data, child), b"  indented first line\nsecond line");
    }

    #[test]
    fn test_empty_and_garbage_input_fail() {
        assert!(matches!(tokenize(b""), Err(MimeError::ParseFailure { .. })));
        assert!(matches!(
            tokenize(b"\x00\x01\x02 not a header\n\nbody"),
            Err(MimeError::ParseFailure { .. })
        ));
    }

    #[test]
    fn test_missing_blank_line() {
        let data = b"Subject: x\nthis is body text\n";
        let root = tokenize(data).unwrap();
        assert_eq!(root.headers.len(), 1);
        assert_eq!(body(data, &root), b"this is body text\n");
    }

    #[test]
    fn test_headers_only_without_trailing_newline() {
        let root = tokenize(b"Subject: only").unwrap();
        assert_eq!(root.headers.get("subject").as_deref(), Some("only"));
        assert!(root.body_range.is_empty());
    }

    #[test]
    fn test_malformed_content_type_defaults_to_text_plain() {
        let root = tokenize(b"Content-Type: garbage\n\nhi").unwrap();
        assert!(root.content_type.is("text/plain"));
    }

    #[test]
    fn test_multipart_split_and_ranges() {
        let data: &[u8] = b"Content-Type: multipart/mixed; boundary=XX\r\n\r\npreamble\r\n--XX\r\nContent-Type: text/plain\r\n\r\nfirst\r\n--XX\r\n\r\nsecond\r\n--XX--\r\nepilogue\r\n";
        let root = tokenize(data).unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(body(data, &root.children[0]), b"first");
        assert_eq!(body(data, &root.children[1]), b"second");
        assert_eq!(root.children[1].id.to_string(), "1.2");
        assert!(root.children[1].headers.is_empty());

        // Children plus delimiters tile the parent body
        let first = &root.children[0].range;
        let second = &root.children[1].range;
        assert_eq!(&data[root.body_range.start..first.start], b"preamble\r\n--XX\r\n");
        assert_eq!(&data[first.end..second.start], b"\r\n--XX\r\n");
        assert_eq!(&data[second.end..root.body_range.end], b"\r\n--XX--\r\nepilogue\r\n");
    }

    #[test]
    fn test_boundary_prefix_of_other_boundary() {
        let data: &[u8] = b"Content-Type: multipart/mixed; boundary=\"b\"\n\n--b\nContent-Type: multipart/alternative; boundary=\"b2\"\n\n--b2\n\ninner one\n--b2\n\ninner two\n--b2--\n--b\n\nouter two\n--b--\n";
        let root = tokenize(data).unwrap();
        assert_eq!(root.children.len(), 2);
        let alt = &root.children[0];
        assert!(alt.content_type.is("multipart/alternative"));
        assert_eq!(alt.children.len(), 2);
        assert_eq!(body(data, &alt.children[1]), b"inner two");
        assert_eq!(body(data, &root.children[1]), b"outer two");
    }

    #[test]
    fn test_unterminated_final_part() {
        let data: &[u8] = b"Content-Type: multipart/mixed; boundary=Q\n\n--Q\n\none\n--Q\n\ntwo and more";
        let root = tokenize(data).unwrap();
        assert_eq!(root.children.len(), 2);
        assert_eq!(body(data, &root.children[1]), b"two and more");
    }

    #[test]
    fn test_missing_boundary_degrades_to_text() {
        let root = tokenize(b"Content-Type: multipart/mixed\n\nsome text").unwrap();
        assert!(root.content_type.is("text/plain"));
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_boundary_never_found_degrades_to_text() {
        let root = tokenize(b"Content-Type: multipart/mixed; boundary=zz\n\nno delimiters").unwrap();
        assert!(root.content_type.is("text/plain"));
    }

    #[test]
    fn test_digest_children_default_to_rfc822() {
        let data: &[u8] = b"Content-Type: multipart/digest; boundary=d\n\n--d\n\nSubject: inner\n\nx\n--d--\n";
        let root = tokenize(data).unwrap();
        assert!(root.children[0].content_type.is("message/rfc822"));
    }

    #[test]
    fn test_depth_limit() {
        let data: &[u8] = b"Content-Type: multipart/mixed; boundary=a\n\n--a\nContent-Type: multipart/mixed; boundary=b\n\n--b\n\ndeep\n--b--\n--a--\n";
        let charsets = CharsetNormalizer::default();
        let root = Tokenizer::new(data, &charsets)
            .with_max_depth(1)
            .tokenize(0)
            .unwrap();
        assert_eq!(root.children.len(), 1);
        assert!(root.children[0].content_type.is("text/plain"));
        assert!(root.children[0].children.is_empty());
    }

    #[test]
    fn test_part_headers_are_parsed() {
        let data: &[u8] = b"Content-Type: multipart/related; boundary=r\n\n--r\nContent-Type: image/png; name=logo.png\nContent-ID: <logo>\nContent-Transfer-Encoding: base64\nContent-Disposition: inline\n\niVBO\n--r--\n";
        let root = tokenize(data).unwrap();
        let img = &root.children[0];
        assert!(img.content_type.is("image/png"));
        assert_eq!(img.content_id.as_deref(), Some("logo"));
        assert_eq!(img.transfer_encoding, TransferEncoding::Base64);
        assert!(img.disposition.as_ref().unwrap().is_inline());
        assert_eq!(img.filename(), Some("logo.png"));
    }

    #[test]
    fn test_header_field_ranges_reconstruct_block() {
        let data = b"A: 1\r\nB: 2\r\n  folded\r\n\r\nbody";
        let block = parse_header_block(data, 0..data.len(), true).unwrap();
        let joined: Vec<u8> = block
            .headers
            .iter()
            .flat_map(|f: &HeaderField| data[f.raw.clone()].to_vec())
            .collect();
        assert_eq!(joined, &data[..block.header_end]);
        assert_eq!(&data[block.body_start..], b"body");
    }
}
