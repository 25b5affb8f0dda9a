//! Header value decoding: RFC 2047 encoded-words, structured parameters
//! (RFC 2045 / RFC 2231), address lists and dates.
//!
//! Everything here recovers locally: malformed input is passed through or
//! dropped, never turned into an error.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use super::charset::CharsetNormalizer;
use super::transfer;
use crate::model::address::EmailAddress;
use crate::model::part::{ContentDisposition, ContentType};

/// Decode a raw header value to display text.
///
/// 8-bit bytes are read as UTF-8 when valid, otherwise in the fallback
/// charset; encoded-words are then resolved.
pub fn decode_value(raw: &[u8], charsets: &CharsetNormalizer) -> String {
    let text = charsets.guess(raw);
    decode_encoded_words(text.trim(), charsets)
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Adjacent encoded-words sharing a charset are joined before charset
/// conversion, so multi-byte characters split across words survive.
/// Whitespace between encoded-words is dropped (RFC 2047 §6.2). Malformed
/// words are kept literally.
pub fn decode_encoded_words(input: &str, charsets: &CharsetNormalizer) -> String {
    let segments = split_encoded_words(input);
    let mut result = String::with_capacity(input.len());
    let mut run: Option<(&str, Vec<u8>)> = None;
    let mut iter = segments.into_iter().peekable();

    while let Some(segment) = iter.next() {
        match segment {
            Segment::Encoded { charset, bytes } => match run.as_mut() {
                Some((current, buf)) if current.eq_ignore_ascii_case(charset) => {
                    buf.extend_from_slice(&bytes);
                }
                _ => {
                    flush_run(&mut run, &mut result, charsets);
                    run = Some((charset, bytes));
                }
            },
            Segment::Text(text) => {
                let between_words = run.is_some()
                    && text.chars().all(char::is_whitespace)
                    && matches!(iter.peek(), Some(Segment::Encoded { .. }));
                if between_words {
                    continue;
                }
                flush_run(&mut run, &mut result, charsets);
                result.push_str(text);
            }
        }
    }
    flush_run(&mut run, &mut result, charsets);
    result
}

fn flush_run(run: &mut Option<(&str, Vec<u8>)>, out: &mut String, charsets: &CharsetNormalizer) {
    if let Some((charset, bytes)) = run.take() {
        out.push_str(&charsets.normalize(&bytes, Some(charset)));
    }
}

enum Segment<'a> {
    Text(&'a str),
    Encoded { charset: &'a str, bytes: Vec<u8> },
}

fn split_encoded_words(input: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut remaining = input;
    let mut literal_start = 0;
    let mut offset = 0;

    while let Some(start) = remaining.find("=?") {
        let abs = offset + start;
        match try_decode_one_word(&remaining[start + 2..]) {
            Some((charset, bytes, consumed)) => {
                if abs > literal_start {
                    segments.push(Segment::Text(&input[literal_start..abs]));
                }
                segments.push(Segment::Encoded { charset, bytes });
                let next = abs + 2 + consumed;
                literal_start = next;
                offset = next;
                remaining = &input[next..];
            }
            None => {
                debug!(word = &remaining[start..], "Malformed encoded-word kept literally");
                offset = abs + 2;
                remaining = &input[offset..];
            }
        }
    }
    if literal_start < input.len() {
        segments.push(Segment::Text(&input[literal_start..]));
    }
    segments
}

/// Parse `charset?encoding?text?=` (the part after `=?`).
///
/// Returns the charset, the decoded bytes and the number of bytes consumed.
fn try_decode_one_word(s: &str) -> Option<(&str, Vec<u8>, usize)> {
    let first_q = s.find('?')?;
    let charset = &s[..first_q];
    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    // Encoded text cannot contain '?', so the next one must close the word
    let text_start = first_q + 1 + second_q + 1;
    let rest2 = &s[text_start..];
    let end = rest2.find('?')?;
    if !rest2[end..].starts_with("?=") {
        return None;
    }
    let encoded_text = &rest2[..end];
    if encoded_text.contains(['\r', '\n']) {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => transfer::decode_base64(encoded_text.as_bytes()),
        "Q" | "q" => transfer::decode_q(encoded_text),
        _ => return None,
    };

    Some((charset, bytes, text_start + end + 2))
}

/// Split `value; a=b; c="d"` into the leading value and its parameters.
///
/// Parameter names are lower-cased. RFC 2231 continuations and extended
/// values are assembled and decoded; quoted values containing encoded-words
/// (a common non-standard practice) are decoded too.
pub fn parse_parameterized(
    raw: &str,
    charsets: &CharsetNormalizer,
) -> (String, Vec<(String, String)>) {
    let mut pieces = split_unquoted(raw, ';').into_iter();
    let value = pieces.next().unwrap_or_default().trim().to_string();

    let mut simple: Vec<(String, String)> = Vec::new();
    let mut extended: Vec<(String, Option<usize>, bool, String)> = Vec::new();

    for piece in pieces {
        let Some((name, val)) = piece.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let val = unquote_param(val.trim());

        match name.split_once('*') {
            None => simple.push((name, val)),
            Some((base, suffix)) => {
                // name*  |  name*N  |  name*N*
                let encoded = suffix.ends_with('*') || suffix.is_empty();
                let index = suffix.trim_end_matches('*').parse::<usize>().ok();
                extended.push((base.to_string(), index, encoded, val));
            }
        }
    }

    let mut params: Vec<(String, String)> = Vec::new();
    for (name, val) in simple {
        if params.iter().any(|(k, _)| *k == name) {
            continue;
        }
        let decoded = if val.contains("=?") {
            decode_encoded_words(&val, charsets)
        } else {
            val
        };
        params.push((name, decoded));
    }

    let mut bases: Vec<String> = Vec::new();
    for (base, ..) in &extended {
        if !bases.contains(base) {
            bases.push(base.clone());
        }
    }
    for base in bases {
        let mut segments: Vec<&(String, Option<usize>, bool, String)> =
            extended.iter().filter(|(b, ..)| *b == base).collect();
        segments.sort_by_key(|(_, index, ..)| index.unwrap_or(0));

        let mut charset: Option<String> = None;
        let mut bytes = Vec::new();
        for (i, (_, _, encoded, val)) in segments.iter().enumerate() {
            if *encoded {
                let mut data = val.as_str();
                if i == 0 {
                    // charset'language'value
                    let mut parts = data.splitn(3, '\'');
                    let (cs, lang, rest) = (parts.next(), parts.next(), parts.next());
                    if let (Some(cs), Some(_), Some(rest)) = (cs, lang, rest) {
                        if !cs.is_empty() {
                            charset = Some(cs.to_string());
                        }
                        data = rest;
                    }
                }
                bytes.extend(percent_decode(data));
            } else {
                bytes.extend_from_slice(val.as_bytes());
            }
        }

        let text = charsets.normalize(&bytes, charset.as_deref());
        match params.iter_mut().find(|(k, _)| *k == base) {
            Some(existing) => existing.1 = text,
            None => params.push((base, text)),
        }
    }

    (value, params)
}

/// Parse a `Content-Type` value. Returns `None` when the media type is not
/// a well-formed `type/subtype`.
pub fn parse_content_type(raw: &str, charsets: &CharsetNormalizer) -> Option<ContentType> {
    let (value, params) = parse_parameterized(raw, charsets);
    let (mime_type, subtype) = value.split_once('/')?;
    let mime_type = mime_type.trim();
    let subtype = subtype.trim();
    if !is_token(mime_type) || !is_token(subtype) {
        warn!(value = %value, "Malformed Content-Type");
        return None;
    }
    let mut ct = ContentType::new(mime_type, subtype);
    ct.params = params;
    Some(ct)
}

/// Parse a `Content-Disposition` value.
pub fn parse_disposition(raw: &str, charsets: &CharsetNormalizer) -> Option<ContentDisposition> {
    let (value, params) = parse_parameterized(raw, charsets);
    let kind = value.trim().to_ascii_lowercase();
    if kind.is_empty() {
        return None;
    }
    Some(ContentDisposition { kind, params })
}

/// Content-ID without angle brackets.
pub fn parse_content_id(raw: &str) -> Option<String> {
    let id = extract_angle_bracket(raw);
    let id = id.trim_start_matches('<').trim_end_matches('>').trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Parse an address-list header value.
///
/// The list is split on the raw value (so encoded commas cannot break
/// tokenization), then display names are decoded.
pub fn parse_address_list(raw: &str, charsets: &CharsetNormalizer) -> Vec<EmailAddress> {
    EmailAddress::parse_list(raw)
        .into_iter()
        .map(|addr| decode_address(addr, charsets))
        .collect()
}

fn decode_address(mut addr: EmailAddress, charsets: &CharsetNormalizer) -> EmailAddress {
    addr.display_name = decode_encoded_words(&addr.display_name, charsets);
    addr.members = addr
        .members
        .into_iter()
        .map(|m| decode_address(m, charsets))
        .collect();
    addr
}

/// Split on `sep` outside double-quoted strings.
fn split_unquoted(s: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                pieces.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    pieces.push(&s[start..]);
    pieces
}

fn unquote_param(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"') else {
        return s.to_string();
    };
    let inner = inner.strip_suffix('"').unwrap_or(inner);
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16));
            let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16));
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"' | b'/'
                        | b'[' | b']' | b'?' | b'='
                )
        })
}

/// Extract content between `<` and `>` (for Message-ID, Content-ID).
pub fn extract_angle_bracket(s: &str) -> String {
    let trimmed = s.trim();
    if let Some(start) = trimmed.find('<') {
        if let Some(end) = trimmed[start..].find('>') {
            return trimmed[start..start + end + 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Comments such as "(UTC)" confuse every format below
    let without_comment = match trimmed.find('(') {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };
    if let Ok(dt) = DateTime::parse_from_rfc2822(without_comment) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(without_comment);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(&no_dow, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&no_dow, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    let replaced = replace_named_tz(&no_dow);
    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(&replaced, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    let days = [
        "Mon,", "Tue,", "Wed,", "Thu,", "Fri,", "Sat,", "Sun,", "Mon ", "Tue ", "Wed ", "Thu ",
        "Fri ", "Sat ", "Sun ",
    ];
    for day in &days {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    let tzs = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("CET", "+0100"),
        ("CEST", "+0200"),
    ];
    let mut result = s.to_string();
    for (name, offset) in &tzs {
        if result.ends_with(name) {
            let pos = result.len() - name.len();
            result.replace_range(pos.., offset);
            return result;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(input: &str) -> String {
        decode_encoded_words(input, &CharsetNormalizer::default())
    }

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(dec("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(dec("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        assert_eq!(dec("=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        assert_eq!(dec("Re: =?UTF-8?B?SG9sYQ==?= there"), "Re: Hola there");
    }

    #[test]
    fn test_split_multibyte_across_words() {
        // "é" is C3 A9, split over two words
        assert_eq!(dec("=?UTF-8?Q?caf=C3?= =?UTF-8?Q?=A9?="), "café");
    }

    #[test]
    fn test_different_charsets_not_merged() {
        assert_eq!(dec("=?ISO-8859-1?Q?=E9?= =?UTF-8?Q?=C3=A9?="), "éé");
    }

    #[test]
    fn test_malformed_word_passes_through() {
        assert_eq!(dec("=?UTF-8?X?abc?= ok"), "=?UTF-8?X?abc?= ok");
        assert_eq!(dec("price =?"), "price =?");
        assert_eq!(dec("=?utf-8?Q?never closed"), "=?utf-8?Q?never closed");
    }

    #[test]
    fn test_decode_value_eight_bit_fallback() {
        let n = CharsetNormalizer::default();
        assert_eq!(decode_value(b" R\xe9sum\xe9 ", &n), "Résumé");
    }

    #[test]
    fn test_decode_utf8_base64_japanese() {
        assert_eq!(dec("=?UTF-8?B?5bGx55Sw5aSq6YOO?="), "山田太郎");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        assert_eq!(dec("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_parse_content_type_params() {
        let n = CharsetNormalizer::default();
        let ct = parse_content_type(
            "multipart/Mixed; boundary=\"----=_Part_1\"; charset=UTF-8",
            &n,
        )
        .unwrap();
        assert_eq!(ct.essence(), "multipart/mixed");
        assert_eq!(ct.boundary(), Some("----=_Part_1"));
        assert_eq!(ct.charset(), Some("UTF-8"));
    }

    #[test]
    fn test_parse_content_type_malformed() {
        let n = CharsetNormalizer::default();
        assert!(parse_content_type("garbage", &n).is_none());
        assert!(parse_content_type("text/", &n).is_none());
    }

    #[test]
    fn test_rfc2231_extended_filename() {
        let n = CharsetNormalizer::default();
        let d = parse_disposition("attachment; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf", &n).unwrap();
        assert!(d.is_attachment());
        assert_eq!(d.param("filename"), Some("résumé.pdf"));
    }

    #[test]
    fn test_rfc2231_continuations() {
        let n = CharsetNormalizer::default();
        let d = parse_disposition(
            "attachment; filename*1=\"part.txt\"; filename*0*=iso-8859-1'en'long%E9-",
            &n,
        )
        .unwrap();
        assert_eq!(d.param("filename"), Some("longé-part.txt"));
    }

    #[test]
    fn test_encoded_word_in_quoted_param() {
        let n = CharsetNormalizer::default();
        let ct = parse_content_type("application/pdf; name=\"=?UTF-8?B?w6l0w6kucGRm?=\"", &n)
            .unwrap();
        assert_eq!(ct.param("name"), Some("été.pdf"));
    }

    #[test]
    fn test_semicolon_inside_quotes() {
        let n = CharsetNormalizer::default();
        let d = parse_disposition("inline; filename=\"a;b.png\"", &n).unwrap();
        assert_eq!(d.param("filename"), Some("a;b.png"));
    }

    #[test]
    fn test_parse_content_id() {
        assert_eq!(parse_content_id(" <logo@example.com> ").as_deref(), Some("logo@example.com"));
        assert_eq!(parse_content_id("bare-id").as_deref(), Some("bare-id"));
        assert!(parse_content_id("<>").is_none());
    }

    #[test]
    fn test_address_list_decodes_display_names() {
        let n = CharsetNormalizer::default();
        let list = parse_address_list(
            "=?UTF-8?Q?Jos=C3=A9?= <jose@example.com>, Team: \"=?UTF-8?Q?B_C?=\" <b@y.com>;",
            &n,
        );
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].display_name, "José");
        assert_eq!(list[1].members[0].display_name, "B C");
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04");
    }

    #[test]
    fn test_parse_date_with_comment() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 +0000 (UTC)").is_some());
    }

    #[test]
    fn test_parse_date_named_tz() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
    }

    #[test]
    fn test_parse_date_iso8601() {
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
    }

    #[test]
    fn test_extract_angle_brackets() {
        assert_eq!(extract_angle_bracket(" <msg001@example.com> "), "<msg001@example.com>");
    }
}
