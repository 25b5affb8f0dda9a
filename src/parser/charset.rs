//! Charset normalization: declared or guessed charsets to Rust strings.
//!
//! Backed by `encoding_rs`. Conversion never fails: unknown labels fall back
//! to UTF-8 when the bytes are valid UTF-8, otherwise to the configured
//! fallback charset, and invalid sequences become U+FFFD.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use tracing::warn;

/// Labels seen in real mail that the WHATWG registry does not know.
const ALIASES: &[(&str, &str)] = &[
    ("cp932", "shift_jis"),
    ("ms932", "shift_jis"),
    ("cp936", "gbk"),
    ("cp949", "euc-kr"),
    ("cp950", "big5"),
    ("iso-8859-8-e", "iso-8859-8"),
    ("ansi", "windows-1252"),
    ("x-mac-roman", "macintosh"),
    ("utf-8-sig", "utf-8"),
];

/// Converts bytes in a declared charset to text.
#[derive(Debug, Clone, Copy)]
pub struct CharsetNormalizer {
    fallback: &'static Encoding,
}

impl Default for CharsetNormalizer {
    fn default() -> Self {
        Self {
            fallback: WINDOWS_1252,
        }
    }
}

impl CharsetNormalizer {
    /// Create a normalizer whose fallback is `default_charset`.
    ///
    /// An unknown label keeps the built-in fallback (Windows-1252, the
    /// WHATWG reading of ISO-8859-1).
    pub fn new(default_charset: &str) -> Self {
        match lookup(default_charset) {
            Some(fallback) => Self { fallback },
            None => {
                warn!(
                    charset = default_charset,
                    "Unknown default charset, using windows-1252"
                );
                Self::default()
            }
        }
    }

    /// The charset used when nothing better is known.
    pub fn fallback(&self) -> &'static Encoding {
        self.fallback
    }

    /// Convert `bytes` to text using the declared charset `hint`.
    pub fn normalize(&self, bytes: &[u8], hint: Option<&str>) -> String {
        if let Some(label) = hint {
            match lookup(label) {
                Some(encoding) if encoding == UTF_8 => {
                    return String::from_utf8_lossy(bytes).into_owned();
                }
                Some(encoding) => {
                    let (decoded, _) = encoding.decode_without_bom_handling(bytes);
                    return decoded.into_owned();
                }
                None => {
                    warn!(charset = label, "Unknown charset, guessing");
                }
            }
        }
        self.guess(bytes)
    }

    /// Decode bytes with no declared charset: UTF-8 when valid, else the
    /// fallback charset.
    pub fn guess(&self, bytes: &[u8]) -> String {
        match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let (decoded, _) = self.fallback.decode_without_bom_handling(bytes);
                decoded.into_owned()
            }
        }
    }
}

/// Resolve a charset label, tolerating quotes, RFC 2231 language suffixes
/// and a few non-standard aliases.
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    let cleaned = label.trim().trim_matches('"');
    let cleaned = cleaned.split('*').next().unwrap_or(cleaned).trim();
    if cleaned.is_empty() {
        return None;
    }
    if let Some(encoding) = Encoding::for_label(cleaned.as_bytes()) {
        return Some(encoding);
    }
    let lower = cleaned.to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .and_then(|(_, target)| Encoding::for_label(target.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_latin1() {
        let n = CharsetNormalizer::default();
        assert_eq!(n.normalize(b"caf\xe9", Some("ISO-8859-1")), "café");
    }

    #[test]
    fn test_declared_utf8_invalid_bytes_are_replaced() {
        let n = CharsetNormalizer::default();
        assert_eq!(n.normalize(b"a\xffb", Some("utf-8")), "a\u{fffd}b");
    }

    #[test]
    fn test_unknown_charset_guesses() {
        let n = CharsetNormalizer::default();
        assert_eq!(n.normalize("héllo".as_bytes(), Some("x-bogus")), "héllo");
        assert_eq!(n.normalize(b"h\xe9llo", Some("x-bogus")), "héllo");
    }

    #[test]
    fn test_configured_fallback() {
        let n = CharsetNormalizer::new("koi8-r");
        assert_eq!(n.fallback().name(), "KOI8-R");
        assert_eq!(n.guess(b"\xf0\xd2\xc9\xd7\xc5\xd4"), "Привет");
    }

    #[test]
    fn test_unknown_default_keeps_builtin() {
        let n = CharsetNormalizer::new("no-such-charset");
        assert_eq!(n.fallback(), WINDOWS_1252);
    }

    #[test]
    fn test_lookup_aliases_and_suffixes() {
        assert_eq!(lookup("\"UTF-8\""), Some(UTF_8));
        assert_eq!(lookup("utf-8*en"), Some(UTF_8));
        assert_eq!(lookup("cp932").map(|e| e.name()), Some("Shift_JIS"));
        assert!(lookup("").is_none());
    }
}
