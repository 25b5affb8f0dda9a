//! Raw header storage.
//!
//! Header values are kept exactly as they appeared on the wire, minus the
//! folding line breaks. Decoding (RFC 2047, charsets) is applied on demand by
//! [`crate::parser::header`].

use std::ops::Range;

/// One header field as found in a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    /// Field name, stored verbatim (matched case-insensitively).
    pub name: String,
    /// Unfolded value bytes, no charset applied.
    pub value: Vec<u8>,
    /// Byte range of the complete field (folded lines and final line ending)
    /// inside the message buffer.
    pub raw: Range<usize>,
}

impl HeaderField {
    /// The raw value as text.
    ///
    /// Valid UTF-8 is returned as-is; any other byte sequence is mapped
    /// byte-for-byte onto U+0000..U+00FF so nothing is lost.
    pub fn raw_value(&self) -> String {
        match std::str::from_utf8(&self.value) {
            Ok(s) => s.to_string(),
            Err(_) => self.value.iter().map(|&b| b as char).collect(),
        }
    }

    /// Case-insensitive name comparison.
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered header block. A name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: Vec<HeaderField>,
}

impl HeaderMap {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, preserving order.
    pub fn push(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    /// First field with the given name.
    pub fn first(&self, name: &str) -> Option<&HeaderField> {
        self.fields.iter().find(|f| f.is(name))
    }

    /// All fields with the given name, in order of appearance.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderField> + 'a {
        self.fields.iter().filter(move |f| f.is(name))
    }

    /// First raw value with the given name, as text.
    pub fn get(&self, name: &str) -> Option<String> {
        self.first(name).map(HeaderField::raw_value)
    }

    /// Whether at least one field with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.first(name).is_some()
    }

    /// Iterate over all fields in order.
    pub fn iter(&self) -> std::slice::Iter<'_, HeaderField> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` when the block holds no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
