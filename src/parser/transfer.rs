//! Content-Transfer-Encoding and RFC 2047 payload decoding.
//!
//! Decoders are lenient: whitespace, stray characters, missing padding and
//! broken escapes are repaired or passed through instead of failing.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use tracing::{trace, warn};

use crate::model::part::TransferEncoding;

/// Base64 engine that accepts missing padding and non-zero trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Remove a transfer encoding from a body.
pub fn decode(body: &[u8], encoding: TransferEncoding) -> Vec<u8> {
    match encoding {
        TransferEncoding::Base64 => decode_base64(body),
        TransferEncoding::QuotedPrintable => decode_quoted_printable(body),
        TransferEncoding::SevenBit | TransferEncoding::EightBit | TransferEncoding::Binary => {
            body.to_vec()
        }
    }
}

/// Decode base64, skipping whitespace and any byte outside the alphabet.
///
/// Padding ends a chunk, so concatenated base64 blocks decode correctly.
pub fn decode_base64(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut chunk = Vec::with_capacity(input.len());

    for &b in input {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/' => chunk.push(b),
            b'=' => flush_base64_chunk(&mut chunk, &mut out),
            _ => {}
        }
    }
    flush_base64_chunk(&mut chunk, &mut out);
    out
}

fn flush_base64_chunk(chunk: &mut Vec<u8>, out: &mut Vec<u8>) {
    if chunk.is_empty() {
        return;
    }
    // A single dangling sextet cannot encode a byte
    if chunk.len() % 4 == 1 {
        trace!(len = chunk.len(), "Dropping dangling base64 character");
        chunk.pop();
    }
    if let Err(e) = LENIENT.decode_vec(&chunk[..], out) {
        warn!(error = %e, "Undecodable base64 chunk skipped");
    }
    chunk.clear();
}

/// Decode quoted-printable (RFC 2045 §6.7).
///
/// Line endings and 8-bit bytes are kept as they are; an `=` that starts
/// neither an escape nor a soft line break is kept literally.
pub fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let b = input[i];
        if b != b'=' {
            out.push(b);
            i += 1;
            continue;
        }

        // Soft line break, allowing transport padding before the newline
        let mut j = i + 1;
        while j < input.len() && (input[j] == b' ' || input[j] == b'\t') {
            j += 1;
        }
        match input.get(j) {
            None => {
                i = j;
                continue;
            }
            Some(b'\n') => {
                i = j + 1;
                continue;
            }
            Some(b'\r') if matches!(input.get(j + 1), Some(b'\n') | None) => {
                i = (j + 2).min(input.len());
                continue;
            }
            _ => {}
        }

        match (
            input.get(i + 1).copied().and_then(hex_value),
            input.get(i + 2).copied().and_then(hex_value),
        ) {
            (Some(hi), Some(lo)) => {
                out.push((hi << 4) | lo);
                i += 3;
            }
            _ => {
                trace!(offset = i, "Literal '=' in quoted-printable");
                out.push(b'=');
                i += 1;
            }
        }
    }

    out
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Decode the text of an RFC 2047 `Q` encoded-word: `_` is a space.
pub fn decode_q(input: &str) -> Vec<u8> {
    let spaced = input.replace('_', " ");
    decode_quoted_printable(spaced.as_bytes())
}

/// Encode bytes as standard, padded base64.
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_with_line_breaks() {
        assert_eq!(decode_base64(b"SGVs\r\nbG8s\nIFdv\r\ncmxkIQ==\r\n"), b"Hello, World!");
    }

    #[test]
    fn test_base64_missing_padding() {
        assert_eq!(decode_base64(b"SGVsbG8"), b"Hello");
    }

    #[test]
    fn test_base64_concatenated_blocks() {
        assert_eq!(decode_base64(b"SGk=IHRoZXJl"), b"Hi there");
    }

    #[test]
    fn test_base64_ignores_garbage() {
        assert_eq!(decode_base64(b"SG*Vs#bG8="), b"Hello");
    }

    #[test]
    fn test_quoted_printable_soft_breaks() {
        let decoded = decode_quoted_printable(b"Caf=C3=A9 au=\r\n lait=\nfin");
        assert_eq!(String::from_utf8(decoded).unwrap(), "Café au laitfin");
    }

    #[test]
    fn test_quoted_printable_broken_escape_passes_through() {
        let decoded = decode_quoted_printable(b"100=% sure");
        assert_eq!(decoded, b"100=% sure");
    }

    #[test]
    fn test_q_underscore_is_space() {
        assert_eq!(decode_q("Caf=C3=A9_con_le=C3=B1a"), "Café con leña".as_bytes());
    }

    #[test]
    fn test_reencoding_is_equivalent() {
        let original = "Línea uno con acentos\r\nline two = equals and a very long line that needs a soft break somewhere past column seventy-six";
        let qp = quoted_printable::encode(original.as_bytes());
        assert_eq!(decode_quoted_printable(&qp), original.as_bytes());

        let b64 = encode_base64(original.as_bytes());
        assert_eq!(decode_base64(b64.as_bytes()), original.as_bytes());
    }

    #[test]
    fn test_quoted_printable_keeps_eight_bit_and_newlines() {
        assert_eq!(decode_quoted_printable(b"caf\xe9\nok=3D"), b"caf\xe9\nok=");
    }

    #[test]
    fn test_identity_encodings() {
        assert_eq!(decode(b"raw =41", TransferEncoding::EightBit), b"raw =41");
        assert_eq!(decode(b"=41", TransferEncoding::QuotedPrintable), b"A");
    }
}
