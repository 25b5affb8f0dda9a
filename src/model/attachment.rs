//! Attachments: materialized views over leaf parts.
//!
//! An [`Attachment`] borrows its part and the message buffer; the payload is
//! decoded lazily on first access and cached on the part.

use std::io::Cursor;

use super::header::HeaderMap;
use super::part::{MimePart, PartId};

/// A downloadable attachment or an inline resource.
#[derive(Debug, Clone)]
pub struct Attachment<'a> {
    part: &'a MimePart,
    source: &'a [u8],
    filename: String,
    is_inline: bool,
}

impl<'a> Attachment<'a> {
    /// Wrap a classified leaf part.
    pub fn new(part: &'a MimePart, source: &'a [u8], is_inline: bool) -> Self {
        let filename = part
            .filename()
            .map(String::from)
            .unwrap_or_else(|| fallback_filename(&part.mime_type()));
        Self {
            part,
            source,
            filename,
            is_inline,
        }
    }

    /// Declared filename, or `noname.<ext>` when the part declares none.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub fn content_type(&self) -> String {
        self.part.mime_type()
    }

    /// Disposition type (`"attachment"`, `"inline"`), if declared.
    pub fn content_disposition(&self) -> Option<&'a str> {
        self.part.disposition.as_ref().map(|d| d.kind.as_str())
    }

    /// Content-ID without angle brackets.
    pub fn content_id(&self) -> Option<&'a str> {
        self.part.content_id.as_deref()
    }

    /// `true` for resources rendered inside an HTML body.
    pub fn is_inline(&self) -> bool {
        self.is_inline
    }

    /// Headers of the underlying part.
    pub fn headers(&self) -> &'a HeaderMap {
        &self.part.headers
    }

    /// Id of the underlying part in the tree.
    pub fn part_id(&self) -> &'a PartId {
        &self.part.id
    }

    pub fn part(&self) -> &'a MimePart {
        self.part
    }

    /// Decoded payload.
    pub fn content(&self) -> &'a [u8] {
        self.part.decoded_body(self.source)
    }

    /// A readable handle over the decoded payload.
    pub fn reader(&self) -> Cursor<&'a [u8]> {
        Cursor::new(self.content())
    }

    /// Decoded size in bytes.
    pub fn size(&self) -> u64 {
        self.content().len() as u64
    }

    /// Serializable summary of this attachment.
    pub fn meta(&self) -> AttachmentMeta {
        AttachmentMeta {
            filename: self.filename.clone(),
            content_type: self.content_type(),
            size: self.size(),
            encoding: self.part.transfer_encoding.to_string(),
            content_id: self.part.content_id.clone(),
            is_inline: self.is_inline,
            part_id: self.part.id.to_string(),
        }
    }
}

/// Metadata about an attachment, suitable for listings and JSON output.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct AttachmentMeta {
    /// Filename of the attachment. Generated if missing from the headers.
    pub filename: String,

    /// MIME content type.
    pub content_type: String,

    /// Decoded size in bytes.
    pub size: u64,

    /// Content-Transfer-Encoding (`base64`, `quoted-printable`, `7bit`, `8bit`, `binary`).
    pub encoding: String,

    /// Content-ID for inline attachments referenced from HTML.
    pub content_id: Option<String>,

    /// `true` if the attachment is inline (embedded in HTML), `false` if a regular attachment.
    pub is_inline: bool,

    /// Dotted part id (`1.2.1`).
    pub part_id: String,
}

/// `noname` plus an extension guessed from the mime type.
pub fn fallback_filename(mime_type: &str) -> String {
    match extension_for(mime_type) {
        Some(ext) => format!("noname.{ext}"),
        None => "noname".to_string(),
    }
}

fn extension_for(mime_type: &str) -> Option<&'static str> {
    let ext = match mime_type {
        "message/rfc822" => "eml",
        "text/plain" => "txt",
        "text/html" => "html",
        "text/calendar" => "ics",
        "text/csv" => "csv",
        "text/vcard" | "text/x-vcard" => "vcf",
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/bmp" => "bmp",
        "image/tiff" => "tif",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/gzip" => "gz",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/pgp-signature" => "asc",
        "application/pkcs7-signature" | "application/x-pkcs7-signature" => "p7s",
        "audio/mpeg" => "mp3",
        "video/mp4" => "mp4",
        _ => return None,
    };
    Some(ext)
}
