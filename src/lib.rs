//! `mimeshell`: parse raw RFC 822 / MIME messages.
//!
//! This crate provides the core library for splitting a message into its
//! part tree, decoding headers and bodies, classifying parts into bodies,
//! inline resources and attachments, and saving attachments to disk.

pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod store;

pub use error::{MimeError, Result};
pub use export::attachment::{FilenameStrategy, SavedAttachment};
pub use parser::body::BodyType;
pub use parser::session::{HeaderValue, MailParser, ParserConfig};
