//! Data model: part tree, headers, addresses and attachments.

pub mod address;
pub mod attachment;
pub mod header;
pub mod part;
