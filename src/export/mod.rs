//! Writing attachments to disk.

pub mod attachment;
