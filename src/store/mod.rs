//! Message sources.

pub mod source;
