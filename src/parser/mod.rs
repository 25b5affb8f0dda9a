//! MIME parsing: tokenizer, header and transfer decoding, classification,
//! middleware, body assembly and the parse session.

pub mod body;
pub mod charset;
pub mod classify;
pub mod header;
pub mod middleware;
pub mod session;
pub mod tokenizer;
pub mod transfer;
