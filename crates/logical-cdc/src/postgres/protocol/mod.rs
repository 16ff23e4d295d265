//! PostgreSQL replication protocol implementation
//!
//! Custom TCP client for streaming replication plus the `test_decoding`
//! line parser and decoder.

pub mod client;
pub mod decoder;
pub mod message;
pub mod parser;

pub use client::*;
pub use decoder::*;
pub use message::*;
pub use parser::{ColumnValue, ParseError, ParseResult, ParserState};
