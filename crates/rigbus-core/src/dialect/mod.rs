//! Device dialects.
//!
//! A dialect knows how to turn a typed command into bytes and a reply back
//! into a typed response. Retry and timeout handling stays in the
//! transaction engine, so every device family shares it.

pub mod gs232b;
pub mod line;

use thiserror::Error;

use crate::protocol::Reply;
use crate::protocol::constants::DEFAULT_ERROR_MARKER;

pub use gs232b::{Gs232b, Gs232bCommand, Gs232bResponse, Gs232bRotator, MoveDirection};
pub use line::LineDialect;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DialectError {
    #[error("{what} {value} outside {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Malformed reply '{reply}': expected {expected}")]
    Malformed {
        reply: String,
        expected: &'static str,
    },
}

/// Command encoding and reply decoding for one device family.
pub trait Dialect {
    type Command;
    type Response;

    /// Stop bytes terminating a reply.
    fn delimiter(&self) -> &[u8];

    /// Leading reply byte that marks a rejected command.
    fn error_marker(&self) -> u8 {
        DEFAULT_ERROR_MARKER
    }

    fn encode(&self, command: &Self::Command) -> Result<Vec<u8>, DialectError>;

    fn decode(&self, command: &Self::Command, reply: &Reply)
    -> Result<Self::Response, DialectError>;
}
