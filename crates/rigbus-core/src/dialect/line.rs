//! Pass-through dialect for simple line protocols.

use super::{Dialect, DialectError};
use crate::protocol::Reply;
use crate::protocol::constants::DEFAULT_ERROR_MARKER;

/// Sends commands verbatim and returns the reply payload without its
/// delimiter.
#[derive(Debug, Clone)]
pub struct LineDialect {
    delimiter: Vec<u8>,
    error_marker: u8,
}

impl LineDialect {
    pub fn new(delimiter: &[u8]) -> Self {
        Self {
            delimiter: delimiter.to_vec(),
            error_marker: DEFAULT_ERROR_MARKER,
        }
    }

    pub fn with_error_marker(mut self, marker: u8) -> Self {
        self.error_marker = marker;
        self
    }
}

impl Dialect for LineDialect {
    type Command = Vec<u8>;
    type Response = Vec<u8>;

    fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    fn error_marker(&self) -> u8 {
        self.error_marker
    }

    fn encode(&self, command: &Vec<u8>) -> Result<Vec<u8>, DialectError> {
        Ok(command.clone())
    }

    fn decode(&self, _command: &Vec<u8>, reply: &Reply) -> Result<Vec<u8>, DialectError> {
        Ok(reply.payload(&self.delimiter).to_vec())
    }
}
