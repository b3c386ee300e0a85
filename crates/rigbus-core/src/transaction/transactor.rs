//! Dialect-aware wrapper around the transaction engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::engine::{TransactionSpec, transact};
use super::traits::{Channel, TransactionError};
use crate::dialect::Dialect;
use crate::protocol::Reply;
use crate::protocol::constants::{
    DEFAULT_REPLY_CAPACITY, DEFAULT_TRANSACTION_RETRIES, DEFAULT_TRANSACTION_TIMEOUT,
};

/// Timeout and retry policy applied to every transaction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionSettings {
    /// Per-read timeout in milliseconds.
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub reply_capacity: usize,
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TRANSACTION_TIMEOUT.as_millis() as u64,
            max_retries: DEFAULT_TRANSACTION_RETRIES,
            reply_capacity: DEFAULT_REPLY_CAPACITY,
        }
    }
}

impl TransactionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Transaction engine bound to one channel and one dialect.
pub struct Transactor<C: Channel, D: Dialect> {
    channel: C,
    dialect: D,
    settings: TransactionSettings,
}

impl<C: Channel, D: Dialect> Transactor<C, D> {
    pub fn new(channel: C, dialect: D, settings: TransactionSettings) -> Self {
        Self {
            channel,
            dialect,
            settings,
        }
    }

    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    pub fn settings(&self) -> &TransactionSettings {
        &self.settings
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn into_inner(self) -> (C, D) {
        (self.channel, self.dialect)
    }

    /// Encode, exchange and decode one command.
    pub fn execute(&mut self, command: &D::Command) -> Result<D::Response, TransactionError> {
        let bytes = self.dialect.encode(command)?;
        let reply = self.exchange(Some(&bytes))?;
        Ok(self.dialect.decode(command, &reply)?)
    }

    /// Exchange raw bytes using the dialect's framing.
    #[instrument(level = "trace", skip(self, command))]
    pub fn exchange(&mut self, command: Option<&[u8]>) -> Result<Reply, TransactionError> {
        let spec = TransactionSpec {
            command,
            reply_capacity: self.settings.reply_capacity,
            delimiter: self.dialect.delimiter(),
            timeout: self.settings.timeout(),
            max_retries: self.settings.max_retries,
            error_marker: self.dialect.error_marker(),
        };
        transact(&mut self.channel, &spec).into_result()
    }
}
