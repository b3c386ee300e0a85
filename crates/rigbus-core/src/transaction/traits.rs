//! Channel abstraction consumed by the transaction engine.
//!
//! A `Channel` is a duplex byte stream owned by exactly one backend session.
//! Serial lines, USB bulk pipes and test doubles all sit behind it.

use std::time::Duration;

use thiserror::Error;

use crate::dialect::DialectError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Device disconnected")]
    DeviceGone,

    #[error("Channel closed")]
    Closed,

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("IO error: {0}")]
    Io(String),
}

impl ChannelError {
    pub fn timeout(timeout: Duration) -> Self {
        ChannelError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout { .. })
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                ChannelError::Timeout { timeout_ms: 0 }
            }
            std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe => {
                ChannelError::DeviceGone
            }
            _ => ChannelError::Io(e.to_string()),
        }
    }
}

/// Failure of a complete command/response cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("No reply after all retries")]
    Timeout,

    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] ChannelError),

    #[error(transparent)]
    Dialect(#[from] DialectError),
}

/// Abstract duplex byte channel.
pub trait Channel {
    /// Discard any stale input.
    fn flush(&mut self) -> Result<(), ChannelError>;

    /// Write raw bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError>;

    /// Read until a byte contained in `delimiter` has been read (it is kept
    /// in the returned bytes), `max_len` bytes have been read, or `timeout`
    /// elapses without completing the reply.
    fn read_until(
        &mut self,
        delimiter: &[u8],
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ChannelError>;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn flush(&mut self) -> Result<(), ChannelError> {
        (**self).flush()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        (**self).write(data)
    }

    fn read_until(
        &mut self,
        delimiter: &[u8],
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ChannelError> {
        (**self).read_until(delimiter, max_len, timeout)
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn flush(&mut self) -> Result<(), ChannelError> {
        (**self).flush()
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        (**self).write(data)
    }

    fn read_until(
        &mut self,
        delimiter: &[u8],
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ChannelError> {
        (**self).read_until(delimiter, max_len, timeout)
    }
}
