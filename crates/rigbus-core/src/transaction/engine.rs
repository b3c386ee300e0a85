//! One command/response cycle with bounded retries.
//!
//! Silence from the device (read timeout) is retried by re-issuing the whole
//! flush + write + read cycle. A reply that starts with the error marker is a
//! negative acknowledge and is returned at once. Write failures abort, and so
//! does a flush that finds the channel gone.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::traits::{Channel, ChannelError, TransactionError};
use crate::protocol::Reply;
use crate::protocol::constants::{
    DEFAULT_ERROR_MARKER, DEFAULT_REPLY_CAPACITY, DEFAULT_TRANSACTION_RETRIES,
    DEFAULT_TRANSACTION_TIMEOUT,
};

/// Parameters of a single transaction.
#[derive(Debug, Clone)]
pub struct TransactionSpec<'a> {
    /// Bytes to send. `None` only reads a reply.
    pub command: Option<&'a [u8]>,
    /// Reply buffer capacity; 0 selects the default.
    pub reply_capacity: usize,
    /// Set of stop bytes terminating a reply.
    pub delimiter: &'a [u8],
    pub timeout: Duration,
    pub max_retries: u32,
    /// Leading byte identifying a negative acknowledge.
    pub error_marker: u8,
}

impl<'a> TransactionSpec<'a> {
    pub fn new(command: Option<&'a [u8]>, delimiter: &'a [u8]) -> Self {
        Self {
            command,
            reply_capacity: DEFAULT_REPLY_CAPACITY,
            delimiter,
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            max_retries: DEFAULT_TRANSACTION_RETRIES,
            error_marker: DEFAULT_ERROR_MARKER,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_reply_capacity(mut self, capacity: usize) -> Self {
        self.reply_capacity = capacity;
        self
    }

    pub fn with_error_marker(mut self, marker: u8) -> Self {
        self.error_marker = marker;
        self
    }

    fn capacity(&self) -> usize {
        if self.reply_capacity == 0 {
            DEFAULT_REPLY_CAPACITY
        } else {
            self.reply_capacity
        }
    }
}

/// Classified result of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOutcome {
    Ok(Reply),
    /// Device answered with a negative acknowledge.
    ProtocolError(String),
    /// No reply within `max_retries + 1` attempts.
    Timeout,
    IoError(ChannelError),
}

impl TransactionOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, TransactionOutcome::Ok(_))
    }

    pub fn into_result(self) -> Result<Reply, TransactionError> {
        match self {
            TransactionOutcome::Ok(reply) => Ok(reply),
            TransactionOutcome::ProtocolError(reason) => Err(TransactionError::Rejected(reason)),
            TransactionOutcome::Timeout => Err(TransactionError::Timeout),
            TransactionOutcome::IoError(e) => Err(TransactionError::Io(e)),
        }
    }
}

/// Run one command/response exchange on `channel`.
#[instrument(level = "debug", skip(channel, spec), fields(max_retries = spec.max_retries))]
pub fn transact<C: Channel + ?Sized>(
    channel: &mut C,
    spec: &TransactionSpec<'_>,
) -> TransactionOutcome {
    let capacity = spec.capacity();
    let mut retry = 0u32;

    loop {
        match channel.flush() {
            Ok(()) => {}
            Err(e @ (ChannelError::DeviceGone | ChannelError::Closed)) => {
                warn!(error = %e, "Channel lost before transaction");
                return TransactionOutcome::IoError(e);
            }
            Err(e) => warn!(error = %e, "Flush before transaction failed"),
        }

        if let Some(command) = spec.command {
            match channel.write(command) {
                Ok(n) if n == command.len() => {}
                Ok(n) => {
                    return TransactionOutcome::IoError(ChannelError::ShortWrite {
                        written: n,
                        expected: command.len(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Write failed, aborting transaction");
                    return TransactionOutcome::IoError(e);
                }
            }
        }

        match channel.read_until(spec.delimiter, capacity, spec.timeout) {
            Ok(bytes) => {
                let reply = Reply::new(bytes);
                if reply.is_rejection(spec.error_marker) {
                    debug!(reply = ?reply, "Negative acknowledge");
                    return TransactionOutcome::ProtocolError(format!(
                        "negative acknowledge '{}'",
                        reply.text(spec.delimiter)
                    ));
                }
                debug!(reply = ?reply, retries = retry, "Transaction complete");
                return TransactionOutcome::Ok(reply);
            }
            Err(e) if e.is_timeout() => {
                if retry < spec.max_retries {
                    retry += 1;
                    debug!(retry, "No reply, re-issuing command");
                    continue;
                }
                warn!(attempts = retry + 1, "No reply from device");
                return TransactionOutcome::Timeout;
            }
            Err(e) => return TransactionOutcome::IoError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;

    const EOM: &[u8] = b"\r\n";

    #[test]
    fn test_ok_reply_single_write() {
        let mut mock = MockChannel::new();
        mock.queue_reply(b"AZ=090 EL=010\r\n");

        let spec = TransactionSpec::new(Some(b"C2\r"), EOM);
        let outcome = transact(&mut mock, &spec);

        assert_eq!(
            outcome,
            TransactionOutcome::Ok(Reply::from(&b"AZ=090 EL=010\r"[..]))
        );
        assert_eq!(mock.get_writes(), vec![b"C2\r".to_vec()]);
        assert_eq!(mock.flush_count(), 1);
    }

    #[test]
    fn test_negative_ack_is_not_retried() {
        let mut mock = MockChannel::new();
        mock.queue_reply(b"?>\r\n");
        mock.queue_reply(b"unused\r\n");

        let spec = TransactionSpec::new(Some(b"Q\r"), EOM).with_retries(5);
        let outcome = transact(&mut mock, &spec);

        assert!(matches!(outcome, TransactionOutcome::ProtocolError(_)));
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_timeout_retries_whole_cycle() {
        for retries in [0u32, 1, 3] {
            let mut mock = MockChannel::new();
            let spec = TransactionSpec::new(Some(b"S\r"), EOM).with_retries(retries);

            let outcome = transact(&mut mock, &spec);

            assert_eq!(outcome, TransactionOutcome::Timeout);
            assert_eq!(mock.get_writes().len(), retries as usize + 1);
            assert_eq!(mock.flush_count(), retries as usize + 1);
        }
    }

    #[test]
    fn test_reply_after_timeouts() {
        let mut mock = MockChannel::new();
        mock.queue_timeout();
        mock.queue_timeout();
        mock.queue_reply(b"\r\n");

        let spec = TransactionSpec::new(Some(b"S\r"), EOM).with_retries(3);
        let outcome = transact(&mut mock, &spec);

        assert!(outcome.is_ok());
        assert_eq!(mock.get_writes().len(), 3);
    }

    #[test]
    fn test_write_failure_aborts() {
        let mut mock = MockChannel::new();
        mock.fail_writes(ChannelError::Io("broken".into()));
        mock.queue_reply(b"never\r\n");

        let spec = TransactionSpec::new(Some(b"S\r"), EOM).with_retries(3);
        let outcome = transact(&mut mock, &spec);

        assert_eq!(
            outcome,
            TransactionOutcome::IoError(ChannelError::Io("broken".into()))
        );
        assert_eq!(mock.read_count(), 0);
    }

    #[test]
    fn test_read_error_is_not_retried() {
        let mut mock = MockChannel::new();
        mock.queue_error(ChannelError::DeviceGone);

        let spec = TransactionSpec::new(Some(b"S\r"), EOM).with_retries(3);
        let outcome = transact(&mut mock, &spec);

        assert_eq!(outcome, TransactionOutcome::IoError(ChannelError::DeviceGone));
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_flush_device_gone_aborts() {
        let mut mock = MockChannel::new();
        mock.fail_flushes(ChannelError::DeviceGone);
        mock.queue_reply(b"AZ=090 EL=010\r\n");

        let spec = TransactionSpec::new(Some(b"C2\r"), EOM).with_retries(3);
        let outcome = transact(&mut mock, &spec);

        assert_eq!(outcome, TransactionOutcome::IoError(ChannelError::DeviceGone));
        assert!(mock.get_writes().is_empty());
        assert_eq!(mock.read_count(), 0);
    }

    #[test]
    fn test_other_flush_failure_is_ignored() {
        let mut mock = MockChannel::new();
        mock.fail_flushes(ChannelError::Io("flush unsupported".into()));
        mock.queue_reply(b"AZ=090 EL=010\r\n");

        let spec = TransactionSpec::new(Some(b"C2\r"), EOM);
        let outcome = transact(&mut mock, &spec);

        assert!(outcome.is_ok());
        assert_eq!(mock.flush_count(), 1);
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_read_only_transaction() {
        let mut mock = MockChannel::new();
        mock.queue_reply(b"READY\r\n");

        let spec = TransactionSpec::new(None, EOM);
        let reply = transact(&mut mock, &spec).into_result().unwrap();

        assert_eq!(reply.text(EOM), "READY");
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_zero_capacity_uses_default() {
        let mut mock = MockChannel::new();
        mock.queue_reply(b"OK\r");

        let spec = TransactionSpec::new(Some(b"X\r"), EOM).with_reply_capacity(0);
        transact(&mut mock, &spec);

        assert_eq!(mock.last_max_len(), Some(DEFAULT_REPLY_CAPACITY));
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(
            TransactionOutcome::Timeout.into_result(),
            Err(TransactionError::Timeout)
        );
        assert!(matches!(
            TransactionOutcome::ProtocolError("x".into()).into_result(),
            Err(TransactionError::Rejected(_))
        ));
    }
}
