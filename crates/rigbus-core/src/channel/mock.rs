//! Mock channel for testing transaction and dialect logic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transaction::{Channel, ChannelError};

/// Scripted result of one `read_until` call.
#[derive(Debug, Clone)]
enum ReadStep {
    Reply(Vec<u8>),
    Timeout,
    Error(ChannelError),
}

/// Mock channel. Clones share the same script and logs.
#[derive(Clone, Default)]
pub struct MockChannel {
    /// Queued read results; an empty queue reads as a timeout.
    reads: Arc<Mutex<VecDeque<ReadStep>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Error returned by every write, if set.
    write_error: Arc<Mutex<Option<ChannelError>>>,
    /// Error returned by every flush, if set.
    flush_error: Arc<Mutex<Option<ChannelError>>>,
    flushes: Arc<Mutex<usize>>,
    read_calls: Arc<Mutex<Vec<usize>>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply to be returned on the next read.
    pub fn queue_reply(&self, bytes: &[u8]) {
        self.reads
            .lock()
            .unwrap()
            .push_back(ReadStep::Reply(bytes.to_vec()));
    }

    /// Queue a read that times out.
    pub fn queue_timeout(&self) {
        self.reads.lock().unwrap().push_back(ReadStep::Timeout);
    }

    /// Queue a read that fails.
    pub fn queue_error(&self, error: ChannelError) {
        self.reads.lock().unwrap().push_back(ReadStep::Error(error));
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, error: ChannelError) {
        *self.write_error.lock().unwrap() = Some(error);
    }

    /// Make every subsequent flush fail.
    pub fn fail_flushes(&self, error: ChannelError) {
        *self.flush_error.lock().unwrap() = Some(error);
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    pub fn flush_count(&self) -> usize {
        *self.flushes.lock().unwrap()
    }

    pub fn read_count(&self) -> usize {
        self.read_calls.lock().unwrap().len()
    }

    /// `max_len` passed to the most recent read.
    pub fn last_max_len(&self) -> Option<usize> {
        self.read_calls.lock().unwrap().last().copied()
    }
}

impl Channel for MockChannel {
    fn flush(&mut self) -> Result<(), ChannelError> {
        *self.flushes.lock().unwrap() += 1;
        match self.flush_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        if let Some(e) = self.write_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read_until(
        &mut self,
        delimiter: &[u8],
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ChannelError> {
        self.read_calls.lock().unwrap().push(max_len);
        match self.reads.lock().unwrap().pop_front() {
            Some(ReadStep::Reply(bytes)) => {
                let end = bytes
                    .iter()
                    .position(|b| delimiter.contains(b))
                    .map_or(bytes.len(), |pos| pos + 1)
                    .min(max_len);
                Ok(bytes[..end].to_vec())
            }
            Some(ReadStep::Error(e)) => Err(e),
            Some(ReadStep::Timeout) | None => Err(ChannelError::timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_reply_stops_at_first_delimiter_byte() {
        let mut mock = MockChannel::new();
        mock.queue_reply(b"AZ=001\r\n");

        let bytes = mock
            .read_until(b"\r\n", 64, Duration::from_millis(10))
            .unwrap();
        assert_eq!(bytes, b"AZ=001\r");
    }

    #[test]
    fn test_mock_reply_truncated_to_max_len() {
        let mut mock = MockChannel::new();
        mock.queue_reply(b"ABCDEFGH\r");

        let bytes = mock.read_until(b"\r", 4, Duration::from_millis(10)).unwrap();
        assert_eq!(bytes, b"ABCD");
    }

    #[test]
    fn test_mock_empty_queue_times_out() {
        let mut mock = MockChannel::new();
        let err = mock
            .read_until(b"\r", 4, Duration::from_millis(25))
            .unwrap_err();
        assert_eq!(err, ChannelError::Timeout { timeout_ms: 25 });
    }

    #[test]
    fn test_mock_write_capture_shared_between_clones() {
        let mock = MockChannel::new();
        let mut writer = mock.clone();
        writer.write(b"Hello").unwrap();
        writer.write(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }
}
