//! Line channel over a claimed USB bulk pipe pair.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::protocol::constants::DEFAULT_USB_TIMEOUT;
use crate::transaction::{Channel, ChannelError};
use crate::usb::{Direction, NativeDevice, UsbDeviceHandle, UsbError};

impl From<UsbError> for ChannelError {
    fn from(e: UsbError) -> Self {
        match e {
            UsbError::Timeout { timeout_ms } => ChannelError::Timeout { timeout_ms },
            UsbError::DeviceGone => ChannelError::DeviceGone,
            UsbError::Closed => ChannelError::Closed,
            UsbError::ShortTransfer {
                endpoint,
                transferred,
                expected,
            } if Direction::of(endpoint) == Direction::Out => ChannelError::ShortWrite {
                written: transferred,
                expected,
            },
            other => ChannelError::Io(other.to_string()),
        }
    }
}

/// [`Channel`] backed by a [`UsbDeviceHandle`].
///
/// Bytes received past a delimiter are kept for the next read until the
/// channel is flushed.
pub struct UsbChannel<D: NativeDevice> {
    handle: UsbDeviceHandle<D>,
    pending: Vec<u8>,
    write_timeout: Duration,
}

impl<D: NativeDevice> UsbChannel<D> {
    pub fn new(handle: UsbDeviceHandle<D>) -> Self {
        Self {
            handle,
            pending: Vec::new(),
            write_timeout: DEFAULT_USB_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn handle(&self) -> &UsbDeviceHandle<D> {
        &self.handle
    }

    pub fn into_handle(self) -> UsbDeviceHandle<D> {
        self.handle
    }

    /// Take a complete reply out of `pending`, if one is there.
    fn take_reply(&mut self, delimiter: &[u8], max_len: usize) -> Option<Vec<u8>> {
        let window = self.pending.len().min(max_len);
        if let Some(pos) = self.pending[..window]
            .iter()
            .position(|b| delimiter.contains(b))
        {
            return Some(self.pending.drain(..=pos).collect());
        }
        if self.pending.len() >= max_len {
            return Some(self.pending.drain(..max_len).collect());
        }
        None
    }
}

impl<D: NativeDevice> Channel for UsbChannel<D> {
    fn flush(&mut self) -> Result<(), ChannelError> {
        if !self.pending.is_empty() {
            debug!(bytes = self.pending.len(), "Dropping buffered input");
            self.pending.clear();
        }
        self.handle.flush_read()?;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        Ok(self.handle.send(data, self.write_timeout)?)
    }

    fn read_until(
        &mut self,
        delimiter: &[u8],
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ChannelError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = vec![0u8; self.handle.packet_size().max(1)];

        loop {
            if let Some(reply) = self.take_reply(delimiter, max_len) {
                trace!(len = reply.len(), "Reply assembled");
                return Ok(reply);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::timeout(timeout));
            }
            match self.handle.recv(&mut chunk, remaining) {
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(UsbError::Timeout { .. }) => return Err(ChannelError::timeout(timeout)),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
