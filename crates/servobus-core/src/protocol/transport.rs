//! Byte transport abstraction
//!
//! The protocol engine only needs two things from the wire: push a block of
//! bytes out, and poll for the next inbound byte. Timeouts are owned by the
//! engine, not by the transport.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::{ProtocolError, ResponseField};

/// Half-duplex byte channel to the servo bus
pub trait ByteTransport {
    /// Write every byte of `data` to the bus
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError>;

    /// Poll for one inbound byte; `Ok(None)` means no data yet
    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError>;

    /// Drop any inbound bytes that are already buffered
    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

impl<T: ByteTransport + ?Sized> ByteTransport for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        (**self).write_all(data)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        (**self).read_byte()
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        (**self).clear_input()
    }
}

impl<T: ByteTransport + ?Sized> ByteTransport for &mut T {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        (**self).write_all(data)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        (**self).read_byte()
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        (**self).clear_input()
    }
}

/// Reads bytes against a single deadline measured from construction
///
/// The budget covers the whole response, so a slow trickle of bytes cannot
/// extend it.
pub struct TimedReader<'a, T: ByteTransport + ?Sized> {
    transport: &'a mut T,
    started: Instant,
    timeout: Duration,
    poll_interval: Duration,
    consumed: usize,
}

impl<'a, T: ByteTransport + ?Sized> TimedReader<'a, T> {
    /// Start the clock for one response
    pub fn new(transport: &'a mut T, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            transport,
            started: Instant::now(),
            timeout,
            poll_interval,
            consumed: 0,
        }
    }

    /// Wait for the next byte, failing with a timeout tagged by `field`
    pub fn next_byte(&mut self, field: ResponseField) -> Result<u8, ProtocolError> {
        loop {
            if let Some(byte) = self.transport.read_byte()? {
                self.consumed += 1;
                return Ok(byte);
            }
            if self.started.elapsed() >= self.timeout {
                return Err(ProtocolError::Timeout { during: field });
            }
            if !self.poll_interval.is_zero() {
                std::thread::sleep(self.poll_interval);
            }
        }
    }

    /// Number of bytes taken from the transport so far
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Time spent since the reader was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// In-memory transport with scripted replies
///
/// Bytes pushed with [`MemoryTransport::push_inbound`] are readable
/// immediately (and are dropped by `clear_input`, like stale bytes on a real
/// port). Replies queued with [`MemoryTransport::queue_reply`] become readable
/// one at a time, each released by the next write.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    writes: usize,
    fail_writes: bool,
}

impl MemoryTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport whose first write releases `reply`
    pub fn with_reply(reply: Vec<u8>) -> Self {
        let mut transport = Self::new();
        transport.queue_reply(reply);
        transport
    }

    /// Make bytes readable right away
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Queue bytes that arrive after the next write
    pub fn queue_reply(&mut self, bytes: Vec<u8>) {
        self.replies.push_back(bytes);
    }

    /// Make every write fail with a serial error
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Every byte written so far
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Take the written bytes, leaving the log empty
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }

    /// Number of successful `write_all` calls
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Inbound bytes not yet read
    pub fn remaining(&self) -> Vec<u8> {
        self.inbound.iter().copied().collect()
    }
}

impl ByteTransport for MemoryTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.fail_writes {
            return Err(ProtocolError::SerialError("write failed".to_string()));
        }
        self.written.extend_from_slice(data);
        self.writes += 1;
        if let Some(reply) = self.replies.pop_front() {
            self.inbound.extend(reply);
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        Ok(self.inbound.pop_front())
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.inbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_released_by_write() {
        let mut transport = MemoryTransport::with_reply(vec![0xAB]);
        assert_eq!(transport.read_byte().unwrap(), None);

        transport.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(transport.read_byte().unwrap(), Some(0xAB));
        assert_eq!(transport.written(), &[1, 2, 3]);
    }

    #[test]
    fn test_clear_input_drops_stale_bytes() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(&[9, 9]);
        transport.clear_input().unwrap();
        assert!(transport.remaining().is_empty());
    }

    #[test]
    fn test_write_failure() {
        let mut transport = MemoryTransport::new();
        transport.set_fail_writes(true);
        assert!(transport.write_all(b"test").is_err());
        assert!(transport.written().is_empty());
    }

    #[test]
    fn test_timed_reader_times_out_on_empty_input() {
        let mut transport = MemoryTransport::new();
        let mut reader =
            TimedReader::new(&mut transport, Duration::from_millis(5), Duration::from_millis(1));
        let err = reader.next_byte(ResponseField::Length).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Timeout {
                during: ResponseField::Length
            }
        ));
        assert!(reader.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_timed_reader_counts_bytes() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(&[1, 2]);
        let mut reader = TimedReader::new(&mut transport, Duration::ZERO, Duration::ZERO);
        assert_eq!(reader.next_byte(ResponseField::HeaderFirst).unwrap(), 1);
        assert_eq!(reader.next_byte(ResponseField::HeaderSecond).unwrap(), 2);
        assert_eq!(reader.consumed(), 2);
    }
}
