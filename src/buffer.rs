//! Bounded byte buffers and per-port input reassembly state

use crate::error::{MuxError, Result};
use crate::limits::PORT_BUFFER_SIZE;

/// Fixed-capacity byte buffer with checked appends.
///
/// Appends past capacity fail with [`MuxError::BufferFull`] and leave the
/// contents untouched.
#[derive(Clone)]
pub struct BoundedBuffer<const N: usize> {
    data: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedBuffer<N> {
    /// Create an empty buffer
    pub fn new() -> Self {
        BoundedBuffer {
            data: [0; N],
            len: 0,
        }
    }

    /// Append one byte
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= N {
            return Err(MuxError::buffer_full(N));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Append a run of bytes, all or nothing
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(MuxError::buffer_full(N));
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    /// Drop the first `count` bytes, shifting the rest to the front
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.data.copy_within(count..self.len, 0);
        self.len -= count;
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Bytes stored
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fixed capacity
    pub fn capacity(&self) -> usize {
        N
    }

    /// Free space left
    pub fn remaining(&self) -> usize {
        N - self.len
    }

    /// Stored bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl<const N: usize> Default for BoundedBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> std::fmt::Debug for BoundedBuffer<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoundedBuffer({:02X?})", self.as_slice())
    }
}

/// Reassembly state for one input port.
///
/// Bytes up to `deliverable` form complete messages; anything after that is the
/// tail of a message still waiting for its remaining bytes, possibly in a later
/// packet.
#[derive(Debug, Clone, Default)]
pub struct InputAssembly {
    /// Most recent status byte seen, 0 = none
    pub last_command: u8,
    /// Data bytes still expected for the current command
    pub bytes_remaining: usize,
    buffer: BoundedBuffer<PORT_BUFFER_SIZE>,
    deliverable: usize,
}

impl InputAssembly {
    /// Create an empty assembly with no running status
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a byte to the reassembly buffer
    pub fn append(&mut self, byte: u8) -> Result<()> {
        self.buffer.push(byte)
    }

    /// Mark everything buffered so far as complete
    pub fn mark_deliverable(&mut self) {
        self.deliverable = self.buffer.len();
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Length of the complete-message prefix
    pub fn deliverable_len(&self) -> usize {
        self.deliverable
    }

    /// Complete messages ready for the consumer
    pub fn deliverable(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.deliverable]
    }

    /// Everything buffered, complete or not
    pub fn contents(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Drop the delivered prefix, keeping any partial tail
    pub fn flush_deliverable(&mut self) {
        self.buffer.consume(self.deliverable);
        self.deliverable = 0;
    }

    /// Drop all buffered bytes, keeping running status
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.deliverable = 0;
    }

    /// Forget buffered bytes and running status alike
    pub fn reset(&mut self) {
        self.clear();
        self.last_command = 0;
        self.bytes_remaining = 0;
    }
}
