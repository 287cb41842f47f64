//! Per-port output FIFO for protocol 2
//!
//! The packer may only emit whole messages, so the FIFO tracks how much of its
//! contents forms complete messages (`sendable`) as bytes are pushed in.

use crate::command::{self, SYSEX_END, SYSEX_START};
use crate::error::{MuxError, Result};
use crate::limits::FIFO_SIZE;

/// Circular byte queue for one output port
#[derive(Debug, Clone)]
pub struct OutputFifo {
    buf: [u8; FIFO_SIZE],
    read: usize,
    write: usize,
    len: usize,
    sendable: usize,
    last_command: u8,
    span_len: usize,
    remaining: usize,
}

impl OutputFifo {
    /// Create an empty FIFO
    pub fn new() -> Self {
        OutputFifo {
            buf: [0; FIFO_SIZE],
            read: 0,
            write: 0,
            len: 0,
            sendable: 0,
            last_command: 0,
            span_len: 0,
            remaining: 0,
        }
    }

    /// Queue bytes from the producer.
    ///
    /// Stops at the first byte that does not fit; that byte and the rest of the
    /// call are dropped and `BufferFull` is returned.
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        for &byte in bytes {
            if self.len >= FIFO_SIZE {
                return Err(MuxError::buffer_full(FIFO_SIZE));
            }
            self.buf[self.write] = byte;
            self.write = (self.write + 1) % FIFO_SIZE;
            self.len += 1;
            self.track(byte);
        }
        Ok(())
    }

    fn track(&mut self, byte: u8) {
        if command::is_status(byte) {
            match byte {
                SYSEX_START => self.span_len = 0,
                SYSEX_END => {
                    self.span_len = 0;
                    self.sendable = self.len;
                }
                _ => {
                    self.span_len = command::length_of(byte).data_bytes().unwrap_or(0);
                    self.remaining = self.span_len;
                    if self.span_len == 0 {
                        self.sendable = self.len;
                    }
                }
            }
        } else if self.span_len > 0 {
            // running status: a new data group for the same command
            if self.remaining == 0 {
                self.remaining = self.span_len;
            }
            self.remaining -= 1;
            if self.remaining == 0 {
                self.sendable = self.len;
            }
        }
    }

    /// Next byte to go out, if any
    pub fn peek(&self) -> Option<u8> {
        if self.len == 0 {
            None
        } else {
            Some(self.buf[self.read])
        }
    }

    /// Take the next sendable byte
    pub fn pop(&mut self) -> Option<u8> {
        if self.sendable == 0 {
            return None;
        }
        let byte = self.buf[self.read];
        self.read = (self.read + 1) % FIFO_SIZE;
        self.len -= 1;
        self.sendable -= 1;
        Some(byte)
    }

    /// Release a full FIFO holding no complete message.
    ///
    /// A system-exclusive longer than the FIFO can never complete inside it;
    /// letting what is buffered go out keeps the port from stalling forever.
    /// Returns true when bytes were released.
    pub fn release_if_stalled(&mut self) -> bool {
        if self.len == FIFO_SIZE && self.sendable == 0 {
            self.sendable = self.len;
            return true;
        }
        false
    }

    /// Bytes queued
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes forming complete messages
    pub fn sendable_len(&self) -> usize {
        self.sendable
    }

    /// Free space
    pub fn free(&self) -> usize {
        FIFO_SIZE - self.len
    }

    /// Last status byte sent from this FIFO, 0 = none
    pub fn last_command(&self) -> u8 {
        self.last_command
    }

    /// Record the last status byte sent on this port
    pub fn set_last_command(&mut self, byte: u8) {
        self.last_command = byte;
    }
}

impl Default for OutputFifo {
    fn default() -> Self {
        Self::new()
    }
}
