//! Test doubles for port endpoints and the transport

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{MidiSink, MidiSource};
use crate::error::{MuxError, Result};
use crate::packet::OutputPacket;
use crate::session::Transport;

/// Sink recording every delivery
#[derive(Default)]
pub struct Collector {
    deliveries: Mutex<Vec<Vec<u8>>>,
}

impl Collector {
    /// All delivered bytes, concatenated
    pub fn bytes(&self) -> Vec<u8> {
        self.deliveries.lock().unwrap().concat()
    }

    /// Deliveries in order, one entry per call
    pub fn deliveries(&self) -> Vec<Vec<u8>> {
        self.deliveries.lock().unwrap().clone()
    }
}

impl MidiSink for Collector {
    fn deliver(&self, bytes: &[u8]) {
        self.deliveries.lock().unwrap().push(bytes.to_vec());
    }
}

/// Source replaying a queued byte stream
#[derive(Default)]
pub struct Script {
    pending: Mutex<VecDeque<u8>>,
}

impl Script {
    pub fn with(bytes: &[u8]) -> Self {
        let script = Script::default();
        script.queue(bytes);
        script
    }

    pub fn queue(&self, bytes: &[u8]) {
        self.pending.lock().unwrap().extend(bytes.iter().copied());
    }

    pub fn remaining(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl MidiSource for Script {
    fn pull(&self, buf: &mut [u8]) -> usize {
        let mut pending = self.pending.lock().unwrap();
        let mut count = 0;
        while count < buf.len() {
            match pending.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }
}

/// Transport recording submissions
#[derive(Default)]
pub struct Recorder {
    pub sent: Mutex<Vec<OutputPacket>>,
    pub input_requests: Mutex<usize>,
    pub reject_output: Mutex<bool>,
    pub cancelled: Mutex<bool>,
}

impl Recorder {
    pub fn sent(&self) -> Vec<OutputPacket> {
        self.sent.lock().unwrap().clone()
    }

    pub fn input_requests(&self) -> usize {
        *self.input_requests.lock().unwrap()
    }

    pub fn reject(&self, reject: bool) {
        *self.reject_output.lock().unwrap() = reject;
    }
}

impl Transport for Recorder {
    fn submit_output(&self, packet: &OutputPacket) -> Result<()> {
        if *self.reject_output.lock().unwrap() {
            return Err(MuxError::submit_rejected("endpoint stalled"));
        }
        self.sent.lock().unwrap().push(packet.clone());
        Ok(())
    }

    fn submit_input(&self) -> Result<()> {
        *self.input_requests.lock().unwrap() += 1;
        Ok(())
    }

    fn settle(&self, _timeout: Duration) -> bool {
        true
    }

    fn cancel_all(&self) {
        *self.cancelled.lock().unwrap() = true;
    }
}

/// Seeded linear congruential generator for deterministic sweeps
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 32) as u32
    }

    pub fn next_u8(&mut self) -> u8 {
        (self.next_u32() >> 24) as u8
    }

    /// Uniform-ish value in `0..bound`
    pub fn below(&mut self, bound: usize) -> usize {
        self.next_u32() as usize % bound
    }

    pub fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[self.below(items.len())]
    }
}
