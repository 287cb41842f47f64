//! Protocol 2 framing (micro express, express XT)
//!
//! Inbound packets carry a tagged byte stream after one reserved byte:
//! `F5 <port>` selects the port for the bytes that follow, `FF` is filler and
//! everything else is MIDI data for the selected port. The stream is parsed
//! by one state machine that persists across packets.
//!
//! Outbound packets are built from groups of 12 payload bytes followed by a
//! `01 00` trailer; each 14-byte group travels in its own transport sub-frame:
//!
//! ```text
//! ┌──────────┬──────┬───────────────────────┬─────────┐
//! │ F5 <port>│ prime│ MIDI bytes ... FF pad │ 01 00   │  x up to 4
//! │ (switch) │ (opt)│ 12 slots in total     │ trailer │
//! └──────────┴──────┴───────────────────────┴─────────┘
//! ```

use tracing::{debug, trace, warn};

use crate::buffer::{BoundedBuffer, InputAssembly};
use crate::command::{self, CommandLength, FILLER, PORT_MARKER, SYSEX_END, SYSEX_START};
use crate::core::{Direction, ProtocolVariant};
use crate::engine::{LinkStats, PortTable, ProtocolEngine};
use crate::error::{MuxError, Result};
use crate::fifo::OutputFifo;
use crate::limits::{
    GROUP_SLOTS, GROUP_TRAILER, MAX_SUB_FRAMES, P2_HEADER_LEN, P2_PACKET_SIZE, P2_PULL_LEN,
    RUNNING_STATUS_FALLBACK_LEN, SUB_FRAME_LEN, SWITCH_SLOT_LIMIT,
};
use crate::packet::OutputPacket;

/// Input parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Waiting for a port-select marker
    WaitMarker,
    /// Next byte is the port index
    PortSelect,
    /// Expecting a status byte or running-status data
    Data { port: usize },
    /// Inside a fixed-length message of `expected` bytes
    FixedLen { port: usize, expected: usize },
    /// Inside a system-exclusive span
    SysEx { port: usize },
}

impl DecoderState {
    /// Port the parser is currently filling, if any
    pub fn selected_port(&self) -> Option<usize> {
        match *self {
            DecoderState::Data { port }
            | DecoderState::FixedLen { port, .. }
            | DecoderState::SysEx { port } => Some(port),
            DecoderState::WaitMarker | DecoderState::PortSelect => None,
        }
    }
}

/// Marker-framed encoder/decoder pair
#[derive(Debug)]
pub struct Protocol2Engine {
    inputs: Vec<InputAssembly>,
    state: DecoderState,
    fifos: Vec<OutputFifo>,
    last_output_port: Option<usize>,
}

impl Protocol2Engine {
    /// Create an engine for the given port counts
    pub fn new(input_ports: usize, output_ports: usize) -> Self {
        Protocol2Engine {
            inputs: vec![InputAssembly::new(); input_ports],
            state: DecoderState::WaitMarker,
            fifos: vec![OutputFifo::new(); output_ports],
            last_output_port: None,
        }
    }

    /// Current parser state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Reassembly state of an input port
    pub fn input(&self, port: usize) -> Option<&InputAssembly> {
        self.inputs.get(port)
    }

    /// Output FIFO of a port
    pub fn fifo(&self, port: usize) -> Option<&OutputFifo> {
        self.fifos.get(port)
    }

    /// Port the device was last switched to
    pub fn last_output_port(&self) -> Option<usize> {
        self.last_output_port
    }

    /// Queue bytes for an output port
    pub fn push(&mut self, port: usize, bytes: &[u8]) -> Result<()> {
        let count = self.fifos.len();
        let fifo = self
            .fifos
            .get_mut(port)
            .ok_or_else(|| MuxError::invalid_port(port, Direction::Output, count))?;
        fifo.push(bytes)
    }

    fn step(&mut self, byte: u8, ports: &PortTable, stats: &mut LinkStats) -> Result<DecoderState> {
        let state = self.state;
        let next = match state {
            DecoderState::WaitMarker => {
                if byte == PORT_MARKER {
                    DecoderState::PortSelect
                } else {
                    DecoderState::WaitMarker
                }
            }
            DecoderState::PortSelect => {
                let port = byte as usize;
                let count = self.inputs.len();
                match self.inputs.get_mut(port) {
                    Some(input) => {
                        input.clear();
                        DecoderState::Data { port }
                    }
                    None => {
                        warn!(port, count, "invalid port number, resetting input state");
                        stats.invalid_ports += 1;
                        DecoderState::WaitMarker
                    }
                }
            }
            DecoderState::Data { port } => self.command_byte(port, byte, ports)?,
            DecoderState::FixedLen { port, expected } => {
                let input = &mut self.inputs[port];
                input.append(byte)?;
                if input.len() >= expected {
                    deliver(port, input, ports);
                    DecoderState::Data { port }
                } else {
                    DecoderState::FixedLen { port, expected }
                }
            }
            DecoderState::SysEx { port } => {
                let input = &mut self.inputs[port];
                input.append(byte)?;
                if byte == SYSEX_END {
                    deliver(port, input, ports);
                    DecoderState::Data { port }
                } else {
                    DecoderState::SysEx { port }
                }
            }
        };
        Ok(next)
    }

    fn command_byte(&mut self, port: usize, byte: u8, ports: &PortTable) -> Result<DecoderState> {
        if byte == PORT_MARKER {
            return Ok(DecoderState::PortSelect);
        }

        let input = &mut self.inputs[port];
        let status = if command::is_status(byte) {
            input.last_command = byte;
            byte
        } else if input.last_command != 0 {
            // running status: spell the implied status byte out for the consumer
            let status = input.last_command;
            input.append(status)?;
            status
        } else {
            trace!(port, byte, "data byte without running status, dropped");
            return Ok(DecoderState::Data { port });
        };
        input.append(byte)?;

        if status == SYSEX_START {
            return Ok(DecoderState::SysEx { port });
        }
        let expected = match command::length_of(status) {
            CommandLength::Fixed(len) => len,
            _ => RUNNING_STATUS_FALLBACK_LEN,
        };
        if input.len() >= expected {
            deliver(port, input, ports);
            Ok(DecoderState::Data { port })
        } else {
            Ok(DecoderState::FixedLen { port, expected })
        }
    }

    fn refill(&mut self, ports: &PortTable, stats: &mut LinkStats) {
        for (port, fifo) in self.fifos.iter_mut().enumerate() {
            let mut buf = [0u8; P2_PULL_LEN];
            let want = P2_PULL_LEN.min(fifo.free());
            let len = ports.pull(port, &mut buf[..want]);
            if len > 0 {
                if let Err(err) = fifo.push(&buf[..len]) {
                    warn!(port, %err, "FIFO overflow, dropping data");
                    stats.overflows += 1;
                }
            }
            if fifo.release_if_stalled() {
                debug!(port, "FIFO full without a complete message, releasing it");
            }
        }
    }

    fn pack(&mut self, out: &mut BoundedBuffer<P2_PACKET_SIZE>, slot: &mut usize) -> Result<()> {
        for port in 0..self.fifos.len() {
            while self.fifos[port].sendable_len() > 0 {
                if out.remaining() == 0 {
                    return Ok(());
                }
                let fifo = &mut self.fifos[port];
                if self.last_output_port != Some(port) {
                    if *slot < SWITCH_SLOT_LIMIT {
                        out.extend_from_slice(&[PORT_MARKER, port as u8])?;
                        *slot += 2;
                        self.last_output_port = Some(port);
                        let prime = fifo.last_command();
                        if fifo.peek().is_some_and(|next| !command::is_status(next)) && prime != 0 {
                            out.push(prime)?;
                            *slot += 1;
                        }
                    } else {
                        // a switch never straddles two groups
                        while *slot < GROUP_SLOTS {
                            out.push(FILLER)?;
                            *slot += 1;
                        }
                    }
                } else if let Some(byte) = fifo.peek() {
                    out.push(byte)?;
                    fifo.pop();
                    if command::is_status(byte) {
                        fifo.set_last_command(byte);
                    }
                    *slot += 1;
                }
                if *slot == GROUP_SLOTS {
                    out.extend_from_slice(&GROUP_TRAILER)?;
                    *slot = 0;
                }
            }
        }
        Ok(())
    }
}

fn deliver(port: usize, input: &mut InputAssembly, ports: &PortTable) {
    trace!(port, "delivering: {:02X?}", input.contents());
    ports.deliver(port, input.contents());
    input.clear();
}

fn finish_group(out: &mut BoundedBuffer<P2_PACKET_SIZE>, slot: usize) -> Result<()> {
    for _ in slot..GROUP_SLOTS {
        out.push(FILLER)?;
    }
    out.extend_from_slice(&GROUP_TRAILER)
}

impl ProtocolEngine for Protocol2Engine {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Protocol2
    }

    fn decode(&mut self, packet: &[u8], ports: &PortTable, stats: &mut LinkStats) {
        trace!("received from device: {:02X?}", packet);
        if packet.is_empty() {
            return;
        }
        stats.packets_received += 1;

        for &byte in packet.iter().skip(P2_HEADER_LEN) {
            if byte == FILLER {
                continue;
            }
            let port = self.state.selected_port();
            self.state = match self.step(byte, ports, stats) {
                Ok(next) => next,
                Err(err) => {
                    warn!(?port, %err, "input buffer overflow, dropping data");
                    stats.overflows += 1;
                    if let Some(input) = port.and_then(|port| self.inputs.get_mut(port)) {
                        input.clear();
                    }
                    DecoderState::WaitMarker
                }
            };
        }
    }

    fn encode(&mut self, ports: &PortTable, stats: &mut LinkStats) -> Option<OutputPacket> {
        self.refill(ports, stats);

        let mut out = BoundedBuffer::<P2_PACKET_SIZE>::new();
        let mut slot = 0;
        if let Err(err) = self.pack(&mut out, &mut slot) {
            debug!(%err, "output packet full, deferring remaining data");
        }
        if out.is_empty() {
            return None;
        }
        if slot > 0 {
            if let Err(err) = finish_group(&mut out, slot) {
                debug!(%err, "no room to close the last group");
            }
        }

        trace!("sending to device: {:02X?}", out.as_slice());
        Some(OutputPacket::framed(
            out.as_slice(),
            SUB_FRAME_LEN,
            MAX_SUB_FRAMES,
        ))
    }
}
