//! Protocol 1 framing (express 128, micro lite)
//!
//! Packet layout, both directions:
//!
//! ```text
//! ┌─────────┬──────────┬──────┬──────────────────┬──────┬─────┐
//! │ seq (1) │ 0x00 (1) │ mask │ one byte per set │ mask │ ... │
//! │         │ reserved │      │ bit, port order  │      │     │
//! └─────────┴──────────┴──────┴──────────────────┴──────┴─────┘
//! ```
//!
//! Bit `p` of a mask byte means port `p` has one byte in the run that
//! follows. A zero mask ends the payload; outgoing packets carry two of them.

use tracing::{trace, warn};

use crate::buffer::{BoundedBuffer, InputAssembly};
use crate::command::{self, CommandLength};
use crate::core::ProtocolVariant;
use crate::engine::{LinkStats, PortTable, ProtocolEngine};
use crate::error::Result;
use crate::limits::{P1_HEADER_LEN, P1_MAX_PORTS, P1_BYTES_PER_PORT, TRANSFER_SIZE};
use crate::packet::OutputPacket;

/// Bitmask-framed encoder/decoder pair
#[derive(Debug)]
pub struct Protocol1Engine {
    inputs: Vec<InputAssembly>,
    output_ports: usize,
    counter: u8,
}

impl Protocol1Engine {
    /// Create an engine for the given port counts (clamped to the 8 mask bits)
    pub fn new(input_ports: usize, output_ports: usize) -> Self {
        Protocol1Engine {
            inputs: vec![InputAssembly::new(); input_ports.min(P1_MAX_PORTS)],
            output_ports: output_ports.min(P1_MAX_PORTS),
            counter: 0,
        }
    }

    /// Reassembly state of an input port
    pub fn input(&self, port: usize) -> Option<&InputAssembly> {
        self.inputs.get(port)
    }

    fn write_byte(&mut self, port: usize, byte: u8, stats: &mut LinkStats) {
        let Some(input) = self.inputs.get_mut(port) else {
            trace!(port, byte, "byte for unused input port");
            return;
        };
        if let Err(err) = append_and_classify(input, byte) {
            warn!(port, %err, "input buffer overflow, dropping data");
            stats.overflows += 1;
            input.reset();
        }
    }

    fn build_packet(&mut self, ports: &PortTable) -> Result<Option<BoundedBuffer<TRANSFER_SIZE>>> {
        let mut pending = [[0u8; P1_BYTES_PER_PORT]; P1_MAX_PORTS];
        let mut lens = [0usize; P1_MAX_PORTS];
        for port in 0..self.output_ports {
            lens[port] = ports.pull(port, &mut pending[port]);
        }

        let mut out = BoundedBuffer::new();
        out.push(self.counter)?;
        out.push(0)?;
        self.counter = self.counter.wrapping_add(1);

        for offset in 0..P1_BYTES_PER_PORT {
            let mask = (0..self.output_ports)
                .filter(|&port| lens[port] > offset)
                .fold(0u8, |mask, port| mask | (1u8 << port));
            if mask == 0 {
                break;
            }
            out.push(mask)?;
            for port in (0..self.output_ports).filter(|&port| lens[port] > offset) {
                out.push(pending[port][offset])?;
            }
        }

        if out.len() <= P1_HEADER_LEN {
            return Ok(None);
        }
        out.extend_from_slice(&[0, 0])?;
        Ok(Some(out))
    }
}

/// Append one byte to a port, re-inserting the status byte for running-status
/// data and tracking where the last complete message ends.
fn append_and_classify(input: &mut InputAssembly, byte: u8) -> Result<()> {
    match command::length_of(byte) {
        CommandLength::Fixed(1) => {
            input.last_command = 0;
            input.bytes_remaining = 0;
            input.append(byte)?;
            input.mark_deliverable();
        }
        CommandLength::Fixed(len) => {
            input.last_command = byte;
            input.bytes_remaining = len - 1;
            input.mark_deliverable();
            input.append(byte)?;
        }
        CommandLength::Variable => {
            // system-exclusive: passed through as-is, no running status
            input.last_command = 0;
            input.bytes_remaining = 0;
            input.append(byte)?;
            input.mark_deliverable();
        }
        CommandLength::NotACommand if input.last_command != 0 => {
            if input.bytes_remaining == 0 {
                let status = input.last_command;
                input.mark_deliverable();
                input.append(status)?;
                input.bytes_remaining = command::length_of(status).data_bytes().unwrap_or(1);
            }
            input.bytes_remaining = input.bytes_remaining.saturating_sub(1);
            input.append(byte)?;
            if input.bytes_remaining == 0 {
                input.mark_deliverable();
            }
        }
        CommandLength::NotACommand => {
            input.append(byte)?;
            input.mark_deliverable();
        }
    }
    Ok(())
}

impl ProtocolEngine for Protocol1Engine {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::Protocol1
    }

    fn decode(&mut self, packet: &[u8], ports: &PortTable, stats: &mut LinkStats) {
        trace!("received from device: {:02X?}", packet);
        if packet.len() < P1_HEADER_LEN {
            return;
        }
        stats.packets_received += 1;

        let mut mask = 0u8;
        for &byte in &packet[P1_HEADER_LEN..] {
            if mask == 0 {
                mask = byte;
                continue;
            }
            let port = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            self.write_byte(port, byte, stats);
        }

        for (port, input) in self.inputs.iter_mut().enumerate() {
            if input.deliverable_len() > 0 {
                trace!(port, "delivering: {:02X?}", input.deliverable());
                ports.deliver(port, input.deliverable());
                input.flush_deliverable();
            }
        }
    }

    fn encode(&mut self, ports: &PortTable, stats: &mut LinkStats) -> Option<OutputPacket> {
        match self.build_packet(ports) {
            Ok(Some(out)) => {
                trace!("sending to device: {:02X?}", out.as_slice());
                Some(OutputPacket::single(out.as_slice()))
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "output packet overflow, dropping packet");
                stats.overflows += 1;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Port;
    use crate::limits::PORT_BUFFER_SIZE;
    use crate::testutil::{Collector, Lcg, Script};
    use std::sync::Arc;

    fn collectors(ports: &PortTable, count: usize) -> Result<Vec<Arc<Collector>>> {
        let mut sinks = Vec::new();
        for index in 0..count {
            let sink = Arc::new(Collector::default());
            ports.attach_input(Port::new(index as u8)?, sink.clone())?;
            sinks.push(sink);
        }
        Ok(sinks)
    }

    fn scripts(ports: &PortTable, streams: &[&[u8]]) -> Result<Vec<Arc<Script>>> {
        let mut sources = Vec::new();
        for (index, stream) in streams.iter().enumerate() {
            let source = Arc::new(Script::with(stream));
            ports.attach_output(Port::new(index as u8)?, source.clone())?;
            sources.push(source);
        }
        Ok(sources)
    }

    #[test]
    fn test_decode_single_note() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let sinks = collectors(&ports, 1)?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        engine.decode(
            &[0x07, 0x00, 0x01, 0x90, 0x01, 0x40, 0x01, 0x7F, 0x00, 0x00],
            &ports,
            &mut stats,
        );

        assert_eq!(sinks[0].deliveries(), vec![vec![0x90, 0x40, 0x7F]]);
        assert_eq!(stats.packets_received, 1);
        Ok(())
    }

    #[test]
    fn test_decode_interleaved_ports() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let sinks = collectors(&ports, 3)?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        let packet = [
            0x00, 0x00, 0x05, 0x90, 0x80, 0x05, 0x40, 0x41, 0x05, 0x7F, 0x00, 0x00, 0x00,
        ];
        engine.decode(&packet, &ports, &mut stats);

        assert_eq!(sinks[0].bytes(), vec![0x90, 0x40, 0x7F]);
        assert!(sinks[1].bytes().is_empty());
        assert_eq!(sinks[2].bytes(), vec![0x80, 0x41, 0x00]);
        Ok(())
    }

    #[test]
    fn test_decode_expands_running_status() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let sinks = collectors(&ports, 1)?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        let mut packet = vec![0x00, 0x00];
        for byte in [0x90, 0x40, 0x7F, 0x41, 0x7F, 0x42] {
            packet.extend_from_slice(&[0x01, byte]);
        }
        engine.decode(&packet, &ports, &mut stats);

        assert_eq!(sinks[0].bytes(), vec![0x90, 0x40, 0x7F, 0x90, 0x41, 0x7F]);
        // the third note is still missing its velocity
        let input = engine.input(0).unwrap();
        assert_eq!(input.contents(), &[0x90, 0x42]);
        assert_eq!(input.deliverable_len(), 0);
        Ok(())
    }

    #[test]
    fn test_message_split_across_packets() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let sinks = collectors(&ports, 2)?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        engine.decode(&[0x00, 0x00, 0x02, 0xB0, 0x02, 0x07], &ports, &mut stats);
        assert!(sinks[1].deliveries().is_empty());

        engine.decode(&[0x01, 0x00, 0x02, 0x64], &ports, &mut stats);
        assert_eq!(sinks[1].deliveries(), vec![vec![0xB0, 0x07, 0x64]]);
        Ok(())
    }

    #[test]
    fn test_short_packet_ignored() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let sinks = collectors(&ports, 1)?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        engine.decode(&[0x01], &ports, &mut stats);
        engine.decode(&[0x01, 0x00, 0x00, 0x00], &ports, &mut stats);

        assert!(sinks[0].deliveries().is_empty());
        assert_eq!(stats.packets_received, 1);
        Ok(())
    }

    #[test]
    fn test_overflow_reported_once() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let sinks = collectors(&ports, 1)?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        let mut packet = vec![0x00, 0x00, 0x01, 0xF0];
        for byte in 0..70u8 {
            packet.extend_from_slice(&[0x01, byte]);
        }
        engine.decode(&packet, &ports, &mut stats);

        assert_eq!(stats.overflows, 1);
        // everything up to the overflow was dropped with the reset
        assert_eq!(sinks[0].bytes(), vec![64, 65, 66, 67, 68, 69]);
        let input = engine.input(0).unwrap();
        assert!(input.deliverable_len() <= input.len());
        assert!(input.is_empty());
        Ok(())
    }

    #[test]
    fn test_encode_nothing_pending() {
        let ports = PortTable::new(8, 8);
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();
        assert!(engine.encode(&ports, &mut stats).is_none());
    }

    #[test]
    fn test_encode_layout() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let streams: [&[u8]; 3] = [&[0x90, 0x40, 0x7F], &[], &[0xC0, 0x05]];
        let _sources = scripts(&ports, &streams)?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        let packet = engine.encode(&ports, &mut stats).unwrap();
        assert_eq!(
            packet.payload(),
            &[0x00, 0x00, 0x05, 0x90, 0xC0, 0x05, 0x40, 0x05, 0x01, 0x7F, 0x00, 0x00]
        );
        assert_eq!(packet.frames().len(), 1);
        Ok(())
    }

    #[test]
    fn test_encode_sequence_counter() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let source = Arc::new(Script::default());
        ports.attach_output(Port::new(0)?, source.clone())?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        source.queue(&[0xF8]);
        assert_eq!(engine.encode(&ports, &mut stats).unwrap().payload()[0], 0);
        assert!(engine.encode(&ports, &mut stats).is_none());
        source.queue(&[0xF8]);
        assert_eq!(engine.encode(&ports, &mut stats).unwrap().payload()[0], 2);
        Ok(())
    }

    #[test]
    fn test_encode_pulls_three_bytes_per_port() -> Result<()> {
        let ports = PortTable::new(8, 8);
        let sources = scripts(&ports, &[&[0x90, 0x40, 0x7F, 0x80, 0x40, 0x00][..]])?;
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();

        engine.encode(&ports, &mut stats).unwrap();
        assert_eq!(sources[0].remaining(), 3);
        Ok(())
    }

    #[test]
    fn test_loopback_preserves_streams() -> Result<()> {
        let streams: [&[u8]; 5] = [
            &[0x90, 0x40, 0x7F, 0x80, 0x40, 0x00],
            &[0xF0, 0x7E, 0x00, 0x09, 0x01, 0xF7],
            &[],
            &[0xC3, 0x11, 0xE0, 0x00, 0x40, 0xF8, 0xB0, 0x07, 0x64],
            &[0xD2, 0x30],
        ];
        let out_ports = PortTable::new(8, 8);
        let in_ports = PortTable::new(8, 8);
        let _sources = scripts(&out_ports, &streams)?;
        let sinks = collectors(&in_ports, streams.len())?;

        let mut tx = Protocol1Engine::new(8, 8);
        let mut rx = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();
        while let Some(packet) = tx.encode(&out_ports, &mut stats) {
            rx.decode(packet.payload(), &in_ports, &mut stats);
        }

        for (sink, stream) in sinks.iter().zip(streams.iter()) {
            assert_eq!(&sink.bytes()[..], *stream);
        }
        Ok(())
    }

    #[test]
    fn test_loopback_running_status_is_expanded() -> Result<()> {
        let out_ports = PortTable::new(8, 8);
        let in_ports = PortTable::new(8, 8);
        let _sources = scripts(&out_ports, &[&[0x90, 0x3C, 0x40, 0x3E, 0x40, 0x40, 0x40][..]])?;
        let sinks = collectors(&in_ports, 1)?;

        let mut tx = Protocol1Engine::new(8, 8);
        let mut rx = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();
        while let Some(packet) = tx.encode(&out_ports, &mut stats) {
            rx.decode(packet.payload(), &in_ports, &mut stats);
        }

        assert_eq!(
            sinks[0].bytes(),
            vec![0x90, 0x3C, 0x40, 0x90, 0x3E, 0x40, 0x90, 0x40, 0x40]
        );
        Ok(())
    }

    /// Random well-formed stream: wire bytes (with running status) and the
    /// bytes a consumer should receive (running status spelled out)
    fn command_stream(rng: &mut Lcg, messages: usize) -> (Vec<u8>, Vec<u8>) {
        let mut wire = Vec::new();
        let mut expanded = Vec::new();
        let mut running: Option<(u8, usize)> = None;
        for _ in 0..messages {
            match rng.below(7) {
                0 | 1 => {
                    let status = rng.pick(&[0x80, 0x90, 0xA0, 0xB0, 0xE0]) | rng.below(16) as u8;
                    let data = [rng.below(128) as u8, rng.below(128) as u8];
                    wire.push(status);
                    wire.extend_from_slice(&data);
                    expanded.push(status);
                    expanded.extend_from_slice(&data);
                    running = Some((status, 2));
                }
                2 => {
                    let status = rng.pick(&[0xC0, 0xD0]) | rng.below(16) as u8;
                    let data = rng.below(128) as u8;
                    wire.extend_from_slice(&[status, data]);
                    expanded.extend_from_slice(&[status, data]);
                    running = Some((status, 1));
                }
                3 | 4 => {
                    if let Some((status, len)) = running {
                        expanded.push(status);
                        for _ in 0..len {
                            let data = rng.below(128) as u8;
                            wire.push(data);
                            expanded.push(data);
                        }
                    }
                }
                5 => {
                    let mut message = vec![0xF0];
                    for _ in 0..rng.below(12) {
                        message.push(rng.below(128) as u8);
                    }
                    message.push(0xF7);
                    wire.extend_from_slice(&message);
                    expanded.extend_from_slice(&message);
                    running = None;
                }
                _ => {
                    let message = match rng.below(3) {
                        0 => vec![0xF8],
                        1 => vec![0xFE],
                        _ => vec![0xF3, rng.below(128) as u8],
                    };
                    wire.extend_from_slice(&message);
                    expanded.extend_from_slice(&message);
                    running = None;
                }
            }
        }
        (wire, expanded)
    }

    #[test]
    fn test_decode_keeps_assembly_bounded() {
        let ports = PortTable::new(8, 8);
        let mut engine = Protocol1Engine::new(8, 8);
        let mut stats = LinkStats::default();
        let mut rng = Lcg::new(0x5EED_0001);

        for _ in 0..2000 {
            let len = rng.below(TRANSFER_SIZE + 1);
            let packet: Vec<u8> = (0..len).map(|_| rng.next_u8()).collect();
            engine.decode(&packet, &ports, &mut stats);
            for port in 0..8 {
                let input = engine.input(port).unwrap();
                assert!(input.deliverable_len() <= input.len());
                assert!(input.len() <= PORT_BUFFER_SIZE);
            }
        }
    }

    #[test]
    fn test_loopback_random_streams() -> Result<()> {
        let mut rng = Lcg::new(0x5EED_0002);
        for _ in 0..200 {
            let count = 1 + rng.below(8);
            let streams: Vec<(Vec<u8>, Vec<u8>)> = (0..count)
                .map(|_| {
                    let messages = rng.below(40);
                    command_stream(&mut rng, messages)
                })
                .collect();
            let wire: Vec<&[u8]> = streams.iter().map(|(wire, _)| &wire[..]).collect();

            let out_ports = PortTable::new(8, 8);
            let in_ports = PortTable::new(8, 8);
            let _sources = scripts(&out_ports, &wire)?;
            let sinks = collectors(&in_ports, count)?;

            let mut tx = Protocol1Engine::new(8, 8);
            let mut rx = Protocol1Engine::new(8, 8);
            let mut stats = LinkStats::default();
            while let Some(packet) = tx.encode(&out_ports, &mut stats) {
                rx.decode(packet.payload(), &in_ports, &mut stats);
            }

            for (sink, (_, expanded)) in sinks.iter().zip(streams.iter()) {
                assert_eq!(&sink.bytes(), expanded);
            }
            assert_eq!(stats.overflows, 0);
        }
        Ok(())
    }
}
