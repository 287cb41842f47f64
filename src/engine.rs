//! Protocol engine interface and the per-port consumer/producer table

use std::sync::{Arc, RwLock};

use crate::core::{DeviceFamily, Direction, Port, ProtocolVariant};
use crate::error::{MuxError, Result};
use crate::packet::OutputPacket;
use crate::protocol1::Protocol1Engine;
use crate::protocol2::Protocol2Engine;

/// Receives decoded MIDI bytes for one input port.
///
/// Called from the decode path while the session holds its lock; an
/// implementation must not call back into the session (for example to
/// trigger output) or it deadlocks. Hand the bytes off to another thread
/// or queue instead.
pub trait MidiSink: Send + Sync {
    /// Hand over one or more complete messages
    fn deliver(&self, bytes: &[u8]);
}

impl<F> MidiSink for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn deliver(&self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Supplies raw MIDI bytes for one output port
pub trait MidiSource: Send + Sync {
    /// Fill `buf` with up to `buf.len()` pending bytes, returning the count.
    /// Zero means nothing is pending.
    fn pull(&self, buf: &mut [u8]) -> usize;
}

type SinkSlot = RwLock<Option<Arc<dyn MidiSink>>>;
type SourceSlot = RwLock<Option<Arc<dyn MidiSource>>>;

/// Registered consumers and producers, one slot per port.
///
/// Registration can change while a packet is being decoded or encoded, so every
/// access takes a snapshot of the slot rather than holding it.
pub struct PortTable {
    sinks: Vec<SinkSlot>,
    sources: Vec<SourceSlot>,
}

impl PortTable {
    /// Create an empty table for the given port counts
    pub fn new(inputs: usize, outputs: usize) -> Self {
        PortTable {
            sinks: (0..inputs).map(|_| RwLock::new(None)).collect(),
            sources: (0..outputs).map(|_| RwLock::new(None)).collect(),
        }
    }

    /// Table sized for a device family
    pub fn for_family(family: DeviceFamily) -> Self {
        Self::new(family.input_ports(), family.output_ports())
    }

    /// Number of input ports
    pub fn input_count(&self) -> usize {
        self.sinks.len()
    }

    /// Number of output ports
    pub fn output_count(&self) -> usize {
        self.sources.len()
    }

    /// Register the consumer for an input port
    pub fn attach_input(&self, port: Port, sink: Arc<dyn MidiSink>) -> Result<()> {
        let slot = self.input_slot(port)?;
        if let Ok(mut guard) = slot.write() {
            *guard = Some(sink);
        }
        Ok(())
    }

    /// Remove the consumer for an input port
    pub fn detach_input(&self, port: Port) -> Result<()> {
        let slot = self.input_slot(port)?;
        if let Ok(mut guard) = slot.write() {
            *guard = None;
        }
        Ok(())
    }

    /// Register the producer for an output port
    pub fn attach_output(&self, port: Port, source: Arc<dyn MidiSource>) -> Result<()> {
        let slot = self.output_slot(port)?;
        if let Ok(mut guard) = slot.write() {
            *guard = Some(source);
        }
        Ok(())
    }

    /// Remove the producer for an output port
    pub fn detach_output(&self, port: Port) -> Result<()> {
        let slot = self.output_slot(port)?;
        if let Ok(mut guard) = slot.write() {
            *guard = None;
        }
        Ok(())
    }

    /// Deliver bytes to an input port's consumer; dropped if none is registered
    pub fn deliver(&self, port: usize, bytes: &[u8]) {
        let sink = self
            .sinks
            .get(port)
            .and_then(|slot| slot.read().ok().and_then(|guard| guard.clone()));
        if let Some(sink) = sink {
            sink.deliver(bytes);
        }
    }

    /// Pull pending bytes from an output port's producer; 0 if none is registered
    pub fn pull(&self, port: usize, buf: &mut [u8]) -> usize {
        let source = self
            .sources
            .get(port)
            .and_then(|slot| slot.read().ok().and_then(|guard| guard.clone()));
        match source {
            Some(source) => source.pull(buf).min(buf.len()),
            None => 0,
        }
    }

    fn input_slot(&self, port: Port) -> Result<&SinkSlot> {
        self.sinks
            .get(port.index())
            .ok_or_else(|| MuxError::invalid_port(port.index(), Direction::Input, self.sinks.len()))
    }

    fn output_slot(&self, port: Port) -> Result<&SourceSlot> {
        self.sources.get(port.index()).ok_or_else(|| {
            MuxError::invalid_port(port.index(), Direction::Output, self.sources.len())
        })
    }
}

/// Link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkStats {
    /// Inbound packets decoded
    pub packets_received: u64,
    /// Outbound packets accepted by the transport
    pub packets_sent: u64,
    /// Bytes dropped because a port buffer or FIFO was full
    pub overflows: u64,
    /// Port-select markers naming a port the device does not have
    pub invalid_ports: u64,
    /// Submissions the transport rejected
    pub submit_failures: u64,
    /// Completions reporting a transfer error
    pub transfer_errors: u64,
}

/// Encoder/decoder pair for one framing variant.
///
/// `decode` runs once per received packet; `encode` runs once per transmit
/// opportunity and yields at most one packet.
pub trait ProtocolEngine: Send {
    /// Framing variant implemented
    fn variant(&self) -> ProtocolVariant;

    /// Demultiplex one inbound packet to the port consumers
    fn decode(&mut self, packet: &[u8], ports: &PortTable, stats: &mut LinkStats);

    /// Multiplex pending producer data into one packet, if there is any
    fn encode(&mut self, ports: &PortTable, stats: &mut LinkStats) -> Option<OutputPacket>;
}

/// Build the engine matching a device family
pub fn engine_for(family: DeviceFamily) -> Box<dyn ProtocolEngine> {
    match family.variant() {
        ProtocolVariant::Protocol1 => Box::new(Protocol1Engine::new(
            family.input_ports(),
            family.output_ports(),
        )),
        ProtocolVariant::Protocol2 => Box::new(Protocol2Engine::new(
            family.input_ports(),
            family.output_ports(),
        )),
    }
}
