//! # Multi-port MIDI packet multiplexer
//!
//! Encoders and decoders for the packet framing used by multi-port USB MIDI
//! interfaces, which carry up to nine independent MIDI streams over a single
//! fixed-size packet transport.
//!
//! Two incompatible framings exist, selected by device family:
//!
//! - Protocol 1 (express 128, micro lite): per-byte port bitmasks
//! - Protocol 2 (micro express, express XT): port-select markers, filler
//!   bytes and 12-byte groups split across isochronous sub-frames
//!
//! The crate performs no I/O. A [`Session`] turns completion notifications from
//! a [`Transport`] into decode calls and transmit attempts, and moves bytes
//! between packets and per-port [`MidiSink`]/[`MidiSource`] endpoints.
//!
//! ## Features
//!
//! - `serde`: Enable serialization/deserialization support
//!
//! ## Example
//!
//! ```
//! use midi_mux::{DeviceFamily, LinkStats, PortTable, ProtocolEngine, Protocol2Engine};
//!
//! let ports = PortTable::for_family(DeviceFamily::MicroExpress);
//! let mut engine = Protocol2Engine::new(5, 7);
//! let mut stats = LinkStats::default();
//!
//! engine.push(0, &[0x90, 0x40, 0x7F])?;
//! let packet = engine.encode(&ports, &mut stats).expect("one complete message queued");
//! assert_eq!(&packet.payload()[..5], &[0xF5, 0x00, 0x90, 0x40, 0x7F]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod buffer;
pub mod command;
pub mod core;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod packet;
pub mod protocol1;
pub mod protocol2;
pub mod session;

#[cfg(test)]
mod testutil;

pub use crate::core::{DeviceFamily, Direction, Port, ProtocolVariant};
pub use command::{length_of, CommandLength};
pub use engine::{engine_for, LinkStats, MidiSink, MidiSource, PortTable, ProtocolEngine};
pub use error::{MuxError, Result};
pub use packet::{OutputPacket, SubFrame};
pub use protocol1::Protocol1Engine;
pub use protocol2::{DecoderState, Protocol2Engine};
pub use session::{Session, SessionBuilder, SessionConfig, TransferStatus, Transport};

/// Wire and buffer limits
pub mod limits {
    /// Most ports any family exposes per direction
    pub const MAX_PORTS: usize = 9;

    /// Transfer buffer size in both directions
    pub const TRANSFER_SIZE: usize = 128;

    /// Per-port input reassembly buffer
    pub const PORT_BUFFER_SIZE: usize = 64;

    /// Per-port protocol 2 output FIFO
    pub const FIFO_SIZE: usize = 64;

    /// Protocol 1: sequence counter + reserved byte
    pub const P1_HEADER_LEN: usize = 2;

    /// Protocol 1 port masks are one byte wide
    pub const P1_MAX_PORTS: usize = 8;

    /// Protocol 1: bytes pulled per port per packet
    pub const P1_BYTES_PER_PORT: usize = 3;

    /// Protocol 2: reserved leading byte of inbound packets
    pub const P2_HEADER_LEN: usize = 1;

    /// Protocol 2: bytes pulled per port per packet
    pub const P2_PULL_LEN: usize = 3;

    /// Protocol 2: payload slots per group
    pub const GROUP_SLOTS: usize = 12;

    /// Protocol 2: trailer closing every group
    pub const GROUP_TRAILER: [u8; 2] = [0x01, 0x00];

    /// Protocol 2: a port switch (marker, port, priming byte) must start before this slot
    pub const SWITCH_SLOT_LIMIT: usize = 10;

    /// Protocol 2: transport sub-frame length, one group plus its trailer
    pub const SUB_FRAME_LEN: usize = GROUP_SLOTS + GROUP_TRAILER.len();

    /// Protocol 2: sub-frames per outbound packet
    pub const MAX_SUB_FRAMES: usize = 4;

    /// Protocol 2: outbound packet capacity
    pub const P2_PACKET_SIZE: usize = SUB_FRAME_LEN * MAX_SUB_FRAMES;

    /// Protocol 2: assumed message length when the status byte has no fixed length
    pub const RUNNING_STATUS_FALLBACK_LEN: usize = 3;
}
