//! MIDI command length table
//!
//! Every framing decision in both protocol variants comes down to "how many
//! bytes belong to this command": the decoders use it to find message
//! boundaries and re-apply running status, the output FIFO uses it to decide
//! when a message is complete enough to send.

use bitfield::bitfield;

/// Start of a system-exclusive span
pub const SYSEX_START: u8 = 0xF0;
/// End of a system-exclusive span
pub const SYSEX_END: u8 = 0xF7;
/// Protocol 2 port-select marker
pub const PORT_MARKER: u8 = 0xF5;
/// Protocol 2 filler byte
pub const FILLER: u8 = 0xFF;

/// Total message length for a status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLength {
    /// Status byte plus a fixed number of data bytes (total, 1-3)
    Fixed(usize),
    /// System-exclusive or undefined: no length known in advance
    Variable,
    /// Data byte, not a status byte
    NotACommand,
}

impl CommandLength {
    /// Number of data bytes following the status byte, if fixed
    pub fn data_bytes(&self) -> Option<usize> {
        match self {
            CommandLength::Fixed(n) => Some(n - 1),
            _ => None,
        }
    }
}

// Channel messages 0x8n..0xEn, indexed by high nibble - 8
const CHANNEL_LENGTHS: [usize; 7] = [3, 3, 3, 3, 2, 2, 3];

// System messages 0xF0..0xFF, 0 = variable
const SYSTEM_LENGTHS: [usize; 16] = [0, 2, 1, 2, 0, 0, 1, 1, 1, 1, 1, 1, 1, 0, 1, 1];

bitfield! {
    /// A status byte split into its message kind and channel nibbles
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct StatusByte(u8);
    impl Debug;
    u8;
    /// High nibble (0x8-0xF)
    pub kind, _: 7, 4;
    /// Low nibble: MIDI channel, or system message index
    pub channel, _: 3, 0;
}

impl StatusByte {
    /// Wrap a byte if it has the status bit set
    pub fn new(byte: u8) -> Option<Self> {
        if is_status(byte) {
            Some(StatusByte(byte))
        } else {
            None
        }
    }

    /// Raw byte value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Channel voice/mode message (0x80-0xEF), the only kind running status applies to
    pub fn is_channel_message(&self) -> bool {
        self.kind() < 0xF
    }

    /// Total message length for this status byte
    pub fn length(&self) -> CommandLength {
        if self.is_channel_message() {
            CommandLength::Fixed(CHANNEL_LENGTHS[(self.kind() - 8) as usize])
        } else {
            match SYSTEM_LENGTHS[self.channel() as usize] {
                0 => CommandLength::Variable,
                n => CommandLength::Fixed(n),
            }
        }
    }
}

/// Check whether a byte is a status (command) byte
#[inline]
pub fn is_status(byte: u8) -> bool {
    byte & 0x80 != 0
}

/// Look up the total message length for a byte
pub fn length_of(byte: u8) -> CommandLength {
    match StatusByte::new(byte) {
        Some(status) => status.length(),
        None => CommandLength::NotACommand,
    }
}
