//! Outgoing packets and their transport sub-frame layout

/// One transport-level sub-frame inside an outgoing packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubFrame {
    /// Byte offset into the packet payload
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
}

/// A packet ready for submission to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPacket {
    payload: Vec<u8>,
    frames: Vec<SubFrame>,
}

impl OutputPacket {
    /// Packet sent as a single transfer
    pub fn single(payload: &[u8]) -> Self {
        OutputPacket {
            payload: payload.to_vec(),
            frames: vec![SubFrame {
                offset: 0,
                length: payload.len(),
            }],
        }
    }

    /// Packet split into sub-frames of at most `frame_len` bytes.
    ///
    /// At most `max_frames` descriptors are produced; callers keep the payload
    /// within `frame_len * max_frames` so every byte is covered.
    pub fn framed(payload: &[u8], frame_len: usize, max_frames: usize) -> Self {
        let frames = payload
            .chunks(frame_len)
            .take(max_frames)
            .enumerate()
            .map(|(i, chunk)| SubFrame {
                offset: i * frame_len,
                length: chunk.len(),
            })
            .collect();
        OutputPacket {
            payload: payload.to_vec(),
            frames,
        }
    }

    /// Bytes to transmit
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sub-frame descriptors covering the payload
    pub fn frames(&self) -> &[SubFrame] {
        &self.frames
    }

    /// Payload length
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
