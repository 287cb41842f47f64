//! Core types: ports, directions and device families

use crate::error::{MuxError, Result};
use crate::limits::MAX_PORTS;

/// Stream direction, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// Device to host
    Input,
    /// Host to device
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// Logical MIDI port index (0-8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Port(u8);

impl Port {
    /// Create a new port, validating it against the global port limit
    pub fn new(index: u8) -> Result<Self> {
        if index as usize >= MAX_PORTS {
            return Err(MuxError::invalid_port(
                index as usize,
                Direction::Input,
                MAX_PORTS,
            ));
        }
        Ok(Port(index))
    }

    /// Get the raw port index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port {}", self.0)
    }
}

/// Wire framing variant spoken by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtocolVariant {
    /// Bitmask framing over interrupt transfers
    Protocol1,
    /// Marker/filler framing over isochronous transfers
    Protocol2,
}

/// Supported interface families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceFamily {
    /// express 128 (8 in, 8 out)
    Express128,
    /// micro lite (5 in, 5 out)
    MicroLite,
    /// micro express (5 in, 7 out)
    MicroExpress,
    /// express XT (9 in, 9 out)
    ExpressXt,
}

impl DeviceFamily {
    /// Identify the family from the USB device subclass and product string.
    ///
    /// The product id is shared across the whole line, so the subclass picks
    /// the protocol generation and the product name picks the model.
    pub fn identify(device_subclass: u8, product: &str) -> Result<Self> {
        match device_subclass {
            1 if product.contains("Micro Express") => Ok(DeviceFamily::MicroExpress),
            1 => Ok(DeviceFamily::ExpressXt),
            3 if product.contains("micro lite") => Ok(DeviceFamily::MicroLite),
            3 => Ok(DeviceFamily::Express128),
            other => Err(MuxError::unsupported_device(format!(
                "device subclass {} ({:?})",
                other, product
            ))),
        }
    }

    /// Framing variant used by this family
    pub fn variant(&self) -> ProtocolVariant {
        match self {
            DeviceFamily::Express128 | DeviceFamily::MicroLite => ProtocolVariant::Protocol1,
            DeviceFamily::MicroExpress | DeviceFamily::ExpressXt => ProtocolVariant::Protocol2,
        }
    }

    /// Number of input ports exposed by this family
    pub fn input_ports(&self) -> usize {
        match self {
            DeviceFamily::Express128 => 8,
            DeviceFamily::MicroLite => 5,
            DeviceFamily::MicroExpress => 5,
            DeviceFamily::ExpressXt => 9,
        }
    }

    /// Number of output ports exposed by this family
    pub fn output_ports(&self) -> usize {
        match self {
            DeviceFamily::Express128 => 8,
            DeviceFamily::MicroLite => 5,
            DeviceFamily::MicroExpress => 7,
            DeviceFamily::ExpressXt => 9,
        }
    }

    /// Port count for a direction
    pub fn ports(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.input_ports(),
            Direction::Output => self.output_ports(),
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceFamily::Express128 => write!(f, "express 128"),
            DeviceFamily::MicroLite => write!(f, "micro lite"),
            DeviceFamily::MicroExpress => write!(f, "micro express"),
            DeviceFamily::ExpressXt => write!(f, "express XT"),
        }
    }
}
