#![deny(unsafe_code)]

//! Wire-level definitions for the tether transport layer.
//!
//! Everything that crosses a process boundary is defined here: the
//! driver-object header in its two platform variants, the transport
//! payload header, the closed set of object type tags, and the result
//! codes the serialization entry points report.
//!
//! All multi-byte fields are little-endian, fixed width. Readers advance
//! past a header using its *declared* `size` field, never a compiled
//! constant, so a newer peer can grow the header without breaking an
//! older parser.

mod error;
mod header;

pub use error::ErrorCode;
pub use header::{
    HeaderError, ObjectHeader, TransportHeader, HANDLE_WIRE_SIZE, HEADER_SIZE_INLINE,
    HEADER_SIZE_OUT_OF_BAND, TRANSPORT_HEADER_SIZE,
};

use std::fmt;

/// Role of the remote end of a link, relative to the local process.
///
/// Fixed at transport construction and encoded verbatim in a serialized
/// transport's payload.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The remote end is an ordinary (possibly sandboxed) node.
    NonBroker = 0,
    /// The remote end is a broker, trusted to duplicate handles on our
    /// behalf.
    ToBroker = 1,
}

impl Destination {
    /// Convert from a u32 wire value.
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0 => Some(Destination::NonBroker),
            1 => Some(Destination::ToBroker),
            _ => None,
        }
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::NonBroker => write!(f, "non-broker"),
            Destination::ToBroker => write!(f, "to-broker"),
        }
    }
}

/// Type tag of a serialized driver object.
///
/// The set is closed: deserialization dispatches through a single match,
/// not an open registry. Values are wire-significant.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A transport endpoint, handed whole to the remote peer.
    Transport = 1,
    /// A handle already marked eligible for cross-process transfer.
    TransmissibleHandle = 2,
    /// A handle wrapped for transfer without transmissibility marking.
    WrappedHandle = 3,
    /// A shared memory region. Recognized on the wire; no decoder yet.
    SharedBuffer = 4,
}

impl ObjectKind {
    /// Convert from a u32 wire value.
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            1 => Some(ObjectKind::Transport),
            2 => Some(ObjectKind::TransmissibleHandle),
            3 => Some(ObjectKind::WrappedHandle),
            4 => Some(ObjectKind::SharedBuffer),
            _ => None,
        }
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Tag name for debugging.
    pub const fn name(self) -> &'static str {
        match self {
            ObjectKind::Transport => "Transport",
            ObjectKind::TransmissibleHandle => "TransmissibleHandle",
            ObjectKind::WrappedHandle => "WrappedHandle",
            ObjectKind::SharedBuffer => "SharedBuffer",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
