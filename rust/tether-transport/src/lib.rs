#![deny(unsafe_code)]

//! Transport and driver-object serialization for tether.
//!
//! A [`Transport`] owns one endpoint of a bidirectional byte-and-handle
//! channel between two nodes. It buffers transmissions issued before the
//! endpoint is activated, drives a [`ByteChannel`] once it is, and
//! implements the serialize/deserialize protocol for [`DriverObject`]s,
//! including serializing a transport *itself* so an endpoint can be
//! handed through a broker to a third process.
//!
//! The byte channel and the bootstrap that mints endpoint pairs are
//! collaborators, consumed through the [`ByteChannel`] and
//! [`ChannelDriver`] contracts; this crate does not perform I/O.

mod channel;
mod object;
mod relay;
mod transport;

pub use channel::{
    ByteChannel, ChannelDriver, ChannelErrorKind, ChannelMessage, ChannelSink, Endpoint,
};
pub use object::{DeserializeError, DriverObject, ObjectSizes, SerializeError, MAX_OBJECT_HANDLES};
pub use relay::{platform_codec, HandleCodec, InlineCodec, LinkProfile, OutOfBandCodec};
pub use transport::{ActivityHandler, Transport, TransportEvent, TransportOptions};

pub use tether_wire::{Destination, ErrorCode, ObjectKind};
