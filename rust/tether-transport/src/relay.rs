//! Handle relay policy: whether and how OS handles cross a link.
//!
//! POSIX channels pass descriptors out of band next to the byte stream,
//! so any link may carry them. Windows handle values are process-relative
//! integers: a handle reaches another process either because the sender
//! is a broker that duplicates it straight into the target, or because
//! the receiver is a broker trusted to duplicate it out of the sender.
//! Non-broker to non-broker transfer is never valid there; the
//! serializer reports permission-denied and the layer above reroutes the
//! object through a broker relay.
//!
//! The two behaviors are the [`HandleCodec`] implementations below. The
//! serialization algorithm itself is platform-agnostic; only the
//! inlining decision and the per-handle encode/decode live here.

use std::io;

use tether_handle::OsHandle;
use tether_wire::Destination;

/// Link attributes the policy consults.
#[derive(Debug, Clone, Copy)]
pub struct LinkProfile {
    /// The remote process, when this side is a broker that knows it.
    pub remote_process: Option<u32>,
    /// Role of the remote end.
    pub destination: Destination,
}

/// Platform behavior for moving handles across one link.
///
/// `encode_handle` and `decode_handle` are consulted only when
/// [`inlines_handles`](HandleCodec::inlines_handles) is true; the
/// out-of-band path moves the descriptors themselves.
pub trait HandleCodec: Send + Sync {
    /// True if handles are written into the message body as numeric
    /// values instead of traveling beside it.
    fn inlines_handles(&self) -> bool;

    /// Whether this link may carry handles at all.
    fn can_transmit_handles(&self, link: LinkProfile) -> bool;

    /// Consume `handle` and produce its wire value for this link.
    fn encode_handle(&self, handle: OsHandle, link: LinkProfile) -> io::Result<u64>;

    /// Reconstruct a handle from its wire value on this link.
    fn decode_handle(&self, value: u64, link: LinkProfile) -> io::Result<OsHandle>;
}

/// POSIX policy: descriptors ride the channel's side band.
pub struct OutOfBandCodec;

impl HandleCodec for OutOfBandCodec {
    fn inlines_handles(&self) -> bool {
        false
    }

    fn can_transmit_handles(&self, _link: LinkProfile) -> bool {
        true
    }

    fn encode_handle(&self, _handle: OsHandle, _link: LinkProfile) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "handles travel out of band on this link",
        ))
    }

    fn decode_handle(&self, _value: u64, _link: LinkProfile) -> io::Result<OsHandle> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "handles travel out of band on this link",
        ))
    }
}

/// Windows policy: handle values are inlined and brokered.
pub struct InlineCodec;

impl HandleCodec for InlineCodec {
    fn inlines_handles(&self) -> bool {
        true
    }

    fn can_transmit_handles(&self, link: LinkProfile) -> bool {
        link.remote_process.is_some() || link.destination == Destination::ToBroker
    }

    fn encode_handle(&self, handle: OsHandle, link: LinkProfile) -> io::Result<u64> {
        match link.remote_process {
            None => {
                // Without a remote process this link must point at a
                // broker: the raw value goes out as-is and the broker
                // duplicates it out of our handle table, closing the
                // source. Ownership leaves this process here.
                debug_assert_eq!(link.destination, Destination::ToBroker);
                Ok(handle.into_wire_value())
            }
            Some(pid) => duplicate_into(handle, pid),
        }
    }

    fn decode_handle(&self, value: u64, link: LinkProfile) -> io::Result<OsHandle> {
        match link.remote_process {
            None => {
                // Received from a broker, which already duplicated the
                // handle into our table; the value is ours to adopt.
                let handle = OsHandle::from_wire_value(value);
                if !handle.is_valid() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "invalid inlined handle value",
                    ));
                }
                Ok(handle)
            }
            Some(pid) => duplicate_out_of(value, pid),
        }
    }
}

#[cfg(windows)]
fn duplicate_into(handle: OsHandle, pid: u32) -> io::Result<u64> {
    tether_handle::duplicate_to_process(handle, pid)
}

#[cfg(windows)]
fn duplicate_out_of(value: u64, pid: u32) -> io::Result<OsHandle> {
    tether_handle::duplicate_from_process(value, pid)
}

// Brokered duplication needs the OS handle table; elsewhere only the
// policy logic is exercised.
#[cfg(not(windows))]
fn duplicate_into(_handle: OsHandle, _pid: u32) -> io::Result<u64> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "brokered handle duplication requires windows",
    ))
}

#[cfg(not(windows))]
fn duplicate_out_of(_value: u64, _pid: u32) -> io::Result<OsHandle> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "brokered handle duplication requires windows",
    ))
}

/// The codec for the platform this process was built for.
pub fn platform_codec() -> &'static dyn HandleCodec {
    #[cfg(windows)]
    {
        static CODEC: InlineCodec = InlineCodec;
        &CODEC
    }
    #[cfg(not(windows))]
    {
        static CODEC: OutOfBandCodec = OutOfBandCodec;
        &CODEC
    }
}
