//! Contracts between a transport and its underlying byte channel.
//!
//! The channel is an external collaborator: it owns the OS primitive,
//! runs the I/O, and reports back through [`ChannelSink`]. The transport
//! only consumes this contract; real channels (socket, pipe) live with
//! the embedder, and the testkit provides an in-memory reference.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tether_handle::OsHandle;

/// One unit of channel traffic: a byte buffer plus the OS handles that
/// travel alongside it, in payload reference order.
pub struct ChannelMessage {
    pub data: Bytes,
    pub handles: Vec<OsHandle>,
}

impl ChannelMessage {
    pub fn new(data: Bytes) -> Self {
        ChannelMessage {
            data,
            handles: Vec::new(),
        }
    }

    pub fn with_handles(data: Bytes, handles: Vec<OsHandle>) -> Self {
        ChannelMessage { data, handles }
    }
}

impl fmt::Debug for ChannelMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelMessage")
            .field("len", &self.data.len())
            .field("handles", &self.handles.len())
            .finish()
    }
}

/// Cause reported through [`ChannelSink::on_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelErrorKind {
    /// The peer sent bytes this side could not parse.
    MalformedData,
    /// The link dropped for any other reason.
    Disconnected,
}

/// Callbacks a channel delivers to its owner.
///
/// `on_destroyed` fires exactly once, after shutdown has fully drained
/// and closed the channel; it is the only place the owner's
/// self-reference is released.
pub trait ChannelSink: Send + Sync + 'static {
    fn on_message(&self, data: Bytes, handles: Vec<OsHandle>);
    fn on_error(&self, kind: ChannelErrorKind);
    fn on_destroyed(&self);
}

/// The consumed byte-channel contract.
///
/// `write` hands the message to the channel's outbound queue and returns
/// whether it was accepted; delivery is asynchronous. `shut_down` is
/// asynchronous too: the channel drains, closes, and then calls the
/// sink's `on_destroyed`.
pub trait ByteChannel: Send + Sync + 'static {
    fn start(&self);
    fn write(&self, message: ChannelMessage) -> bool;
    fn shut_down(&self);
}

/// One side of a driver-created channel pair, not yet wrapped by a live
/// channel. Owned exclusively by one transport until activation moves it
/// into the channel, or serialization moves it into a wire message.
pub struct Endpoint(OsHandle);

impl Endpoint {
    pub fn new(handle: OsHandle) -> Self {
        Endpoint(handle)
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    pub fn handle(&self) -> &OsHandle {
        &self.0
    }

    pub fn into_handle(self) -> OsHandle {
        self.0
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({:?})", self.0)
    }
}

/// Mints endpoint pairs and wraps an endpoint plus sink into a live
/// channel. The bootstrap side of the collaborator contract.
pub trait ChannelDriver: Send + Sync + 'static {
    /// Create both sides of one OS channel primitive. Failure here is
    /// fatal to transport-pair construction; no partial pair exists.
    fn create_endpoint_pair(&self) -> io::Result<(Endpoint, Endpoint)>;

    /// Bind `endpoint` and `sink` into a channel, ready to be started.
    fn create_channel(&self, endpoint: Endpoint, sink: Arc<dyn ChannelSink>)
        -> Arc<dyn ByteChannel>;
}
