//! Driver objects: the closed union of values a transport can carry.
//!
//! Each object kind knows its wire footprint (the capability query
//! behind the size-then-fill protocol) and how to pack its payload and
//! handles. Decoding dispatches on the wire tag through one match; the
//! set of kinds is closed, so there is no open registration.

use std::fmt;
use std::io;
use std::sync::Arc;

use tether_handle::OsHandle;
use tether_wire::{ErrorCode, ObjectKind, TransportHeader, TRANSPORT_HEADER_SIZE};

use crate::channel::Endpoint;
use crate::transport::Transport;

/// Most handles any single object carries; scratch arrays are sized to
/// this so the hot path stays off the heap.
pub const MAX_OBJECT_HANDLES: usize = 2;

/// Wire footprint of an object: payload bytes and handle slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSizes {
    pub num_bytes: usize,
    pub num_handles: usize,
}

/// A serializable capability-bearing value.
///
/// `SharedBuffer` exists only as a wire tag: the kind is recognized but
/// this build carries no decoder for it, and deserialization reports
/// [`DeserializeError::Unimplemented`] rather than dropping the data.
pub enum DriverObject {
    /// A transport, serialized by consuming its inactive endpoint.
    Transport(Arc<Transport>),
    /// A handle marked eligible for cross-process transfer.
    TransmissibleHandle(OsHandle),
    /// A handle wrapped for transfer as-is.
    WrappedHandle(OsHandle),
}

impl DriverObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            DriverObject::Transport(_) => ObjectKind::Transport,
            DriverObject::TransmissibleHandle(_) => ObjectKind::TransmissibleHandle,
            DriverObject::WrappedHandle(_) => ObjectKind::WrappedHandle,
        }
    }

    /// The capability query: payload bytes and handle count this object
    /// needs on the wire. `None` means the object cannot be serialized
    /// in its current state (endpoint already given away, handle empty).
    pub fn wire_sizes(&self) -> Option<ObjectSizes> {
        match self {
            DriverObject::Transport(transport) => {
                if !transport.has_endpoint() {
                    return None;
                }
                Some(ObjectSizes {
                    num_bytes: TRANSPORT_HEADER_SIZE,
                    num_handles: 1,
                })
            }
            DriverObject::TransmissibleHandle(handle) | DriverObject::WrappedHandle(handle) => {
                if !handle.is_valid() {
                    return None;
                }
                Some(ObjectSizes {
                    num_bytes: 0,
                    num_handles: 1,
                })
            }
        }
    }

    /// Pack this object's payload into `data` and move its handles into
    /// the leading slots of `handles`. The object is consumed only once
    /// both capacities have been checked.
    ///
    /// Returns the sizes actually used, identical to what
    /// [`wire_sizes`](Self::wire_sizes) reported for the same state.
    pub fn serialize(
        &mut self,
        data: &mut [u8],
        handles: &mut [OsHandle],
    ) -> Result<ObjectSizes, SerializeError> {
        let sizes = self.wire_sizes().ok_or(SerializeError::InvalidObject)?;
        if data.len() < sizes.num_bytes || handles.len() < sizes.num_handles {
            return Err(SerializeError::InsufficientCapacity(sizes));
        }
        match self {
            DriverObject::Transport(transport) => {
                // The endpoint can race away between the query and the
                // take; the object is then no longer serializable.
                let endpoint = transport
                    .take_endpoint()
                    .ok_or(SerializeError::InvalidObject)?;
                TransportHeader::new(transport.destination()).write_to(data);
                handles[0] = endpoint.into_handle();
            }
            DriverObject::TransmissibleHandle(handle) | DriverObject::WrappedHandle(handle) => {
                handles[0] = handle.take();
            }
        }
        Ok(sizes)
    }

    /// Decode dispatch: reconstruct the object named by `kind` from its
    /// payload and handles, on behalf of `transport`.
    pub(crate) fn decode(
        transport: &Transport,
        kind: u32,
        payload: &[u8],
        mut handles: Vec<OsHandle>,
    ) -> Result<DriverObject, DeserializeError> {
        let Some(kind) = ObjectKind::from_u32(kind) else {
            return Err(DeserializeError::UnknownKind(kind));
        };
        match kind {
            ObjectKind::Transport => {
                let header = TransportHeader::read_from(payload)
                    .map_err(|_| DeserializeError::MalformedObject(kind))?;
                if handles.len() != 1 {
                    return Err(DeserializeError::MismatchedHandles);
                }
                let Some(handle) = handles.pop() else {
                    return Err(DeserializeError::MismatchedHandles);
                };
                let endpoint = Endpoint::new(handle);
                Ok(DriverObject::Transport(Transport::from_serialized(
                    transport,
                    header.destination,
                    endpoint,
                )))
            }
            ObjectKind::TransmissibleHandle | ObjectKind::WrappedHandle => {
                if !payload.is_empty() {
                    return Err(DeserializeError::MalformedObject(kind));
                }
                if handles.len() != 1 {
                    return Err(DeserializeError::MismatchedHandles);
                }
                let Some(handle) = handles.pop() else {
                    return Err(DeserializeError::MismatchedHandles);
                };
                Ok(match kind {
                    ObjectKind::TransmissibleHandle => DriverObject::TransmissibleHandle(handle),
                    _ => DriverObject::WrappedHandle(handle),
                })
            }
            ObjectKind::SharedBuffer => Err(DeserializeError::Unimplemented(kind)),
        }
    }
}

impl fmt::Debug for DriverObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverObject::Transport(transport) => f
                .debug_tuple("Transport")
                .field(&transport.destination())
                .finish(),
            DriverObject::TransmissibleHandle(handle) => {
                f.debug_tuple("TransmissibleHandle").field(handle).finish()
            }
            DriverObject::WrappedHandle(handle) => {
                f.debug_tuple("WrappedHandle").field(handle).finish()
            }
        }
    }
}

/// Failure from the serialize entry points.
#[derive(Debug)]
pub enum SerializeError {
    /// The object cannot report or satisfy its wire footprint.
    InvalidObject,
    /// Policy forbids direct handle transfer on this link; the caller
    /// should reroute the object through a broker relay.
    RelayRequired,
    /// Caller capacity is too small; retry with at least these sizes.
    InsufficientCapacity(ObjectSizes),
    /// The platform refused to encode a handle.
    EncodeFailed(io::Error),
}

impl SerializeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SerializeError::InvalidObject => ErrorCode::InvalidArgument,
            SerializeError::RelayRequired => ErrorCode::PermissionDenied,
            SerializeError::InsufficientCapacity(_) => ErrorCode::ResourceExhausted,
            SerializeError::EncodeFailed(_) => ErrorCode::Internal,
        }
    }
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeError::InvalidObject => write!(f, "object is not serializable"),
            SerializeError::RelayRequired => {
                write!(f, "handle transfer forbidden on this link, relay via broker")
            }
            SerializeError::InsufficientCapacity(sizes) => write!(
                f,
                "insufficient capacity, need {} bytes and {} handle slots",
                sizes.num_bytes, sizes.num_handles
            ),
            SerializeError::EncodeFailed(err) => write!(f, "handle encoding failed: {err}"),
        }
    }
}

impl std::error::Error for SerializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializeError::EncodeFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Failure from the deserialize entry point. Nothing partially
/// constructed escapes: on error, any handles moved in are dropped and
/// closed with the error.
#[derive(Debug)]
pub enum DeserializeError {
    /// Truncated buffer or out-of-bounds declared header size.
    InvalidHeader,
    /// Type tag not in the closed set.
    UnknownKind(u32),
    /// A handle failed the platform decode step.
    InvalidHandle,
    /// Handle count does not match what the object kind requires.
    MismatchedHandles,
    /// The object's own payload failed validation.
    MalformedObject(ObjectKind),
    /// Kind recognized but no decoder exists in this build.
    Unimplemented(ObjectKind),
}

impl DeserializeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DeserializeError::Unimplemented(_) => ErrorCode::Unimplemented,
            _ => ErrorCode::InvalidArgument,
        }
    }
}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeserializeError::InvalidHeader => write!(f, "invalid object header"),
            DeserializeError::UnknownKind(raw) => write!(f, "unknown object kind {raw}"),
            DeserializeError::InvalidHandle => write!(f, "invalid handle in object"),
            DeserializeError::MismatchedHandles => write!(f, "handle count mismatch"),
            DeserializeError::MalformedObject(kind) => write!(f, "malformed {kind} object"),
            DeserializeError::Unimplemented(kind) => write!(f, "no decoder for {kind} objects"),
        }
    }
}

impl std::error::Error for DeserializeError {}
