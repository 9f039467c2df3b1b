//! The transport: one endpoint of a byte-and-handle channel.
//!
//! A transport is created as half of a pair, buffers writes until it is
//! activated, then drives a live [`ByteChannel`]. While still inactive
//! its endpoint can instead be serialized away as a [`DriverObject`],
//! which is how a channel gets handed through a broker to a third
//! process.
//!
//! One mutex guards the small set of shared fields. Anything with
//! externally visible side effects (channel writes, the activity
//! handler, channel startup and shutdown) runs after the lock is
//! released, with the needed references captured first, so a callback
//! that re-enters the transport cannot deadlock it.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use tether_handle::OsHandle;
use tether_wire::{
    Destination, ObjectHeader, HANDLE_WIRE_SIZE, HEADER_SIZE_INLINE, HEADER_SIZE_OUT_OF_BAND,
};

use crate::channel::{
    ByteChannel, ChannelDriver, ChannelErrorKind, ChannelMessage, ChannelSink, Endpoint,
};
use crate::object::{
    DeserializeError, DriverObject, ObjectSizes, SerializeError, MAX_OBJECT_HANDLES,
};
use crate::relay::{platform_codec, HandleCodec, LinkProfile};

/// Everything a transport reports to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound message with its accompanying handles.
    Message {
        data: Bytes,
        handles: Vec<OsHandle>,
    },
    /// The channel failed; no further messages will arrive.
    Error(ChannelErrorKind),
    /// Teardown completed. Fires exactly once, after deactivation.
    Deactivated,
}

/// Callback receiving [`TransportEvent`]s. Set once at activation,
/// immutable thereafter.
pub type ActivityHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// Per-transport construction knobs.
pub struct TransportOptions {
    destination: Destination,
    remote_process: Option<u32>,
    codec: &'static dyn HandleCodec,
}

impl TransportOptions {
    pub fn new(destination: Destination) -> Self {
        TransportOptions {
            destination,
            remote_process: None,
            codec: platform_codec(),
        }
    }

    /// Record the remote process's identity. Only a broker knows this.
    pub fn remote_process(mut self, pid: u32) -> Self {
        self.remote_process = Some(pid);
        self
    }

    /// Override the handle codec, e.g. to exercise the inline policy on
    /// a host that defaults to out-of-band.
    pub fn codec(mut self, codec: &'static dyn HandleCodec) -> Self {
        self.codec = codec;
        self
    }
}

#[derive(Default)]
struct State {
    endpoint: Option<Endpoint>,
    channel: Option<Arc<dyn ByteChannel>>,
    handler: Option<ActivityHandler>,
    pending: VecDeque<ChannelMessage>,
    self_ref: Option<Arc<Transport>>,
}

/// One endpoint of a bidirectional byte-and-handle channel.
pub struct Transport {
    driver: Arc<dyn ChannelDriver>,
    destination: Destination,
    remote_process: Option<u32>,
    codec: &'static dyn HandleCodec,
    state: Mutex<State>,
}

impl Transport {
    /// Create both ends of one channel as a matched transport pair, with
    /// platform-default policy and no known remote process.
    pub fn create_pair(
        driver: Arc<dyn ChannelDriver>,
        destination_a: Destination,
        destination_b: Destination,
    ) -> io::Result<(Arc<Transport>, Arc<Transport>)> {
        Self::create_pair_with(
            driver,
            TransportOptions::new(destination_a),
            TransportOptions::new(destination_b),
        )
    }

    /// Create a matched transport pair with explicit options per side.
    pub fn create_pair_with(
        driver: Arc<dyn ChannelDriver>,
        options_a: TransportOptions,
        options_b: TransportOptions,
    ) -> io::Result<(Arc<Transport>, Arc<Transport>)> {
        let (endpoint_a, endpoint_b) = driver.create_endpoint_pair()?;
        let a = Self::from_parts(driver.clone(), options_a, endpoint_a);
        let b = Self::from_parts(driver, options_b, endpoint_b);
        Ok((a, b))
    }

    fn from_parts(
        driver: Arc<dyn ChannelDriver>,
        options: TransportOptions,
        endpoint: Endpoint,
    ) -> Arc<Transport> {
        Arc::new(Transport {
            driver,
            destination: options.destination,
            remote_process: options.remote_process,
            codec: options.codec,
            state: Mutex::new(State {
                endpoint: Some(endpoint),
                ..State::default()
            }),
        })
    }

    /// Reconstruct a transport received as a serialized object. It
    /// shares the receiving transport's driver and codec; the remote
    /// process, if any, is for the layer above to establish.
    pub(crate) fn from_serialized(
        parent: &Transport,
        destination: Destination,
        endpoint: Endpoint,
    ) -> Arc<Transport> {
        Arc::new(Transport {
            driver: parent.driver.clone(),
            destination,
            remote_process: None,
            codec: parent.codec,
            state: Mutex::new(State {
                endpoint: Some(endpoint),
                ..State::default()
            }),
        })
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn remote_process(&self) -> Option<u32> {
        self.remote_process
    }

    /// True between successful activation and deactivation.
    pub fn is_active(&self) -> bool {
        self.state.lock().channel.is_some()
    }

    fn link(&self) -> LinkProfile {
        LinkProfile {
            remote_process: self.remote_process,
            destination: self.destination,
        }
    }

    /// Whether policy lets this link carry OS handles directly.
    pub fn can_transmit_handles(&self) -> bool {
        self.codec.can_transmit_handles(self.link())
    }

    pub(crate) fn has_endpoint(&self) -> bool {
        self.state.lock().endpoint.is_some()
    }

    /// Consume the inactive endpoint, e.g. to serialize this transport.
    /// Fails once the endpoint has moved into a channel or been given
    /// away already.
    pub(crate) fn take_endpoint(&self) -> Option<Endpoint> {
        self.state.lock().endpoint.take()
    }

    /// Bring the endpoint up: construct the channel, start its I/O, and
    /// flush any queued transmissions in order.
    ///
    /// Returns false, with no side effects, if a channel already exists
    /// or the endpoint was already consumed. The transport holds a
    /// reference to itself from here until the channel's destruction
    /// callback, so it stays alive for callbacks even if the owner drops
    /// every other reference.
    pub fn activate(self: &Arc<Self>, handler: ActivityHandler) -> bool {
        let (channel, backlog) = {
            let mut state = self.state.lock();
            if state.channel.is_some() {
                return false;
            }
            let Some(endpoint) = state.endpoint.take() else {
                return false;
            };
            let sink: Arc<dyn ChannelSink> = self.clone();
            let channel = self.driver.create_channel(endpoint, sink);
            state.channel = Some(channel.clone());
            state.handler = Some(handler);
            state.self_ref = Some(self.clone());
            (channel, std::mem::take(&mut state.pending))
        };

        // Startup and the backlog flush run unlocked: both can re-enter
        // the transport synchronously.
        channel.start();
        if !backlog.is_empty() {
            debug!(queued = backlog.len(), "flushing transmissions queued before activation");
        }
        for message in backlog {
            channel.write(message);
        }
        true
    }

    /// Begin teardown. Returns false if there is no live channel.
    /// Shutdown is asynchronous; completion is reported through a single
    /// [`TransportEvent::Deactivated`].
    pub fn deactivate(&self) -> bool {
        let Some(channel) = self.state.lock().channel.take() else {
            return false;
        };
        debug!("deactivating transport");
        channel.shut_down();
        true
    }

    /// Same as [`deactivate`](Self::deactivate); a second close of an
    /// already-closed transport is a no-op failure.
    pub fn close(&self) -> bool {
        self.deactivate()
    }

    /// Queue or send one message.
    ///
    /// Before activation the message is buffered and flushed, in call
    /// order, when the channel comes up; `true` then means accepted, not
    /// delivered. After the endpoint has been given away with no channel
    /// in place there is nowhere for the bytes to go and this fails.
    ///
    /// On links that inline handles into message bodies, out-of-band
    /// handles are a contract violation: refused here, asserted in debug
    /// builds.
    pub fn transmit(&self, data: Bytes, handles: Vec<OsHandle>) -> bool {
        if self.codec.inlines_handles() {
            debug_assert!(
                handles.is_empty(),
                "out-of-band handles on an inline-handle link"
            );
            if !handles.is_empty() {
                return false;
            }
        }
        let message = ChannelMessage::with_handles(data, handles);
        let channel = {
            let mut state = self.state.lock();
            match &state.channel {
                Some(channel) => channel.clone(),
                None => {
                    if state.endpoint.is_some() {
                        state.pending.push_back(message);
                        trace!(queued = state.pending.len(), "queued transmission before activation");
                        return true;
                    }
                    return false;
                }
            }
        };
        channel.write(message)
    }

    /// Serialize `object` into caller-provided buffers.
    ///
    /// Size-then-fill: called with empty buffers this reports the exact
    /// required capacities inside
    /// [`SerializeError::InsufficientCapacity`], and a second call with
    /// those capacities consumes the object and succeeds. The returned
    /// sizes are what was actually consumed.
    ///
    /// On links that inline handles, `handles` stays untouched and the
    /// encoded values land in `data`; elsewhere the object's handles are
    /// moved into the leading slots of `handles`.
    pub fn serialize_object(
        &self,
        object: &mut DriverObject,
        data: &mut [u8],
        handles: &mut [OsHandle],
    ) -> Result<ObjectSizes, SerializeError> {
        let sizes = object.wire_sizes().ok_or(SerializeError::InvalidObject)?;
        if sizes.num_handles > 0 && !self.can_transmit_handles() {
            return Err(SerializeError::RelayRequired);
        }

        let inline = self.codec.inlines_handles();
        let header_len = if inline {
            HEADER_SIZE_INLINE
        } else {
            HEADER_SIZE_OUT_OF_BAND
        };
        let handle_area = if inline {
            sizes.num_handles * HANDLE_WIRE_SIZE
        } else {
            0
        };
        let required = ObjectSizes {
            num_bytes: header_len + handle_area + sizes.num_bytes,
            num_handles: if inline { 0 } else { sizes.num_handles },
        };
        if data.len() < required.num_bytes || handles.len() < required.num_handles {
            return Err(SerializeError::InsufficientCapacity(required));
        }

        let kind = object.kind().as_u32();
        let header = if inline {
            ObjectHeader::new_inline(kind, sizes.num_handles as u32)
        } else {
            ObjectHeader::new_out_of_band(kind)
        };
        header.write_to(data);

        let payload_at = header_len + handle_area;
        let payload = &mut data[payload_at..payload_at + sizes.num_bytes];
        if inline {
            let mut scratch = [OsHandle::invalid(), OsHandle::invalid()];
            debug_assert!(sizes.num_handles <= MAX_OBJECT_HANDLES);
            object.serialize(payload, &mut scratch[..sizes.num_handles])?;
            for (index, slot) in scratch[..sizes.num_handles].iter_mut().enumerate() {
                let value = self
                    .codec
                    .encode_handle(slot.take(), self.link())
                    .map_err(SerializeError::EncodeFailed)?;
                let at = header_len + index * HANDLE_WIRE_SIZE;
                data[at..at + HANDLE_WIRE_SIZE].copy_from_slice(&value.to_le_bytes());
            }
        } else {
            object.serialize(payload, &mut handles[..sizes.num_handles])?;
        }
        Ok(required)
    }

    /// Reconstruct a driver object from a received buffer and its
    /// accompanying handles. Never yields a partially-built object: any
    /// failure drops (and closes) whatever handles came in.
    pub fn deserialize_object(
        &self,
        data: &[u8],
        handles: Vec<OsHandle>,
    ) -> Result<DriverObject, DeserializeError> {
        if self.codec.inlines_handles() {
            let header =
                ObjectHeader::read_inline(data).map_err(|_| DeserializeError::InvalidHeader)?;
            if !handles.is_empty() {
                return Err(DeserializeError::MismatchedHandles);
            }
            let num_handles = header.num_handles as usize;
            let handle_area_at = header.encoded_len();
            let mut decoded = Vec::with_capacity(num_handles);
            for index in 0..num_handles {
                let at = handle_area_at + index * HANDLE_WIRE_SIZE;
                let mut raw = [0u8; HANDLE_WIRE_SIZE];
                raw.copy_from_slice(&data[at..at + HANDLE_WIRE_SIZE]);
                let handle = self
                    .codec
                    .decode_handle(u64::from_le_bytes(raw), self.link())
                    .map_err(|_| DeserializeError::InvalidHandle)?;
                decoded.push(handle);
            }
            let payload = &data[handle_area_at + num_handles * HANDLE_WIRE_SIZE..];
            DriverObject::decode(self, header.kind, payload, decoded)
        } else {
            let header = ObjectHeader::read_out_of_band(data)
                .map_err(|_| DeserializeError::InvalidHeader)?;
            if handles.iter().any(|handle| !handle.is_valid()) {
                return Err(DeserializeError::InvalidHandle);
            }
            let payload = &data[header.encoded_len()..];
            DriverObject::decode(self, header.kind, payload, handles)
        }
    }
}

impl ChannelSink for Transport {
    fn on_message(&self, data: Bytes, handles: Vec<OsHandle>) {
        let handler = self.state.lock().handler.clone();
        if let Some(handler) = handler {
            handler(TransportEvent::Message { data, handles });
        }
    }

    fn on_error(&self, kind: ChannelErrorKind) {
        warn!(?kind, "channel error");
        let handler = self.state.lock().handler.clone();
        if let Some(handler) = handler {
            handler(TransportEvent::Error(kind));
        }
    }

    fn on_destroyed(&self) {
        let (handler, self_ref) = {
            let mut state = self.state.lock();
            (state.handler.clone(), state.self_ref.take())
        };
        debug!("channel destroyed");
        if let Some(handler) = handler {
            handler(TransportEvent::Deactivated);
        }
        // The last callback has fired; releasing the self-reference here
        // is the single place the keep-alive cycle is broken.
        drop(self_ref);
    }
}
