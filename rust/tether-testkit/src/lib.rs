//! In-memory reference driver for tether.
//!
//! This is the semantic reference for the [`ChannelDriver`] contract:
//! both endpoints live in one process, joined by queues, and delivery is
//! synchronous and in order. Real drivers (sockets, pipes) must behave
//! identically modulo asynchrony. Test suites build transport pairs on
//! top of it and assert ordering, buffering, and teardown behavior
//! deterministically.
//!
//! Messages written before the receiving side has started are held on
//! the receiver's queue and delivered, in order, when it starts — the
//! same tolerance a real channel gets from the OS socket buffer.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use tether_handle::OsHandle;
use tether_transport::{
    ByteChannel, ChannelDriver, ChannelErrorKind, ChannelMessage, ChannelSink, Endpoint,
};

#[cfg(unix)]
use std::os::fd::IntoRawFd;

#[derive(Default)]
struct SideState {
    sink: Option<Arc<dyn ChannelSink>>,
    started: bool,
    shut: bool,
    inbound: Vec<ChannelMessage>,
}

/// One in-memory channel pair: two sides, each with its own sink and a
/// queue of messages awaiting its start.
#[derive(Default)]
struct Link {
    sides: [Mutex<SideState>; 2],
}

impl Link {
    /// Deliver or queue a message for `side`.
    fn post(&self, side: usize, message: ChannelMessage) -> bool {
        let sink = {
            let mut state = self.sides[side].lock();
            if state.shut {
                return false;
            }
            if !state.started {
                state.inbound.push(message);
                return true;
            }
            match &state.sink {
                Some(sink) => sink.clone(),
                None => {
                    state.inbound.push(message);
                    return true;
                }
            }
        };
        sink.on_message(message.data, message.handles);
        true
    }
}

/// The in-memory [`ChannelDriver`].
///
/// Endpoint pairs are minted from a real socketpair on unix, so the
/// tokens are genuine descriptors with normal close semantics; on other
/// hosts they are opaque counters that close to nothing.
#[derive(Default)]
pub struct MemoryDriver {
    links: Mutex<HashMap<i64, (Arc<Link>, usize)>>,
}

impl MemoryDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryDriver::default())
    }

    fn mint_tokens(&self) -> io::Result<(OsHandle, OsHandle)> {
        #[cfg(unix)]
        {
            let (a, b) = std::os::unix::net::UnixStream::pair()?;
            Ok((
                OsHandle::from_raw_fd(a.into_raw_fd()),
                OsHandle::from_raw_fd(b.into_raw_fd()),
            ))
        }
        #[cfg(not(unix))]
        {
            use std::sync::atomic::{AtomicI64, Ordering};
            // High values so a stray CloseHandle on a token is a no-op.
            static NEXT: AtomicI64 = AtomicI64::new(0x5454_0000);
            let a = NEXT.fetch_add(2, Ordering::Relaxed);
            Ok((OsHandle::from_raw(a), OsHandle::from_raw(a + 1)))
        }
    }
}

impl ChannelDriver for MemoryDriver {
    fn create_endpoint_pair(&self) -> io::Result<(Endpoint, Endpoint)> {
        let (token_a, token_b) = self.mint_tokens()?;
        let link = Arc::new(Link::default());
        let mut links = self.links.lock();
        links.insert(token_a.raw(), (link.clone(), 0));
        links.insert(token_b.raw(), (link, 1));
        Ok((Endpoint::new(token_a), Endpoint::new(token_b)))
    }

    fn create_channel(
        &self,
        endpoint: Endpoint,
        sink: Arc<dyn ChannelSink>,
    ) -> Arc<dyn ByteChannel> {
        let raw = endpoint.handle().raw();
        let (link, side) = {
            let links = self.links.lock();
            links
                .get(&raw)
                .cloned()
                .expect("endpoint was not minted by this driver")
        };
        link.sides[side].lock().sink = Some(sink);
        Arc::new(MemoryChannel {
            link,
            side,
            // The channel owns the endpoint now; dropping the token with
            // the channel mirrors the OS primitive's lifetime.
            _endpoint: endpoint,
        })
    }
}

struct MemoryChannel {
    link: Arc<Link>,
    side: usize,
    _endpoint: Endpoint,
}

impl ByteChannel for MemoryChannel {
    fn start(&self) {
        let (sink, backlog) = {
            let mut state = self.link.sides[self.side].lock();
            if state.started || state.shut {
                return;
            }
            state.started = true;
            (state.sink.clone(), std::mem::take(&mut state.inbound))
        };
        if let Some(sink) = sink {
            for message in backlog {
                sink.on_message(message.data, message.handles);
            }
        }
    }

    fn write(&self, message: ChannelMessage) -> bool {
        if self.link.sides[self.side].lock().shut {
            return false;
        }
        self.link.post(1 - self.side, message)
    }

    fn shut_down(&self) {
        let own_sink = {
            let mut state = self.link.sides[self.side].lock();
            if state.shut {
                return;
            }
            state.shut = true;
            state.sink.take()
        };
        let peer_sink = {
            let mut state = self.link.sides[1 - self.side].lock();
            if state.shut || !state.started {
                None
            } else {
                state.sink.clone()
            }
        };
        // In-memory drain is instantaneous; destruction is reported
        // immediately and the peer observes a disconnect.
        if let Some(sink) = peer_sink {
            sink.on_error(ChannelErrorKind::Disconnected);
        }
        if let Some(sink) = own_sink {
            sink.on_destroyed();
        }
    }
}
