//! Shared fixtures for the transport integration suites.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use tether_handle::OsHandle;
use tether_transport::{ActivityHandler, ChannelErrorKind, TransportEvent};

/// Everything a transport reported, in arrival order.
#[derive(Default)]
pub struct Events {
    pub messages: Vec<(Bytes, Vec<OsHandle>)>,
    pub errors: Vec<ChannelErrorKind>,
    pub deactivated: usize,
}

impl Events {
    pub fn payloads(&self) -> Vec<Bytes> {
        self.messages.iter().map(|(data, _)| data.clone()).collect()
    }
}

/// An activity handler that records every event.
pub fn recorder() -> (ActivityHandler, Arc<Mutex<Events>>) {
    init_tracing();
    let events = Arc::new(Mutex::new(Events::default()));
    let record = events.clone();
    let handler: ActivityHandler = Arc::new(move |event| {
        let mut events = record.lock();
        match event {
            TransportEvent::Message { data, handles } => events.messages.push((data, handles)),
            TransportEvent::Error(kind) => events.errors.push(kind),
            TransportEvent::Deactivated => events.deactivated += 1,
        }
    });
    (handler, events)
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
