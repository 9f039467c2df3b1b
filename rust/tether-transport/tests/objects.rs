//! Driver-object serialization over both codec profiles.

mod support;

use bytes::Bytes;
use support::recorder;
use tether_handle::OsHandle;
use tether_transport::{
    Destination, DriverObject, ErrorCode, InlineCodec, ObjectKind, SerializeError, Transport,
    TransportOptions,
};
use tether_testkit::MemoryDriver;

static INLINE: InlineCodec = InlineCodec;

#[cfg(unix)]
fn live_fd_handle() -> OsHandle {
    use std::os::fd::IntoRawFd;
    use std::os::unix::net::UnixStream;
    let (left, right) = UnixStream::pair().expect("unix pair");
    // Keep the peer end alive for the duration of the process; the test
    // only cares that `left` stays a live descriptor.
    std::mem::forget(right);
    OsHandle::from_raw_fd(left.into_raw_fd())
}

fn header(size: u32, kind: u32, total_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; total_len];
    buf[0..4].copy_from_slice(&size.to_le_bytes());
    buf[4..8].copy_from_slice(&kind.to_le_bytes());
    buf
}

#[test]
fn serialized_transport_round_trips_and_comes_back_alive() {
    let driver = MemoryDriver::new();
    let (carrier_a, carrier_b) =
        Transport::create_pair(driver.clone(), Destination::ToBroker, Destination::NonBroker)
            .expect("carrier pair");
    let (given, kept) =
        Transport::create_pair(driver, Destination::ToBroker, Destination::NonBroker)
            .expect("payload pair");

    let mut object = DriverObject::Transport(given.clone());
    let mut data = [0u8; 12];
    let mut slots = [OsHandle::invalid()];
    let sizes = carrier_a
        .serialize_object(&mut object, &mut data, &mut slots)
        .expect("serialize");
    assert_eq!(sizes.num_bytes, 12);
    assert_eq!(sizes.num_handles, 1);

    let handles = vec![slots[0].take()];
    let decoded = carrier_b
        .deserialize_object(&data, handles)
        .expect("deserialize");
    let DriverObject::Transport(revived) = decoded else {
        panic!("expected a transport object");
    };
    assert_eq!(revived.destination(), Destination::ToBroker);

    // The revived endpoint is the real thing: activate both sides of the
    // payload pair and pass traffic.
    let (handler_kept, events_kept) = recorder();
    let (handler_revived, _events_revived) = recorder();
    assert!(kept.activate(handler_kept));
    assert!(revived.activate(handler_revived));
    assert!(revived.transmit(Bytes::from_static(b"hello"), Vec::new()));
    assert_eq!(events_kept.lock().payloads(), vec!["hello"]);
}

#[test]
fn object_level_serialize_fits_exactly_the_transport_header() {
    let driver = MemoryDriver::new();
    let (given, _kept) =
        Transport::create_pair(driver, Destination::ToBroker, Destination::NonBroker)
            .expect("payload pair");

    let mut object = DriverObject::Transport(given);
    let mut payload = [0u8; 4];
    let mut slots = [OsHandle::invalid()];
    let sizes = object
        .serialize(&mut payload, &mut slots)
        .expect("exact-fit serialize");
    assert_eq!(sizes.num_bytes, 4);
    assert_eq!(sizes.num_handles, 1);
    assert_eq!(
        u32::from_le_bytes(payload),
        Destination::ToBroker.as_u32()
    );
    assert!(slots[0].is_valid());
}

#[cfg(unix)]
#[test]
fn size_query_reports_exactly_what_a_sufficient_call_consumes() {
    let driver = MemoryDriver::new();
    let (a, _b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    let mut object = DriverObject::WrappedHandle(live_fd_handle());
    let required = match a.serialize_object(&mut object, &mut [], &mut []) {
        Err(SerializeError::InsufficientCapacity(required)) => required,
        other => panic!("expected a capacity report, got {other:?}"),
    };

    let mut data = vec![0u8; required.num_bytes];
    let mut slots: Vec<OsHandle> = (0..required.num_handles)
        .map(|_| OsHandle::invalid())
        .collect();
    let consumed = a
        .serialize_object(&mut object, &mut data, &mut slots)
        .expect("serialize");
    assert_eq!(consumed, required);
}

#[cfg(unix)]
#[test]
fn wrapped_handle_round_trips_out_of_band() {
    let driver = MemoryDriver::new();
    let (a, b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    let mut object = DriverObject::WrappedHandle(live_fd_handle());
    let mut data = [0u8; 8];
    let mut slots = [OsHandle::invalid()];
    let sizes = a
        .serialize_object(&mut object, &mut data, &mut slots)
        .expect("serialize");
    assert_eq!(sizes.num_bytes, 8);
    assert_eq!(sizes.num_handles, 1);

    let decoded = b
        .deserialize_object(&data, vec![slots[0].take()])
        .expect("deserialize");
    let DriverObject::WrappedHandle(handle) = decoded else {
        panic!("expected a wrapped handle");
    };
    assert!(handle.is_valid());
    assert_ne!(unsafe { libc::fcntl(handle.as_raw_fd(), libc::F_GETFD) }, -1);
}

#[test]
fn relay_permission_boundary_matches_the_policy() {
    let driver = MemoryDriver::new();

    // Non-broker peer, no known remote process: forbidden.
    let (denied, _peer) = Transport::create_pair_with(
        driver.clone(),
        TransportOptions::new(Destination::NonBroker).codec(&INLINE),
        TransportOptions::new(Destination::NonBroker).codec(&INLINE),
    )
    .expect("inline pair");
    assert!(!denied.can_transmit_handles());

    let mut object = DriverObject::TransmissibleHandle(OsHandle::from_raw(771));
    let mut data = [0u8; 64];
    let err = denied
        .serialize_object(&mut object, &mut data, &mut [])
        .expect_err("policy must refuse");
    assert!(matches!(err, SerializeError::RelayRequired));
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    // The object survives a refused serialization intact.
    assert!(object.wire_sizes().is_some());
    // Token, not a real handle; release it so drop closes nothing.
    let DriverObject::TransmissibleHandle(handle) = object else {
        panic!("expected the original object back");
    };
    handle.into_raw();

    // Toward a broker: permitted.
    let (toward_broker, _peer) = Transport::create_pair_with(
        driver.clone(),
        TransportOptions::new(Destination::ToBroker).codec(&INLINE),
        TransportOptions::new(Destination::NonBroker).codec(&INLINE),
    )
    .expect("inline pair");
    assert!(toward_broker.can_transmit_handles());

    // Known remote process: permitted even toward a non-broker.
    let (brokering, _peer) = Transport::create_pair_with(
        driver,
        TransportOptions::new(Destination::NonBroker)
            .remote_process(4242)
            .codec(&INLINE),
        TransportOptions::new(Destination::NonBroker).codec(&INLINE),
    )
    .expect("inline pair");
    assert!(brokering.can_transmit_handles());
}

#[test]
fn inline_serialization_round_trips_toward_a_broker() {
    let driver = MemoryDriver::new();
    let (a, b) = Transport::create_pair_with(
        driver,
        TransportOptions::new(Destination::ToBroker).codec(&INLINE),
        TransportOptions::new(Destination::ToBroker).codec(&INLINE),
    )
    .expect("inline pair");

    let mut object = DriverObject::TransmissibleHandle(OsHandle::from_raw(771));
    let required = match a.serialize_object(&mut object, &mut [], &mut []) {
        Err(SerializeError::InsufficientCapacity(required)) => required,
        other => panic!("expected a capacity report, got {other:?}"),
    };
    // Inline profile: header, one 8-byte handle value, empty payload,
    // and no out-of-band slots at all.
    assert_eq!(required.num_bytes, 24);
    assert_eq!(required.num_handles, 0);

    let mut data = vec![0u8; required.num_bytes];
    let consumed = a
        .serialize_object(&mut object, &mut data, &mut [])
        .expect("serialize");
    assert_eq!(consumed, required);
    assert_eq!(u64::from_le_bytes(data[16..24].try_into().unwrap()), 771);

    let decoded = b.deserialize_object(&data, Vec::new()).expect("deserialize");
    let DriverObject::TransmissibleHandle(handle) = decoded else {
        panic!("expected a transmissible handle");
    };
    assert_eq!(handle.raw(), 771);
    handle.into_raw();
}

#[test]
fn truncated_and_overdeclared_headers_are_rejected() {
    let driver = MemoryDriver::new();
    let (_a, b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    for len in 0..8 {
        let err = b
            .deserialize_object(&vec![0u8; len], Vec::new())
            .expect_err("short buffer must fail");
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    // Declared size overruns the buffer.
    let buf = header(64, ObjectKind::WrappedHandle.as_u32(), 8);
    let err = b
        .deserialize_object(&buf, Vec::new())
        .expect_err("overdeclared size must fail");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    // Declared size undercuts the minimal header.
    let buf = header(4, ObjectKind::WrappedHandle.as_u32(), 8);
    assert!(b.deserialize_object(&buf, Vec::new()).is_err());
}

#[test]
fn unknown_kind_is_invalid_argument() {
    let driver = MemoryDriver::new();
    let (_a, b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    let buf = header(8, 9, 8);
    let err = b
        .deserialize_object(&buf, Vec::new())
        .expect_err("unknown kind must fail");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn shared_buffer_kind_is_recognized_but_unimplemented() {
    let driver = MemoryDriver::new();
    let (_a, b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    let buf = header(8, ObjectKind::SharedBuffer.as_u32(), 8);
    let err = b
        .deserialize_object(&buf, Vec::new())
        .expect_err("no shared buffer decoder");
    assert_eq!(err.code(), ErrorCode::Unimplemented);
}

#[cfg(unix)]
#[test]
fn handle_count_must_match_the_object_kind() {
    let driver = MemoryDriver::new();
    let (_a, b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    // A wrapped handle without its handle.
    let buf = header(8, ObjectKind::WrappedHandle.as_u32(), 8);
    let err = b
        .deserialize_object(&buf, Vec::new())
        .expect_err("missing handle must fail");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    // A transport without its endpoint handle.
    let mut buf = header(8, ObjectKind::Transport.as_u32(), 12);
    buf[8..12].copy_from_slice(&Destination::ToBroker.as_u32().to_le_bytes());
    let err = b
        .deserialize_object(&buf, Vec::new())
        .expect_err("missing endpoint must fail");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    // Too many handles for a wrapped handle.
    let buf = header(8, ObjectKind::WrappedHandle.as_u32(), 8);
    let err = b
        .deserialize_object(&buf, vec![live_fd_handle(), live_fd_handle()])
        .expect_err("extra handle must fail");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[cfg(unix)]
#[test]
fn a_larger_declared_header_is_skipped_by_its_size() {
    let driver = MemoryDriver::new();
    let (_a, b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    // A 12-byte header from some future writer; payload is whatever
    // follows the declared size, here nothing.
    let buf = header(12, ObjectKind::TransmissibleHandle.as_u32(), 12);
    let decoded = b
        .deserialize_object(&buf, vec![live_fd_handle()])
        .expect("larger header must still parse");
    assert!(matches!(decoded, DriverObject::TransmissibleHandle(_)));
}

#[test]
fn out_of_band_deserialize_rejects_invalid_handles() {
    let driver = MemoryDriver::new();
    let (_a, b) = Transport::create_pair(driver, Destination::NonBroker, Destination::NonBroker)
        .expect("create pair");

    let buf = header(8, ObjectKind::WrappedHandle.as_u32(), 8);
    let err = b
        .deserialize_object(&buf, vec![OsHandle::invalid()])
        .expect_err("invalid handle must fail");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}

#[test]
fn inline_handle_count_is_bounded_by_the_buffer() {
    let (_a, b) = Transport::create_pair_with(
        MemoryDriver::new(),
        TransportOptions::new(Destination::ToBroker).codec(&INLINE),
        TransportOptions::new(Destination::ToBroker).codec(&INLINE),
    )
    .expect("inline pair");

    let mut buf = header(16, ObjectKind::TransmissibleHandle.as_u32(), 24);
    buf[8..12].copy_from_slice(&5u32.to_le_bytes());
    let err = b
        .deserialize_object(&buf, Vec::new())
        .expect_err("overdeclared handle count must fail");
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
}
