//! RPC engine integration tests
//!
//! Drives the server loop and the client call surface against each other over
//! in-memory streams, with the mock backend behind a real USB worker thread.
//!
//! Run with: `cargo test -p common --test rpc_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockBackend, create_mock_device, create_mock_device_list, with_timeout,
};
use common::{
    Connection, RemoteUsb, ServerSession, Timeouts, UsbCommand, create_usb_bridge,
    serve_connection, spawn_usb_worker,
};
use protocol::{
    CURRENT_VERSION, DeviceDescriptor, FunctionId, Hello, ProtocolError, RetVal, SessionId,
    encode_to_vec,
};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::watch;
use tokio::task::JoinHandle as TaskHandle;

struct Harness {
    client_stream: DuplexStream,
    server: TaskHandle<common::Result<common::ConnectionSummary>>,
    worker: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

fn start(backend: MockBackend) -> Harness {
    let (bridge, worker) = create_usb_bridge();
    let worker = spawn_usb_worker(worker, backend).unwrap();
    let (client_stream, server_stream) = duplex(64 * 1024);
    let (shutdown, shutdown_rx) = watch::channel(false);

    let server = tokio::spawn(serve_connection(
        Connection::new(server_stream, Timeouts::default()),
        ServerSession::new(bridge),
        shutdown_rx,
    ));

    Harness {
        client_stream,
        server,
        worker,
        shutdown,
    }
}

async fn connect(stream: DuplexStream) -> RemoteUsb<DuplexStream> {
    RemoteUsb::handshake(stream, Timeouts::default())
        .await
        .unwrap()
}

fn raw_ints(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

// ============================================================================
// Session Scenarios
// ============================================================================

#[tokio::test]
async fn test_init_succeeds() {
    let backend = MockBackend::new(Vec::new());
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    assert_eq!(usb.init().await.unwrap(), RetVal::Success);
    assert_eq!(backend.init_calls(), 1);
    assert_eq!(usb.server_version(), CURRENT_VERSION);

    usb.disconnect().await.unwrap();
    let summary = h.server.await.unwrap().unwrap();
    assert_eq!(summary.calls, 1);
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_full_client_sequence() {
    let backend = MockBackend::new(create_mock_device_list(3));
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    assert_eq!(usb.init().await.unwrap(), RetVal::Success);

    let devices = usb.list_devices().await.unwrap();
    let addrs: Vec<u8> = devices.iter().map(|d| d.device_address).collect();
    assert_eq!(addrs, vec![1, 2, 3]);
    let first = *devices.first().unwrap();

    let (ret, descriptor) = usb.device_descriptor(&first).await.unwrap();
    assert_eq!(ret, RetVal::Success);
    assert_eq!(descriptor.length, DeviceDescriptor::LENGTH);
    assert_eq!(descriptor.product_id, 1);

    let (ret, handle) = usb.open(&first).await.unwrap();
    assert_eq!(ret, RetVal::Success);
    assert_eq!(handle.dev, first);

    assert_eq!(usb.claim_interface(0).await.unwrap(), RetVal::Success);
    assert!(backend.is_claimed(first.session_id, 0));
    assert_eq!(usb.release_interface(0).await.unwrap(), RetVal::Success);
    assert!(!backend.is_claimed(first.session_id, 0));

    usb.close().await.unwrap();
    usb.exit().await.unwrap();
    usb.disconnect().await.unwrap();

    let summary = h.server.await.unwrap().unwrap();
    assert_eq!(summary.calls, 8);
    assert_eq!(backend.open_handles(), 0);
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_descriptor_of_unplugged_device() {
    let backend = MockBackend::new(create_mock_device_list(2));
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    let devices = usb.list_devices().await.unwrap();
    let second = *devices.get(1).unwrap();
    backend.unplug(second.session_id);

    let (ret, descriptor) = usb.device_descriptor(&second).await.unwrap();
    assert_eq!(ret, RetVal::Failure);
    assert_eq!(descriptor, DeviceDescriptor::default());

    // Connection survives the failure
    assert_eq!(usb.list_devices().await.unwrap().len(), 1);

    usb.disconnect().await.unwrap();
    h.server.await.unwrap().unwrap();
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_peer_close_releases_live_handle() {
    let backend = MockBackend::new(vec![create_mock_device(1, 5, 0x05ac, 0x1281)]);
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    let (ret, handle) = usb.open_with_vid_pid(0x05ac, 0x1281).await.unwrap();
    assert_eq!(ret, RetVal::Success);
    assert_eq!(handle.dev.session_id, SessionId::from_location(1, 5));
    assert_eq!(backend.open_handles(), 1);

    drop(usb);
    let result = with_timeout(DEFAULT_TEST_TIMEOUT, h.server).await.unwrap();
    assert!(result.unwrap().is_ok());
    assert_eq!(backend.open_handles(), 0);
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_exit_keeps_connection_open() {
    let backend = MockBackend::new(create_mock_device_list(1));
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    let first = *usb.list_devices().await.unwrap().first().unwrap();
    usb.open(&first).await.unwrap();
    usb.exit().await.unwrap();

    // Exit released the handle, and the loop is still reading
    assert_eq!(usb.init().await.unwrap(), RetVal::Success);
    assert_eq!(backend.open_handles(), 0);

    usb.disconnect().await.unwrap();
    h.server.await.unwrap().unwrap();
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_operations_without_open_device_fail() {
    let h = start(MockBackend::new(create_mock_device_list(1)));
    let mut usb = connect(h.client_stream).await;

    assert_eq!(usb.claim_interface(0).await.unwrap(), RetVal::Failure);
    assert_eq!(usb.release_interface(0).await.unwrap(), RetVal::Failure);
    let (ret, handle) = usb.open_with_vid_pid(0xffff, 0xffff).await.unwrap();
    assert_eq!(ret, RetVal::Failure);
    assert!(handle.dev.is_zero());

    usb.disconnect().await.unwrap();
    h.server.await.unwrap().unwrap();
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_device_level_open_failure_keeps_connection() {
    let backend = MockBackend::new(create_mock_device_list(2));
    backend.fail_open(true);
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    let first = *usb.list_devices().await.unwrap().first().unwrap();
    let (ret, handle) = usb.open(&first).await.unwrap();
    assert_eq!(ret, RetVal::Failure);
    assert!(handle.dev.is_zero());

    let (ret, handle) = usb.open_with_vid_pid(0x1234, 0x0002).await.unwrap();
    assert_eq!(ret, RetVal::Failure);
    assert!(handle.dev.is_zero());

    assert_eq!(backend.open_handles(), 0);
    // No live handle was left behind
    assert_eq!(usb.claim_interface(0).await.unwrap(), RetVal::Failure);

    backend.fail_open(false);
    let (ret, handle) = usb.open(&first).await.unwrap();
    assert_eq!(ret, RetVal::Success);
    assert_eq!(handle.dev, first);
    assert_eq!(backend.open_handles(), 1);

    usb.disconnect().await.unwrap();
    h.server.await.unwrap().unwrap();
    assert_eq!(backend.open_handles(), 0);
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_hot_plugged_device_is_found() {
    let backend = MockBackend::new(Vec::new());
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    assert!(usb.list_devices().await.unwrap().is_empty());

    backend.plug(create_mock_device(2, 3, 0x05ac, 0x1281));
    let devices = usb.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);

    let (ret, desc) = usb.device_descriptor(devices.first().unwrap()).await.unwrap();
    assert_eq!(ret, RetVal::Success);
    assert_eq!((desc.vendor_id, desc.product_id), (0x05ac, 0x1281));

    let (ret, _) = usb.open_with_vid_pid(0x05ac, 0x1281).await.unwrap();
    assert_eq!(ret, RetVal::Success);

    usb.disconnect().await.unwrap();
    h.server.await.unwrap().unwrap();
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_enumeration_failure_is_empty_list() {
    let backend = MockBackend::new(create_mock_device_list(2));
    backend.fail_enumeration(true);
    let h = start(backend);
    let mut usb = connect(h.client_stream).await;

    assert!(usb.list_devices().await.unwrap().is_empty());

    usb.disconnect().await.unwrap();
    h.server.await.unwrap().unwrap();
    h.worker.join().unwrap();
}

// ============================================================================
// Protocol Failures
// ============================================================================

#[tokio::test]
async fn test_unknown_function_is_answered_and_not_fatal() {
    let h = start(MockBackend::new(Vec::new()));
    let mut raw = h.client_stream;

    raw.write_all(&encode_to_vec(&Hello {
        version: CURRENT_VERSION,
    }))
    .await
    .unwrap();
    let mut ack = [0u8; 16];
    raw.read_exact(&mut ack).await.unwrap();

    raw.write_all(&raw_ints(&[99])).await.unwrap();
    let mut reply = [0u8; 4];
    raw.read_exact(&mut reply).await.unwrap();
    assert_eq!(i32::from_le_bytes(reply), RetVal::FAILURE_CODE);

    raw.write_all(&raw_ints(&[FunctionId::Init.as_i32()]))
        .await
        .unwrap();
    raw.read_exact(&mut reply).await.unwrap();
    assert_eq!(i32::from_le_bytes(reply), RetVal::SUCCESS_CODE);

    raw.shutdown().await.unwrap();
    drop(raw);
    let summary = h.server.await.unwrap().unwrap();
    assert_eq!(summary.unknown_functions, 1);
    assert_eq!(summary.calls, 1);
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_out_of_range_field_is_fatal() {
    let h = start(MockBackend::new(Vec::new()));
    let mut raw = h.client_stream;

    raw.write_all(&encode_to_vec(&Hello {
        version: CURRENT_VERSION,
    }))
    .await
    .unwrap();
    let mut ack = [0u8; 16];
    raw.read_exact(&mut ack).await.unwrap();

    // GetDescriptor with a bus number that does not fit a u8
    raw.write_all(&raw_ints(&[FunctionId::GetDescriptor.as_i32(), 300, 1, 1, 0x0101]))
        .await
        .unwrap();

    let result = h.server.await.unwrap();
    assert!(matches!(
        result,
        Err(common::Error::Protocol(ProtocolError::FieldOutOfRange { .. }))
    ));
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_out_of_range_argument_is_failure() {
    let backend = MockBackend::new(create_mock_device_list(1));
    let h = start(backend.clone());
    let mut raw = h.client_stream;

    raw.write_all(&encode_to_vec(&Hello {
        version: CURRENT_VERSION,
    }))
    .await
    .unwrap();
    let mut ack = [0u8; 16];
    raw.read_exact(&mut ack).await.unwrap();

    let mut reply = [0u8; 4];
    for function in [FunctionId::ClaimInterface, FunctionId::ReleaseInterface] {
        raw.write_all(&raw_ints(&[function.as_i32(), 300]))
            .await
            .unwrap();
        raw.read_exact(&mut reply).await.unwrap();
        assert_eq!(i32::from_le_bytes(reply), RetVal::FAILURE_CODE);
    }

    // Vendor id does not fit a u16: zero handle, no retval on the wire
    raw.write_all(&raw_ints(&[FunctionId::OpenWithVidPid.as_i32(), 0x1_1234, 1]))
        .await
        .unwrap();
    let mut handle = [0u8; 16];
    raw.read_exact(&mut handle).await.unwrap();
    assert_eq!(handle, [0u8; 16]);
    assert_eq!(backend.open_handles(), 0);

    // Still serving
    raw.write_all(&raw_ints(&[FunctionId::Init.as_i32()]))
        .await
        .unwrap();
    raw.read_exact(&mut reply).await.unwrap();
    assert_eq!(i32::from_le_bytes(reply), RetVal::SUCCESS_CODE);

    raw.shutdown().await.unwrap();
    drop(raw);
    let summary = h.server.await.unwrap().unwrap();
    assert_eq!(summary.calls, 4);
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_timed_out_call_breaks_connection() {
    let (client_stream, mut raw) = duplex(4096);
    let server = tokio::spawn(async move {
        let mut hello = [0u8; 16];
        raw.read_exact(&mut hello).await.unwrap();
        let version = [
            i32::from(CURRENT_VERSION.major),
            i32::from(CURRENT_VERSION.minor),
            i32::from(CURRENT_VERSION.patch),
            RetVal::SUCCESS_CODE,
        ];
        raw.write_all(&raw_ints(&version)).await.unwrap();

        // GetDescriptor request, answered after the client gave up
        let mut request = [0u8; 20];
        raw.read_exact(&mut request).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut late = vec![0; 14];
        late[7] = 0x05ac;
        late[8] = 0x1281;
        late.push(RetVal::SUCCESS_CODE);
        raw.write_all(&raw_ints(&late)).await.unwrap();
        raw
    });

    let timeouts = Timeouts {
        io: Some(Duration::from_millis(50)),
        idle: None,
    };
    let mut usb = RemoteUsb::handshake(client_stream, timeouts).await.unwrap();
    assert!(usb.is_usable());

    let a = create_mock_device(1, 1, 0x05ac, 0x1281).device;
    let b = create_mock_device(1, 2, 0x1234, 0x0002).device;

    let result = usb.device_descriptor(&a).await;
    assert!(matches!(result, Err(ProtocolError::Timeout(_))));
    assert!(!usb.is_usable());

    // Let the late answer land; it must not be read as the next reply
    let _raw = server.await.unwrap();
    let result = usb.device_descriptor(&b).await;
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    assert!(usb.init().await.is_err());
}

#[tokio::test]
async fn test_bad_magic_rejected() {
    let h = start(MockBackend::new(Vec::new()));
    let mut raw = h.client_stream;

    raw.write_all(&raw_ints(&[0x1234, 1, 0, 0])).await.unwrap();

    let result = h.server.await.unwrap();
    assert!(matches!(
        result,
        Err(common::Error::Protocol(ProtocolError::BadMagic(0x1234)))
    ));
    h.worker.join().unwrap();
}

#[tokio::test]
async fn test_shutdown_signal_ends_loop() {
    let backend = MockBackend::new(create_mock_device_list(1));
    let h = start(backend.clone());
    let mut usb = connect(h.client_stream).await;

    let first = *usb.list_devices().await.unwrap().first().unwrap();
    usb.open(&first).await.unwrap();

    h.shutdown.send(true).unwrap();
    let result = with_timeout(DEFAULT_TEST_TIMEOUT, h.server).await.unwrap();
    assert!(result.unwrap().is_ok());
    assert_eq!(backend.open_handles(), 0);

    // Server hung up
    assert!(usb.init().await.is_err());
    drop(usb);
    h.worker.join().unwrap();
}

// ============================================================================
// Bridge Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    let backend = MockBackend::new(create_mock_device_list(4));
    let (bridge, worker) = create_usb_bridge();
    let thread = spawn_usb_worker(worker, backend.clone()).unwrap();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let bridge = bridge.clone();
        tasks.push(tokio::spawn(async move {
            bridge
                .request(|response| UsbCommand::ListDevices { response })
                .await
                .unwrap()
                .unwrap()
                .len()
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), 4);
    }
    assert_eq!(backend.enumerations(), 16);

    bridge.shutdown().await.unwrap();
    thread.join().unwrap();
}

#[tokio::test]
async fn test_two_sessions_keep_their_own_handles() {
    let backend = MockBackend::new(create_mock_device_list(2));
    let (bridge, worker) = create_usb_bridge();
    let thread = spawn_usb_worker(worker, backend.clone()).unwrap();

    let mut a = ServerSession::new(bridge.clone());
    let mut b = ServerSession::new(bridge.clone());

    a.open(SessionId::from_location(1, 1)).await.unwrap();
    b.open(SessionId::from_location(1, 2)).await.unwrap();
    assert_eq!(backend.open_handles(), 2);

    a.finish().await;
    assert_eq!(
        backend.opened_sessions(),
        vec![SessionId::from_location(1, 2)]
    );

    b.finish().await;
    drop((a, b, bridge));
    thread.join().unwrap();
}
