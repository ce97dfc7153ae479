//! Integration tests for the printer bridge: per-handle ordering,
//! cross-handle concurrency, dispose/teardown semantics and the
//! permission broker.

use escpos_bridge::{BackendKind, BridgeError, PrinterBridge};
use escpos_printer::{PrinterError, PrinterResult, Transport};
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// In-memory transport that records every write as one entry.
#[derive(Default)]
struct MockTransport {
    open: bool,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    buffered: Arc<Mutex<Vec<u8>>>,
    write_delay: Duration,
    fail_open: bool,
    fail_next_write: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl MockTransport {
    fn with_writes(writes: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
        Self {
            writes,
            ..Default::default()
        }
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> PrinterResult<()> {
        if self.fail_open {
            return Err(PrinterError::Connect("mock open failure".to_string()));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<u8>> {
        Ok(std::mem::take(&mut *self.buffered.lock().unwrap()))
    }
}

#[tokio::test]
async fn sends_on_one_handle_apply_in_submission_order() {
    let bridge = PrinterBridge::new();
    let writes = Arc::new(Mutex::new(Vec::new()));
    let handle = bridge.create_session_with(Box::new(MockTransport::with_writes(writes.clone())));

    bridge.connect(handle).await.unwrap();

    // join! polls in declaration order, so the lane sees the sends in
    // exactly this sequence even though they complete concurrently.
    let (a, b, c, d) = tokio::join!(
        bridge.send(handle, vec![0], 0),
        bridge.send(handle, vec![1], 0),
        bridge.send(handle, vec![2], 0),
        bridge.send(handle, vec![3], 0),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    d.unwrap();

    let log = writes.lock().unwrap();
    assert_eq!(*log, vec![vec![0], vec![1], vec![2], vec![3]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_callers_keep_per_caller_order() {
    let bridge = Arc::new(PrinterBridge::new());
    let writes = Arc::new(Mutex::new(Vec::new()));
    let handle = bridge.create_session_with(Box::new(MockTransport::with_writes(writes.clone())));
    bridge.connect(handle).await.unwrap();

    let mut tasks = Vec::new();
    for caller in 0u8..4 {
        let bridge = bridge.clone();
        tasks.push(tokio::spawn(async move {
            for seq in 0u8..8 {
                // Sequence marker: caller id in the high nibble.
                bridge
                    .send(handle, vec![(caller << 4) | seq], 0)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let log = writes.lock().unwrap();
    assert_eq!(log.len(), 32);

    // Within each caller the markers must appear strictly in order.
    for caller in 0u8..4 {
        let seen: Vec<u8> = log
            .iter()
            .map(|payload| payload[0])
            .filter(|marker| marker >> 4 == caller)
            .collect();
        let expected: Vec<u8> = (0u8..8).map(|seq| (caller << 4) | seq).collect();
        assert_eq!(seen, expected, "caller {caller} markers reordered");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn different_handles_run_concurrently_without_interleaving() {
    let bridge = Arc::new(PrinterBridge::new());

    let writes_a = Arc::new(Mutex::new(Vec::new()));
    let writes_b = Arc::new(Mutex::new(Vec::new()));
    let slow = |writes: &Arc<Mutex<Vec<Vec<u8>>>>| MockTransport {
        writes: writes.clone(),
        write_delay: Duration::from_millis(100),
        ..Default::default()
    };
    let a = bridge.create_session_with(Box::new(slow(&writes_a)));
    let b = bridge.create_session_with(Box::new(slow(&writes_b)));
    bridge.connect(a).await.unwrap();
    bridge.connect(b).await.unwrap();

    let start = Instant::now();
    let (ra, rb) = tokio::join!(
        {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                for seq in 0u8..3 {
                    bridge.send(a, vec![0xA0 | seq], 0).await.unwrap();
                }
            })
        },
        {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                for seq in 0u8..3 {
                    bridge.send(b, vec![0xB0 | seq], 0).await.unwrap();
                }
            })
        },
    );
    ra.unwrap();
    rb.unwrap();

    // Two lanes of 3x100ms writes: serial execution would take ~600ms.
    assert!(
        start.elapsed() < Duration::from_millis(500),
        "lanes did not run concurrently: {:?}",
        start.elapsed()
    );

    // Each stream saw only its own bytes, in order.
    let log_a: Vec<u8> = writes_a.lock().unwrap().iter().map(|p| p[0]).collect();
    let log_b: Vec<u8> = writes_b.lock().unwrap().iter().map(|p| p[0]).collect();
    assert_eq!(log_a, vec![0xA0, 0xA1, 0xA2]);
    assert_eq!(log_b, vec![0xB0, 0xB1, 0xB2]);
}

#[tokio::test]
async fn send_without_connect_is_not_connected() {
    let bridge = PrinterBridge::new();
    let handle = bridge.create_session_with(Box::new(MockTransport::default()));

    match bridge.send(handle, vec![0x1B, 0x40], 0).await {
        Err(BridgeError::Printer(e @ PrinterError::NotConnected)) => assert_eq!(e.code(), 2),
        other => panic!("expected NotConnected, got {other:?}"),
    }
    assert!(!bridge.is_connected(handle).unwrap());
}

#[tokio::test]
async fn write_failure_forces_disconnect_until_reconnected() {
    let bridge = PrinterBridge::new();
    let fail_next_write = Arc::new(AtomicBool::new(false));
    let transport = MockTransport {
        fail_next_write: fail_next_write.clone(),
        ..Default::default()
    };
    let handle = bridge.create_session_with(Box::new(transport));

    bridge.connect(handle).await.unwrap();
    fail_next_write.store(true, Ordering::SeqCst);

    match bridge.send(handle, vec![1], 0).await {
        Err(BridgeError::Printer(PrinterError::Send(_))) => {}
        other => panic!("expected Send error, got {other:?}"),
    }
    assert!(!bridge.is_connected(handle).unwrap());

    // Not silently retried: the next send demands a fresh connect.
    match bridge.send(handle, vec![2], 0).await {
        Err(BridgeError::Printer(PrinterError::NotConnected)) => {}
        other => panic!("expected NotConnected, got {other:?}"),
    }

    bridge.connect(handle).await.unwrap();
    bridge.send(handle, vec![3], 0).await.unwrap();
}

#[tokio::test]
async fn read_returns_buffered_or_empty() {
    let bridge = PrinterBridge::new();
    let buffered = Arc::new(Mutex::new(vec![0x16]));
    let transport = MockTransport {
        buffered: buffered.clone(),
        ..Default::default()
    };
    let handle = bridge.create_session_with(Box::new(transport));

    bridge.connect(handle).await.unwrap();
    assert_eq!(bridge.read(handle).await.unwrap(), vec![0x16]);
    // Nothing buffered is a zero-length result, not an error.
    assert_eq!(bridge.read(handle).await.unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn is_connected_tracks_lane_operations() {
    let bridge = PrinterBridge::new();
    let handle = bridge.create_session_with(Box::new(MockTransport::default()));

    assert!(!bridge.is_connected(handle).unwrap());
    bridge.connect(handle).await.unwrap();
    assert!(bridge.is_connected(handle).unwrap());
    bridge.disconnect(handle).await.unwrap();
    assert!(!bridge.is_connected(handle).unwrap());
}

#[tokio::test]
async fn connect_failure_surfaces_and_leaves_disconnected() {
    let bridge = PrinterBridge::new();
    let transport = MockTransport {
        fail_open: true,
        ..Default::default()
    };
    let handle = bridge.create_session_with(Box::new(transport));

    match bridge.connect(handle).await {
        Err(BridgeError::Printer(PrinterError::Connect(_))) => {}
        other => panic!("expected Connect error, got {other:?}"),
    }
    assert!(!bridge.is_connected(handle).unwrap());
}

#[tokio::test]
async fn usb_backend_reports_unresolvable_addresses_as_device_not_found() {
    let bridge = PrinterBridge::new();
    for address in ["", "invalid-address", "abc:def", "1234"] {
        let handle = bridge.create_session(BackendKind::Usb, address);
        match bridge.connect(handle).await {
            Err(BridgeError::Printer(e @ PrinterError::DeviceNotFound(_))) => {
                assert_eq!(e.code(), 6)
            }
            other => panic!("expected DeviceNotFound for {address:?}, got {other:?}"),
        }
        assert!(bridge.dispose_session(handle).await);
    }
}

#[tokio::test]
async fn dispose_drains_queued_sends_then_disconnects() {
    let bridge = Arc::new(PrinterBridge::new());
    let writes = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(AtomicUsize::new(0));
    let transport = MockTransport {
        writes: writes.clone(),
        closes: closes.clone(),
        write_delay: Duration::from_millis(20),
        ..Default::default()
    };
    let handle = bridge.create_session_with(Box::new(transport));
    bridge.connect(handle).await.unwrap();

    // Queue sends and dispose in one submission sequence.
    let (s1, s2, disposed) = tokio::join!(
        bridge.send(handle, vec![1], 0),
        bridge.send(handle, vec![2], 0),
        bridge.dispose_session(handle),
    );
    s1.unwrap();
    s2.unwrap();
    assert!(disposed);

    // Both sends completed before the final disconnect.
    assert_eq!(*writes.lock().unwrap(), vec![vec![1], vec![2]]);
    assert!(closes.load(Ordering::SeqCst) >= 1);

    // The handle is gone: lookups fail and a second dispose is false.
    match bridge.send(handle, vec![3], 0).await {
        Err(BridgeError::SessionNotFound(_)) => {}
        other => panic!("expected SessionNotFound, got {other:?}"),
    }
    assert!(!bridge.dispose_session(handle).await);
}

#[tokio::test]
async fn dispose_of_never_used_session_reports_existence() {
    let bridge = PrinterBridge::new();
    let handle = bridge.create_session_with(Box::new(MockTransport::default()));
    assert!(bridge.dispose_session(handle).await);
    assert!(!bridge.dispose_session(handle).await);
}

#[tokio::test]
async fn shutdown_stops_all_lanes_and_rejects_later_operations() {
    let bridge = PrinterBridge::new();
    let a = bridge.create_session_with(Box::new(MockTransport::default()));
    let b = bridge.create_session_with(Box::new(MockTransport::default()));
    bridge.connect(a).await.unwrap();
    bridge.connect(b).await.unwrap();

    let ticket = bridge.permissions().request("1234:5678:001");
    bridge.shutdown().await;

    for handle in [a, b] {
        match bridge.connect(handle).await {
            Err(BridgeError::SessionNotFound(_)) => {}
            other => panic!("expected SessionNotFound, got {other:?}"),
        }
    }

    // Pending permission waiters are told, not silently dropped.
    match ticket.granted().await {
        Err(BridgeError::PermissionAbandoned) => {}
        other => panic!("expected PermissionAbandoned, got {other:?}"),
    }
}

#[tokio::test]
async fn permission_grant_resumes_exactly_the_waiter() {
    let bridge = PrinterBridge::new();
    let broker = bridge.permissions();

    let ticket = broker.request("1234:5678:002");
    assert_eq!(broker.pending_count(), 1);
    assert!(broker.resolve("1234:5678:002", true));
    assert!(ticket.granted().await.unwrap());
    assert_eq!(broker.pending_count(), 0);

    // Denials are delivered the same way.
    let ticket = broker.request("1234:5678:002");
    assert!(broker.resolve("1234:5678:002", false));
    assert!(!ticket.granted().await.unwrap());

    // No waiter, no resumption.
    assert!(!broker.resolve("1234:5678:002", true));
}

#[tokio::test]
async fn new_permission_request_supersedes_previous_for_same_device() {
    let bridge = PrinterBridge::new();
    let broker = bridge.permissions();

    let first = broker.request("1234:5678:002");
    let second = broker.request("1234:5678:002");
    assert_eq!(broker.pending_count(), 1);

    match first.granted().await {
        Err(BridgeError::PermissionAbandoned) => {}
        other => panic!("expected PermissionAbandoned, got {other:?}"),
    }

    assert!(broker.resolve_device(1234, 5678, "/dev/bus/usb/001/002", true));
    assert!(second.granted().await.unwrap());
}

#[tokio::test]
async fn permission_resolution_falls_back_to_short_key() {
    let bridge = PrinterBridge::new();
    let broker = bridge.permissions();

    let ticket = broker.request("1234:5678");
    assert!(broker.resolve_device(1234, 5678, "/dev/bus/usb/001/002", true));
    assert!(ticket.granted().await.unwrap());
}
