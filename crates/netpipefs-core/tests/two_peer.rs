//! Two in-process peers wired through a Unix socket pair, each running its
//! own registry and dispatcher, driving the engine end to end.

use std::os::unix::net::UnixStream;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use netpipefs_core::{Dispatcher, Mode, PeerLink, PipeError, Registry};
use netpipefs_transport::LinkStream;
use netpipefs_wire::MessageReader;

struct Node {
    registry: Arc<Registry>,
    link: Arc<PeerLink>,
    dispatcher: Option<Dispatcher>,
}

impl Node {
    /// Sever the link from this side; both dispatchers observe EOF.
    fn sever(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
            dispatcher.join();
        }
    }
}

fn node(stream: LinkStream, local_capacity: usize, remote_capacity: usize) -> Node {
    let reader = MessageReader::new(stream.try_clone().expect("stream should clone"));
    let link = Arc::new(PeerLink::new(stream, remote_capacity));
    let registry = Arc::new(Registry::new(Arc::clone(&link), local_capacity));
    let dispatcher =
        Dispatcher::spawn(reader, Arc::clone(&registry)).expect("dispatcher should spawn");
    Node {
        registry,
        link,
        dispatcher: Some(dispatcher),
    }
}

fn pair(capacity_a: usize, capacity_b: usize) -> (Node, Node) {
    let (sa, sb) = UnixStream::pair().expect("socket pair should be creatable");
    (
        node(LinkStream::from_unix(sa), capacity_a, capacity_b),
        node(LinkStream::from_unix(sb), capacity_b, capacity_a),
    )
}

fn wait_until(mut cond: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn simple_echo() {
    let (a, b) = pair(64, 64);

    let wx = a.registry.open("/x", Mode::Write, false).unwrap();
    let rx = b.registry.open("/x", Mode::Read, false).unwrap();

    assert_eq!(wx.send(b"hello", false).unwrap(), 5);

    let mut buf = [0u8; 5];
    assert_eq!(rx.read(&mut buf, false).unwrap(), 5);
    assert_eq!(&buf, b"hello");

    wx.close(&a.registry, Mode::Write).unwrap();
    rx.close(&b.registry, Mode::Read).unwrap();

    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn credit_backpressure() {
    let (a, b) = pair(8, 8);

    let wx = a.registry.open("/x", Mode::Write, false).unwrap();
    let rx = b.registry.open("/x", Mode::Read, false).unwrap();

    let payload: Vec<u8> = (0u8..20).collect();
    let (done_tx, done_rx) = mpsc::channel();
    let writer = thread::spawn({
        let wx = Arc::clone(&wx);
        let payload = payload.clone();
        move || {
            let n = wx.send(&payload, false).unwrap();
            done_tx.send(()).unwrap();
            n
        }
    });

    // 8 on the wire, 8 written ahead, then the call parks on the last 4
    wait_until(|| wx.stats().pending_writes == 1, "the writer to park");
    let stats = wx.stats();
    assert_eq!(stats.remote_size, 8);
    assert_eq!(stats.buffered, 8);
    assert!(done_rx.try_recv().is_err(), "writer must still be parked");

    let mut received = Vec::new();
    while received.len() < payload.len() {
        let mut chunk = [0u8; 4];
        let n = rx.read(&mut chunk, false).unwrap();
        assert!(n > 0, "no EOF expected mid-transfer");
        received.extend_from_slice(&chunk[..n]);
    }

    assert_eq!(writer.join().unwrap(), 20);
    assert_eq!(received, payload);

    wx.close(&a.registry, Mode::Write).unwrap();
    rx.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn late_reader_drains_then_sees_eof() {
    let (a, b) = pair(64, 64);

    let wx = a.registry.open("/x", Mode::Write, false).unwrap();
    assert_eq!(wx.send(b"abc", false).unwrap(), 3);
    wx.close(&a.registry, Mode::Write).unwrap();
    assert!(a.registry.is_empty());

    // open only once the peer's close has been observed
    wait_until(
        || {
            b.registry
                .get("/x")
                .map(|pipe| {
                    let stats = pipe.stats();
                    stats.writers == 0 && stats.buffered == 3
                })
                .unwrap_or(false)
        },
        "the write/close to be observed",
    );

    let rx = b.registry.open("/x", Mode::Read, false).unwrap();
    let mut buf = [0u8; 3];
    assert_eq!(rx.read(&mut buf, false).unwrap(), 3);
    assert_eq!(&buf, b"abc");
    assert_eq!(rx.read(&mut buf, false).unwrap(), 0, "clean EOF after drain");

    rx.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn nonblocking_open_race() {
    let (a, b) = pair(64, 64);

    let err = a.registry.open("/y", Mode::Write, true).unwrap_err();
    assert_eq!(err, PipeError::WouldBlock);
    assert!(
        a.registry.is_empty(),
        "a failed creating open must not leave an entry"
    );

    let reader = thread::spawn({
        let registry = Arc::clone(&b.registry);
        move || registry.open("/y", Mode::Read, false).unwrap()
    });

    wait_until(
        || {
            a.registry
                .get("/y")
                .map(|pipe| pipe.stats().readers == 1)
                .unwrap_or(false)
        },
        "the peer's reader to become visible",
    );

    let wy = a.registry.open("/y", Mode::Write, true).unwrap();
    let ry = reader.join().unwrap();

    wy.close(&a.registry, Mode::Write).unwrap();
    ry.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn forced_teardown_unblocks_everyone() {
    let (mut a, b) = pair(8, 8);

    let wx = a.registry.open("/x", Mode::Write, false).unwrap();
    let rx = b.registry.open("/x", Mode::Read, false).unwrap();
    let wy = a.registry.open("/y", Mode::Write, false).unwrap();
    let ry = b.registry.open("/y", Mode::Read, false).unwrap();

    // a writer parked mid-transfer (16 of 100 accepted)
    let writer = thread::spawn({
        let wx = Arc::clone(&wx);
        move || wx.send(&[7u8; 100], false)
    });
    wait_until(|| wx.stats().pending_writes == 1, "the writer to park");

    // a reader parked on an empty pipe
    let parked_reader = thread::spawn({
        let ry = Arc::clone(&ry);
        move || {
            let mut buf = [0u8; 4];
            ry.read(&mut buf, false)
        }
    });
    wait_until(|| ry.stats().pending_reads == 1, "the reader to park");

    // an open parked waiting for a writer that will never come
    let parked_open = thread::spawn({
        let registry = Arc::clone(&b.registry);
        move || registry.open("/z", Mode::Read, false)
    });
    wait_until(
        || {
            b.registry
                .get("/z")
                .map(|pipe| pipe.stats().readers == 1)
                .unwrap_or(false)
        },
        "the open to park",
    );

    a.sever();

    // partial write reports the bytes actually accepted; zero-progress
    // waiters report EPIPE / ENOENT
    assert_eq!(writer.join().unwrap(), Ok(16));
    assert_eq!(parked_reader.join().unwrap(), Err(PipeError::BrokenPipe));
    assert_eq!(
        parked_open.join().unwrap().unwrap_err(),
        PipeError::NotFound
    );

    wait_until(
        || rx.stats().force_exit && ry.stats().force_exit,
        "teardown to reach every pipe",
    );

    // closing the surviving handles frees their pipes; the peer's aborted
    // open of /z could not announce its undo over the dead link, so only
    // that mirror entry may linger until the registry itself goes away
    wx.close(&a.registry, Mode::Write).unwrap();
    wy.close(&a.registry, Mode::Write).unwrap();
    rx.close(&b.registry, Mode::Read).unwrap();
    ry.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || {
            a.registry.get("/x").is_none()
                && a.registry.get("/y").is_none()
                && b.registry.is_empty()
        },
        "all closed pipes to be freed",
    );
}

#[test]
fn opposite_mode_rejected_locally() {
    let (a, b) = pair(64, 64);

    let wz = b.registry.open("/z", Mode::Write, false).unwrap();
    let rz = a.registry.open("/z", Mode::Read, false).unwrap();

    let err = a.registry.open("/z", Mode::Write, false).unwrap_err();
    assert_eq!(err, PipeError::NotPermitted);

    rz.close(&a.registry, Mode::Read).unwrap();
    wz.close(&b.registry, Mode::Write).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn exact_fill_blocks_until_the_peer_reads() {
    let (a, b) = pair(8, 8);

    let wx = a.registry.open("/x", Mode::Write, false).unwrap();
    let rx = b.registry.open("/x", Mode::Read, false).unwrap();

    // capacity + credit accepted without blocking
    assert_eq!(wx.send(&[1u8; 16], false).unwrap(), 16);
    // the next byte cannot move
    assert_eq!(wx.send(b"!", true).unwrap_err(), PipeError::WouldBlock);

    let mut one = [0u8; 1];
    assert_eq!(rx.read(&mut one, false).unwrap(), 1);

    // the returned credit lets exactly one more byte through
    wait_until(|| wx.send(b"!", true).is_ok(), "credit to come back");

    // drain the remaining 16 bytes so both sides close clean
    let mut rest = [0u8; 16];
    let mut got = 0usize;
    while got < rest.len() {
        let n = rx.read(&mut rest[got..], false).unwrap();
        assert!(n > 0);
        got += n;
    }

    wx.close(&a.registry, Mode::Write).unwrap();
    rx.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn nonblocking_read_distinguishes_eagain_from_eof() {
    let (a, b) = pair(64, 64);

    let wx = a.registry.open("/x", Mode::Write, false).unwrap();
    let rx = b.registry.open("/x", Mode::Read, false).unwrap();

    let mut buf = [0u8; 4];
    // empty buffer, writer present
    assert_eq!(rx.read(&mut buf, true).unwrap_err(), PipeError::WouldBlock);

    wx.close(&a.registry, Mode::Write).unwrap();
    wait_until(|| rx.stats().writers == 0, "the close to be observed");

    // empty buffer, writer absent
    assert_eq!(rx.read(&mut buf, true).unwrap(), 0);

    rx.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn close_for_an_unknown_path_is_a_noop() {
    let (a, b) = pair(64, 64);

    b.link.send_close("/ghost", Mode::Write).unwrap();

    // the dispatcher shrugged it off and the link still works
    let wx = a.registry.open("/x", Mode::Write, false).unwrap();
    let rx = b.registry.open("/x", Mode::Read, false).unwrap();
    assert_eq!(wx.send(b"ok", false).unwrap(), 2);
    let mut buf = [0u8; 2];
    assert_eq!(rx.read(&mut buf, false).unwrap(), 2);
    assert_eq!(&buf, b"ok");
    assert!(a.registry.get("/ghost").is_none());

    wx.close(&a.registry, Mode::Write).unwrap();
    rx.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}

#[test]
fn bytes_arrive_in_order_across_many_calls() {
    let (a, b) = pair(32, 32);

    let wx = a.registry.open("/stream", Mode::Write, false).unwrap();
    let rx = b.registry.open("/stream", Mode::Read, false).unwrap();

    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

    let writer = thread::spawn({
        let wx = Arc::clone(&wx);
        let payload = payload.clone();
        move || {
            let mut offset = 0usize;
            while offset < payload.len() {
                let end = (offset + 100).min(payload.len());
                let n = wx.send(&payload[offset..end], false).unwrap();
                assert!(n > 0);
                offset += n;
            }
            offset
        }
    });

    let mut received = Vec::new();
    while received.len() < payload.len() {
        let mut chunk = [0u8; 64];
        let want = chunk.len().min(payload.len() - received.len());
        let n = rx.read(&mut chunk[..want], false).unwrap();
        assert!(n > 0, "no EOF expected mid-transfer");
        received.extend_from_slice(&chunk[..n]);
    }

    assert_eq!(writer.join().unwrap(), payload.len());
    // conservation and per-writer ordering
    assert_eq!(received, payload);

    let stats = wx.stats();
    assert!(stats.remote_size <= stats.remote_max);

    wx.close(&a.registry, Mode::Write).unwrap();
    rx.close(&b.registry, Mode::Read).unwrap();
    wait_until(
        || a.registry.is_empty() && b.registry.is_empty(),
        "both registries to drain",
    );
}
