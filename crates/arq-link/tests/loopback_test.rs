/// Integration tests: two engines talking over in-memory, lossy and UDP
/// transports, checking that every payload arrives intact and in order.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use arq_link::wire::Packet;
use arq_link::{
    FaultConfig, LinkConfig, LinkEngine, LinkError, LossyTransport, MemoryTransport, Transport,
    UdpTransport,
};

const FRAME: usize = 256;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_config(window_limit: usize, num_sequence_numbers: u32) -> LinkConfig {
    LinkConfig {
        num_sequence_numbers,
        window_limit,
        retransmit_timeout: Duration::from_millis(20),
        tick_interval: Duration::from_micros(200),
    }
}

/// Retry `send` until the window has room.
fn send_blocking(engine: &LinkEngine, data: &[u8], deadline: Instant) {
    loop {
        match engine.send(data) {
            Ok(0) => {
                assert!(Instant::now() < deadline, "send window never opened");
                thread::sleep(Duration::from_micros(100));
            }
            Ok(n) => {
                assert_eq!(n, data.len());
                return;
            }
            Err(e) => panic!("send failed: {e}"),
        }
    }
}

fn recv_blocking(engine: &LinkEngine, deadline: Instant) -> Vec<u8> {
    loop {
        if let Some(data) = engine.receive() {
            return data;
        }
        assert!(Instant::now() < deadline, "timed out waiting for payload");
        thread::sleep(Duration::from_micros(100));
    }
}

fn wait_until(deadline: Instant, mut cond: impl FnMut() -> bool) {
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met before deadline");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Wait for the next frame on a raw endpoint and decode it.
fn next_raw_frame(t: &MemoryTransport, max_data_len: usize, deadline: Instant) -> Packet {
    let mut buf = vec![0u8; t.max_frame_len()];
    loop {
        let n = t.receive(&mut buf);
        if n > 0 {
            return Packet::decode(&buf[..n], max_data_len).unwrap();
        }
        assert!(Instant::now() < deadline, "no frame before deadline");
        thread::sleep(Duration::from_micros(100));
    }
}

/// Hand-build a frame and push it through a raw endpoint.
fn send_raw(t: &MemoryTransport, seq: u32, ack: u32, payload: &[u8], max_data_len: usize) {
    let mut p = Packet::with_payload(seq, payload);
    p.stamp(ack, max_data_len).unwrap();
    let frame = p.encode(max_data_len).unwrap();
    assert_eq!(t.send(&frame), frame.len());
}

fn message(i: usize) -> Vec<u8> {
    let mut m = format!("msg-{i:05}-").into_bytes();
    m.extend(std::iter::repeat_n(b'a' + (i % 26) as u8, i % 50));
    m
}

/// Stream `count` messages each way and check both sides see the exact
/// sequence the other sent.
fn exchange(a: &LinkEngine, b: &LinkEngine, count: usize, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..count {
                send_blocking(a, &message(i), deadline);
            }
        });
        s.spawn(|| {
            for i in 0..count {
                send_blocking(b, &message(i + 100_000), deadline);
            }
        });
        s.spawn(|| {
            for i in 0..count {
                assert_eq!(recv_blocking(b, deadline), message(i), "b: message {i}");
            }
        });
        s.spawn(|| {
            for i in 0..count {
                assert_eq!(recv_blocking(a, deadline), message(i + 100_000), "a: message {i}");
            }
        });
    });
}

#[test]
fn ping_pong_with_single_packet_window() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let a = LinkEngine::new(ta, fast_config(1, 256)).unwrap();
    let b = LinkEngine::new(tb, fast_config(1, 256)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);

    send_blocking(&a, b"ping", deadline);
    assert_eq!(recv_blocking(&b, deadline), b"ping");

    // B's window only opens once A has acknowledged B's outstanding packet.
    send_blocking(&b, b"pong", deadline);
    assert_eq!(recv_blocking(&a, deadline), b"pong");

    // The pong frame carries B's ack for "ping", so A prunes it.
    wait_until(deadline, || a.stats().packets_acked >= 1);
    wait_until(deadline, || b.stats().packets_acked >= 1);
    assert_eq!(a.receive(), None);
    assert_eq!(b.receive(), None);
}

#[test]
fn receiver_acks_next_sequence_after_delivery() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let b = LinkEngine::new(tb, fast_config(4, 256)).unwrap();
    let max = b.max_data_len();
    let deadline = Instant::now() + Duration::from_secs(10);

    send_raw(&ta, 0, 0, b"ping", max);
    assert_eq!(recv_blocking(&b, deadline), b"ping");

    // Frames stamped before delivery are already queued; drop them.
    let mut buf = [0u8; FRAME];
    while ta.receive(&mut buf) > 0 {}
    let next = next_raw_frame(&ta, max, deadline);
    assert_eq!(next.header.ack, 1);
}

#[test]
fn single_packet_window_reopens_only_after_ack() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    // Long tick: no idle ack is synthesized before the first send, and the
    // window stays open for a whole tick after the prune.
    let cfg = LinkConfig {
        num_sequence_numbers: 256,
        window_limit: 1,
        retransmit_timeout: Duration::from_secs(10),
        tick_interval: Duration::from_millis(100),
    };
    let a = LinkEngine::new(ta, cfg).unwrap();
    let max = a.max_data_len();
    let deadline = Instant::now() + Duration::from_secs(10);

    assert_eq!(a.send(b"ping").unwrap(), 4);
    assert_eq!(a.send(b"pong").unwrap(), 0);

    let ping = next_raw_frame(&tb, max, deadline);
    assert_eq!(ping.data(), b"ping");
    assert_eq!((ping.header.seq, ping.header.ack), (0, 0));

    thread::sleep(Duration::from_millis(50));
    assert_eq!(a.send(b"pong").unwrap(), 0);
    assert_eq!(a.stats().packets_acked, 0);

    // Peer's pure ack (its own seq 0) acknowledges ping.
    send_raw(&tb, 0, ping.header.seq + 1, b"", max);
    loop {
        match a.send(b"pong").unwrap() {
            0 => {
                assert!(Instant::now() < deadline, "window never reopened");
                thread::sleep(Duration::from_micros(100));
            }
            n => {
                assert_eq!(n, 4);
                break;
            }
        }
    }
    assert_eq!(a.stats().packets_acked, 1);

    let pong = next_raw_frame(&tb, max, deadline);
    assert_eq!(pong.data(), b"pong");
    assert_eq!(pong.header.seq, 1);
    // Acknowledges the peer's pure ack.
    assert_eq!(pong.header.ack, 1);
}

#[test]
fn full_window_reports_zero() {
    init_tracing();
    // Peer end left unserviced: nothing is ever acknowledged.
    let (ta, _tb) = MemoryTransport::pair(FRAME);
    let a = LinkEngine::new(ta, fast_config(3, 256)).unwrap();

    let mut accepted = 0;
    for _ in 0..10 {
        if a.send(b"x").unwrap() == 1 {
            accepted += 1;
        }
    }
    // The idle ack may have claimed one slot before the first send.
    assert!((2..=3).contains(&accepted), "accepted {accepted}");
    assert_eq!(a.outstanding(), 3);
    assert_eq!(a.send(b"x").unwrap(), 0);
}

#[test]
fn many_messages_in_order_over_clean_link() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let a = LinkEngine::new(ta, fast_config(8, 256)).unwrap();
    let b = LinkEngine::new(tb, fast_config(8, 256)).unwrap();
    exchange(&a, &b, 300, Duration::from_secs(30));

    let stats = a.stats();
    assert_eq!(stats.frames_corrupt, 0);
    assert!(stats.payloads_delivered >= 300);
}

#[test]
fn many_messages_in_order_over_lossy_link() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let faults = |seed| FaultConfig {
        loss_rate: 0.10,
        corrupt_rate: 0.05,
        reorder_rate: 0.10,
        send_failure_rate: 0.05,
        seed,
    };
    let a = LinkEngine::new(LossyTransport::new(ta, faults(1)), fast_config(8, 256)).unwrap();
    let b = LinkEngine::new(LossyTransport::new(tb, faults(2)), fast_config(8, 256)).unwrap();
    exchange(&a, &b, 150, Duration::from_secs(60));

    let (sa, sb) = (a.stats(), b.stats());
    assert!(sa.retransmits + sb.retransmits > 0);
    assert!(sa.frames_corrupt + sb.frames_corrupt > 0);
}

#[test]
fn sequence_numbers_wrap_around() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let a = LinkEngine::new(ta, fast_config(2, 5)).unwrap();
    let b = LinkEngine::new(tb, fast_config(2, 5)).unwrap();
    // 5 sequence numbers: 60 messages go round the space many times.
    exchange(&a, &b, 60, Duration::from_secs(30));
}

#[test]
fn sequence_wrap_survives_reordering() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let faults = |seed| FaultConfig {
        reorder_rate: 0.2,
        seed,
        ..Default::default()
    };
    let a = LinkEngine::new(LossyTransport::new(ta, faults(3)), fast_config(2, 5)).unwrap();
    let b = LinkEngine::new(LossyTransport::new(tb, faults(4)), fast_config(2, 5)).unwrap();
    exchange(&a, &b, 200, Duration::from_secs(60));
}

#[test]
fn sequence_wrap_survives_loss_corruption_and_reordering() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let faults = |seed| FaultConfig {
        loss_rate: 0.10,
        corrupt_rate: 0.05,
        reorder_rate: 0.20,
        send_failure_rate: 0.05,
        seed,
    };
    let a = LinkEngine::new(LossyTransport::new(ta, faults(5)), fast_config(3, 7)).unwrap();
    let b = LinkEngine::new(LossyTransport::new(tb, faults(6)), fast_config(3, 7)).unwrap();
    exchange(&a, &b, 150, Duration::from_secs(60));
}

#[test]
fn max_size_payload_crosses_link() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let a = LinkEngine::new(ta, fast_config(4, 256)).unwrap();
    let b = LinkEngine::new(tb, fast_config(4, 256)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);

    let big: Vec<u8> = (0..a.max_data_len()).map(|i| (i % 251) as u8).collect();
    send_blocking(&a, &big, deadline);
    assert_eq!(recv_blocking(&b, deadline), big);

    send_blocking(&a, b"tail", deadline);
    wait_until(deadline, || b.stats().payloads_delivered >= 2);
    let mut short = [0u8; 2];
    assert!(matches!(
        b.receive_into(&mut short),
        Err(LinkError::BufferTooSmall { len: 2, needed: 4 })
    ));

    let mut buf = vec![0u8; b.max_data_len()];
    let n = loop {
        let n = b.receive_into(&mut buf).unwrap();
        if n > 0 {
            break n;
        }
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_micros(100));
    };
    assert_eq!(&buf[..n], b"tail");
}

#[test]
fn shutdown_stops_traffic_and_closes_link() {
    init_tracing();
    let (ta, tb) = MemoryTransport::pair(FRAME);
    let mut a = LinkEngine::new(ta, fast_config(4, 256)).unwrap();
    // Unacknowledged data keeps being retransmitted while running.
    a.send(b"never acked").unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(tb.pending() >= 2);

    a.shutdown();
    assert!(!a.is_running());
    assert!(matches!(a.send(b"x"), Err(LinkError::Closed)));

    let mut buf = [0u8; FRAME];
    while tb.receive(&mut buf) > 0 {}
    thread::sleep(Duration::from_millis(100));
    assert_eq!(tb.pending(), 0);
}

#[test]
fn udp_loopback_delivery() {
    init_tracing();
    let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let ua = UdpTransport::bind(any).unwrap();
    let ub = UdpTransport::bind(any).unwrap();
    let (addr_a, addr_b) = (ua.local_addr().unwrap(), ub.local_addr().unwrap());
    let ua = ua.connect_to(addr_b).unwrap();
    let ub = ub.connect_to(addr_a).unwrap();
    assert_eq!(ua.max_frame_len(), arq_link::transport::MAX_UDP_PAYLOAD);

    let a = LinkEngine::new(ua, fast_config(8, 256)).unwrap();
    let b = LinkEngine::new(ub, fast_config(8, 256)).unwrap();
    exchange(&a, &b, 100, Duration::from_secs(30));
}
