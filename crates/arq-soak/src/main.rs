/// Soak test: two link engines over a lossy UDP loopback, streaming numbered
/// messages both ways and checking every one arrives in order.
///
/// Link settings come from the `ARQ_*` variables (see `LinkConfig::from_env`),
/// the run itself from:
///
///   ARQ_SOAK_MESSAGES      messages per direction          (default 10000)
///   ARQ_SOAK_LOSS          frame loss probability          (default 0.05)
///   ARQ_SOAK_CORRUPT       bit-flip probability            (default 0.01)
///   ARQ_SOAK_REORDER       hold-back probability           (default 0.05)
///   ARQ_SOAK_SEED          fault RNG seed                  (default 1)
///   ARQ_SOAK_TIMEOUT_SECS  give up after this long         (default 300)

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use tracing::{info, warn};

use arq_link::config::env_parse;
use arq_link::{FaultConfig, LinkConfig, LinkEngine, LossyTransport, UdpTransport};

#[derive(Debug, Clone)]
struct SoakConfig {
    messages: u64,
    loss_rate: f64,
    corrupt_rate: f64,
    reorder_rate: f64,
    seed: u64,
    timeout: Duration,
}

impl SoakConfig {
    fn from_env() -> Self {
        SoakConfig {
            messages: env_parse("ARQ_SOAK_MESSAGES").unwrap_or(10_000),
            loss_rate: env_parse("ARQ_SOAK_LOSS").unwrap_or(0.05),
            corrupt_rate: env_parse("ARQ_SOAK_CORRUPT").unwrap_or(0.01),
            reorder_rate: env_parse("ARQ_SOAK_REORDER").unwrap_or(0.05),
            seed: env_parse("ARQ_SOAK_SEED").unwrap_or(1),
            timeout: Duration::from_secs(env_parse("ARQ_SOAK_TIMEOUT_SECS").unwrap_or(300)),
        }
    }

    fn faults(&self, seed: u64) -> FaultConfig {
        FaultConfig {
            loss_rate: self.loss_rate,
            corrupt_rate: self.corrupt_rate,
            reorder_rate: self.reorder_rate,
            send_failure_rate: 0.0,
            seed,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arq_soak=info,arq_link=info".into()),
        )
        .init();

    let link = LinkConfig::from_env();
    let soak = SoakConfig::from_env();
    info!(?link, ?soak, "starting soak run");

    let any: SocketAddr = "127.0.0.1:0".parse()?;
    let ua = UdpTransport::bind(any).context("bind endpoint A")?;
    let ub = UdpTransport::bind(any).context("bind endpoint B")?;
    let addr_a = ua.local_addr()?;
    let addr_b = ub.local_addr()?;
    let ua = ua.connect_to(addr_b).context("connect A to B")?;
    let ub = ub.connect_to(addr_a).context("connect B to A")?;
    info!(%addr_a, %addr_b, "UDP loopback ready");

    let a = LinkEngine::new(LossyTransport::new(ua, soak.faults(soak.seed)), link.clone())?;
    let b = LinkEngine::new(
        LossyTransport::new(ub, soak.faults(soak.seed.wrapping_add(1))),
        link,
    )?;

    let started = Instant::now();
    let deadline = started + soak.timeout;
    let count = soak.messages;

    let bytes = run(&a, &b, count, deadline)?;

    let elapsed = started.elapsed().as_secs_f64();
    for (name, engine) in [("A", &a), ("B", &b)] {
        let st = engine.stats();
        info!(
            endpoint = name,
            sent = st.frames_sent,
            retransmits = st.retransmits,
            pure_acks = st.pure_acks_sent,
            received = st.frames_received,
            corrupt = st.frames_corrupt,
            dropped = st.frames_dropped,
            delivered = st.payloads_delivered,
            "link stats"
        );
    }
    info!(
        messages = count * 2,
        bytes,
        secs = elapsed,
        msgs_per_sec = (count * 2) as f64 / elapsed,
        "soak passed"
    );
    Ok(())
}

/// Pump and verify both directions on scoped threads. The first failure
/// raises a shared stop flag so the remaining threads return promptly
/// instead of running into the deadline.
fn run(a: &LinkEngine, b: &LinkEngine, count: u64, deadline: Instant) -> anyhow::Result<u64> {
    let stop = AtomicBool::new(false);
    thread::scope(|s| -> anyhow::Result<u64> {
        let stop = &stop;
        let senders = [
            s.spawn(|| halt_on_error(stop, pump(a, b'A', count, deadline, stop))),
            s.spawn(|| halt_on_error(stop, pump(b, b'B', count, deadline, stop))),
        ];
        let checkers = [
            s.spawn(|| halt_on_error(stop, verify(b, b'A', count, deadline, stop))),
            s.spawn(|| halt_on_error(stop, verify(a, b'B', count, deadline, stop))),
        ];

        let mut first_err = None;
        let mut total = 0;
        for h in checkers {
            match h.join().map_err(|_| anyhow!("soak thread panicked")).and_then(|r| r) {
                Ok(()) => {}
                Err(e) => {
                    stop.store(true, Ordering::Relaxed);
                    first_err.get_or_insert(e);
                }
            }
        }
        for h in senders {
            match h.join().map_err(|_| anyhow!("soak thread panicked")).and_then(|r| r) {
                Ok(n) => total += n,
                Err(e) => {
                    stop.store(true, Ordering::Relaxed);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(total),
        }
    })
}

/// Message `index` from endpoint `tag`: tag byte, big-endian index, then a
/// filler whose length cycles through the payload range.
fn payload(tag: u8, index: u64, max_data_len: usize) -> Vec<u8> {
    let filler_room = max_data_len.saturating_sub(9);
    let filler = if filler_room == 0 {
        0
    } else {
        (index.wrapping_mul(37) % filler_room as u64) as usize
    };
    let mut p = Vec::with_capacity(9 + filler);
    p.push(tag);
    p.extend_from_slice(&index.to_be_bytes());
    p.extend((0..filler).map(|i| (index as usize + i) as u8));
    p.truncate(max_data_len);
    p
}

fn halt_on_error<T>(stop: &AtomicBool, result: anyhow::Result<T>) -> anyhow::Result<T> {
    if result.is_err() {
        stop.store(true, Ordering::Relaxed);
    }
    result
}

/// Send `count` messages, retrying while the window is full.
/// Returns the payload bytes queued, stopping early once `stop` is raised.
fn pump(
    engine: &LinkEngine,
    tag: u8,
    count: u64,
    deadline: Instant,
    stop: &AtomicBool,
) -> anyhow::Result<u64> {
    let max = engine.max_data_len();
    let mut bytes = 0u64;
    for index in 0..count {
        let msg = payload(tag, index, max);
        loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(bytes);
            }
            match engine.send(&msg)? {
                0 => {
                    if Instant::now() > deadline {
                        bail!("endpoint {} stalled sending message {}", tag as char, index);
                    }
                    thread::sleep(Duration::from_micros(50));
                }
                n => {
                    bytes += n as u64;
                    break;
                }
            }
        }
    }
    Ok(bytes)
}

/// Receive `count` messages from the peer tagged `tag` and check each one.
fn verify(
    engine: &LinkEngine,
    tag: u8,
    count: u64,
    deadline: Instant,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    let max = engine.max_data_len();
    let mut buf = vec![0u8; max];
    for index in 0..count {
        let n = loop {
            if stop.load(Ordering::Relaxed) {
                return Ok(());
            }
            let n = engine.receive_into(&mut buf)?;
            if n > 0 {
                break n;
            }
            if Instant::now() > deadline {
                bail!(
                    "timed out waiting for message {} from {} ({} of {} received)",
                    index,
                    tag as char,
                    index,
                    count
                );
            }
            thread::sleep(Duration::from_micros(50));
        };

        let expected = payload(tag, index, max);
        if buf[..n] != expected[..] {
            let got_index = buf
                .get(1..9)
                .and_then(|b| b.try_into().ok())
                .map(u64::from_be_bytes);
            warn!(index, ?got_index, len = n, "payload mismatch");
            bail!("message {} from {} arrived corrupted or out of order", index, tag as char);
        }
        if (index + 1) % 1000 == 0 {
            info!(from = %(tag as char), received = index + 1, "progress");
        }
    }
    Ok(())
}
