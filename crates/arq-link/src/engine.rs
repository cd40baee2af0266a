/// Link engine: caller-facing handle plus the background worker that moves
/// frames between the send window, the transport and the reassembler.
///
/// ```text
/// loop {
///     cancelled?            → exit
///     poll one frame        (unlocked) → decode → reassembler  (locked)
///     prune acked packets   (locked)
///     collect due           (locked)   → transport.send        (unlocked)
///                           → mark_transmitted                 (locked)
///     sleep(tick_interval)
///     synthesize idle ack   (locked)
/// }
/// ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::reassembler::{Delivery, Reassembler};
use crate::stats::{LinkStats, StatsSnapshot};
use crate::transport::Transport;
use crate::window::SendWindow;
use crate::wire::{self, HEADER_LEN, Packet};

static NEXT_LINK_ID: AtomicU32 = AtomicU32::new(1);

/// Everything the caller and the worker both mutate. One lock guards it all.
struct LinkState {
    window: SendWindow,
    reassembler: Reassembler,
}

struct Shared {
    id: u32,
    state: Mutex<LinkState>,
    transport: Box<dyn Transport>,
    config: LinkConfig,
    stats: LinkStats,
    cancelled: AtomicBool,
    max_data_len: usize,
    max_frame_len: usize,
}

/// Handle to a running link. `Sync`: any number of threads may call
/// [`send`](LinkEngine::send) and [`receive`](LinkEngine::receive).
pub struct LinkEngine {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl LinkEngine {
    /// Validate `config`, size packets to the transport and start the worker.
    pub fn new<T: Transport + 'static>(transport: T, config: LinkConfig) -> Result<Self> {
        config.validate()?;

        let max_frame_len = transport.max_frame_len();
        let max_data_len = wire::max_data_len(max_frame_len).ok_or(LinkError::FrameTooSmall {
            frame_len: max_frame_len,
            header_len: HEADER_LEN,
        })?;

        let id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            id,
            state: Mutex::new(LinkState {
                window: SendWindow::new(
                    config.window_limit,
                    config.num_sequence_numbers,
                    max_data_len,
                ),
                reassembler: Reassembler::new(config.num_sequence_numbers),
            }),
            transport: Box::new(transport),
            config,
            stats: LinkStats::new(),
            cancelled: AtomicBool::new(false),
            max_data_len,
            max_frame_len,
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name(format!("arq-link-{}", id))
            .spawn(move || run_worker(worker_shared))
            .map_err(LinkError::Spawn)?;

        info!(
            link = id,
            window = shared.config.window_limit,
            seq_space = shared.config.num_sequence_numbers,
            max_data_len,
            "link engine started"
        );

        Ok(LinkEngine {
            shared,
            worker: Some(worker),
        })
    }

    /// Queue `data` as one packet.
    ///
    /// Returns `Ok(data.len())` once queued, `Ok(0)` while the window is full.
    /// Delivery happens in the background; there is no completion signal.
    pub fn send(&self, data: &[u8]) -> Result<usize> {
        if self.shared.cancelled.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        let n = self.shared.state.lock().window.enqueue(data, Instant::now())?;
        if n > 0 {
            trace!(link = self.shared.id, len = n, "payload queued");
        }
        Ok(n)
    }

    /// Take the next delivered payload, if one is waiting. Never blocks.
    pub fn receive(&self) -> Option<Vec<u8>> {
        self.shared.state.lock().reassembler.drain()
    }

    /// Copy the next delivered payload into `buf`. Returns its length, 0 if
    /// nothing is waiting. A `buf` shorter than the payload is an error and
    /// leaves the payload in place; [`max_data_len`](Self::max_data_len)
    /// bytes always suffice.
    pub fn receive_into(&self, buf: &mut [u8]) -> Result<usize> {
        self.shared.state.lock().reassembler.drain_into(buf)
    }

    /// Largest payload a single `send` accepts.
    pub fn max_data_len(&self) -> usize {
        self.shared.max_data_len
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Packets (data and pure acks) still awaiting acknowledgement.
    pub fn outstanding(&self) -> usize {
        self.shared.state.lock().window.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && !self.shared.cancelled.load(Ordering::Acquire)
    }

    /// Stop the worker after its current tick and wait for it. Queued but
    /// unacknowledged packets are abandoned. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(link = self.shared.id, "link worker panicked");
            }
            let stats = self.shared.stats.snapshot();
            info!(
                link = self.shared.id,
                sent = stats.frames_sent,
                retransmits = stats.retransmits,
                received = stats.frames_received,
                corrupt = stats.frames_corrupt,
                delivered = stats.payloads_delivered,
                "link engine stopped"
            );
        }
    }
}

impl Drop for LinkEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: Arc<Shared>) {
    let mut buf = vec![0u8; shared.max_frame_len];
    while !shared.cancelled.load(Ordering::Acquire) {
        shared.poll_inbound(&mut buf);
        shared.prune_acknowledged();
        shared.retransmit_due_packets();

        std::thread::sleep(shared.config.tick_interval);

        let mut state = shared.state.lock();
        if state.window.synthesize_idle_ack(Instant::now()) {
            trace!(
                link = shared.id,
                seq = crate::window::seq_prev(
                    state.window.next_send_seq(),
                    shared.config.num_sequence_numbers
                ),
                "idle ack queued"
            );
        }
    }
}

impl Shared {
    /// Read at most one frame and feed it to the reassembler.
    fn poll_inbound(&self, buf: &mut [u8]) {
        let n = self.transport.receive(buf);
        if n == 0 {
            return;
        }
        LinkStats::bump(&self.stats.frames_received);

        let packet = match Packet::decode(&buf[..n.min(buf.len())], self.max_data_len) {
            Ok(p) => p,
            Err(e) => {
                LinkStats::bump(&self.stats.frames_corrupt);
                debug!(link = self.id, len = n, error = %e, "discarding invalid frame");
                return;
            }
        };

        let (outcome, expected) = {
            let mut state = self.state.lock();
            let outcome = state.reassembler.on_packet_received(&packet);
            (outcome, state.reassembler.next_receive_seq())
        };

        let seq = packet.header.seq;
        match outcome {
            Delivery::Delivered => {
                LinkStats::bump(&self.stats.payloads_delivered);
                trace!(link = self.id, seq, len = packet.data().len(), "payload delivered");
            }
            Delivery::PureAck => {
                trace!(link = self.id, seq, ack = packet.header.ack, "pure ack received");
            }
            Delivery::SlotBusy => {
                LinkStats::bump(&self.stats.frames_dropped);
                debug!(link = self.id, seq, "receive slot busy, dropping packet");
            }
            Delivery::OutOfOrder => {
                LinkStats::bump(&self.stats.frames_dropped);
                debug!(link = self.id, seq, expected, "out-of-order packet dropped");
            }
        }
    }

    /// Drop the packets the peer's latest ack covers.
    fn prune_acknowledged(&self) {
        let mut state = self.state.lock();
        let ack_in = state.reassembler.last_receive_ack();
        let pruned = state.window.prune_acknowledged(ack_in);
        if pruned > 0 {
            LinkStats::add(&self.stats.packets_acked, pruned as u64);
            trace!(link = self.id, ack = ack_in, pruned, "window pruned");
        }
    }

    /// Send every packet whose deadline has passed, stamped with the current
    /// ack. Encoding and rescheduling happen under the lock, the transport
    /// calls outside it. Only this worker removes window entries, so none
    /// vanish between the two phases.
    fn retransmit_due_packets(&self) {
        let due = {
            let mut state = self.state.lock();
            let ack_out = state.reassembler.next_receive_seq();
            match state.window.collect_due(Instant::now(), ack_out) {
                Ok(due) => due,
                Err(e) => {
                    // Window entries are built within bounds; this means the
                    // window itself is inconsistent.
                    warn!(link = self.id, error = %e, "failed to encode due packets");
                    return;
                }
            }
        };
        if due.is_empty() {
            return;
        }

        let mut sent = Vec::with_capacity(due.len());
        for out in &due {
            if self.transport.send(&out.frame) == out.frame.len() {
                LinkStats::bump(&self.stats.frames_sent);
                if out.retransmit {
                    LinkStats::bump(&self.stats.retransmits);
                }
                if out.pure_ack {
                    LinkStats::bump(&self.stats.pure_acks_sent);
                }
                trace!(
                    link = self.id,
                    seq = out.seq,
                    len = out.frame.len(),
                    retransmit = out.retransmit,
                    "frame sent"
                );
                sent.push(out.seq);
            } else {
                LinkStats::bump(&self.stats.send_failures);
                trace!(link = self.id, seq = out.seq, "transport send failed");
            }
        }

        if sent.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut state = self.state.lock();
        for seq in sent {
            state
                .window
                .mark_transmitted(seq, now, self.config.retransmit_timeout);
        }
    }
}
