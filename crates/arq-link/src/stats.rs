/// Link statistics, shared between the engine worker and callers.
/// All fields are atomic so `LinkEngine::stats` never touches the state lock.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct LinkStats {
    /// Frames the transport accepted, first transmissions and retries.
    pub frames_sent: AtomicU64,
    /// Of `frames_sent`, how many were retransmissions.
    pub retransmits: AtomicU64,
    /// Of `frames_sent`, how many were pure acks.
    pub pure_acks_sent: AtomicU64,
    /// Sends the transport reported as failed; retried next tick.
    pub send_failures: AtomicU64,
    /// Frames read from the transport.
    pub frames_received: AtomicU64,
    /// Frames that failed validation and were discarded.
    pub frames_corrupt: AtomicU64,
    /// Valid frames dropped for being out of order or finding the slot busy.
    pub frames_dropped: AtomicU64,
    /// Payloads placed in the receive slot.
    pub payloads_delivered: AtomicU64,
    /// Window entries removed by acknowledgements.
    pub packets_acked: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub retransmits: u64,
    pub pure_acks_sent: u64,
    pub send_failures: u64,
    pub frames_received: u64,
    pub frames_corrupt: u64,
    pub frames_dropped: u64,
    pub payloads_delivered: u64,
    pub packets_acked: u64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            retransmits: self.retransmits.load(Ordering::Relaxed),
            pure_acks_sent: self.pure_acks_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_corrupt: self.frames_corrupt.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            payloads_delivered: self.payloads_delivered.load(Ordering::Relaxed),
            packets_acked: self.packets_acked.load(Ordering::Relaxed),
        }
    }
}
