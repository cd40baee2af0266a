/// Send window: packets handed to the link but not yet acknowledged.
///
/// Entries are kept in enqueue order, which is also sequence order modulo
/// `num_sequence_numbers`. Acknowledgements are cumulative, so pruning is
/// always a prefix removal and retransmission is a front-to-back scan.
///
/// ```text
///   front (oldest unacked)                      back (newest)
///   ┌────────┬────────┬────────┬────────┐
///   │ seq 5  │ seq 6  │ seq 7  │ seq 8  │   ack 7 arrives → pop 5, 6
///   └────────┴────────┴────────┴────────┘
/// ```
///
/// This module only manages state. The engine calls [`SendWindow::collect_due`]
/// under its lock, transmits the frames with the lock released, then reports
/// the successes back through [`SendWindow::mark_transmitted`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{LinkError, Result};
use crate::wire::Packet;

/// `seq + 1` in a sequence space of `modulus` numbers.
#[inline]
pub fn seq_next(seq: u32, modulus: u32) -> u32 {
    ((u64::from(seq) + 1) % u64::from(modulus)) as u32
}

/// `seq - 1` in a sequence space of `modulus` numbers (`0` wraps to
/// `modulus - 1`). Values outside the space are reduced first.
#[inline]
pub fn seq_prev(seq: u32, modulus: u32) -> u32 {
    let m = u64::from(modulus);
    ((u64::from(seq) % m + m - 1) % m) as u32
}

/// A packet in the window plus its retransmit deadline.
#[derive(Debug, Clone)]
pub struct TimedPacket {
    pub packet: Packet,
    /// The packet is due for (re)transmission once this instant has passed.
    pub next_send_time: Instant,
    /// Successful transmissions so far.
    pub tx_count: u32,
}

/// A frame ready for the transport, produced by [`SendWindow::collect_due`].
#[derive(Debug, Clone)]
pub struct OutgoingFrame {
    pub seq: u32,
    pub frame: Vec<u8>,
    pub retransmit: bool,
    pub pure_ack: bool,
}

#[derive(Debug)]
pub struct SendWindow {
    entries: VecDeque<TimedPacket>,
    limit: usize,
    modulus: u32,
    max_data_len: usize,
    next_send_seq: u32,
    /// Data packets accepted by `enqueue` over the window's lifetime.
    send_count: u64,
}

impl SendWindow {
    pub fn new(limit: usize, modulus: u32, max_data_len: usize) -> Self {
        debug_assert!(limit >= 1 && 2 * (limit as u64) < u64::from(modulus));
        SendWindow {
            entries: VecDeque::with_capacity(limit),
            limit,
            modulus,
            max_data_len,
            next_send_seq: 0,
            send_count: 0,
        }
    }

    /// Queue a data packet for transmission on the next tick.
    ///
    /// Returns `Ok(data.len())` when accepted and `Ok(0)` when the window is
    /// full. Empty or oversized payloads are errors.
    pub fn enqueue(&mut self, data: &[u8], now: Instant) -> Result<usize> {
        if data.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        if data.len() > self.max_data_len {
            return Err(LinkError::PayloadTooLarge {
                len: data.len(),
                max: self.max_data_len,
            });
        }
        if self.is_full() {
            return Ok(0);
        }

        self.push(Packet::with_payload(self.next_send_seq, data), now);
        self.send_count += 1;
        Ok(data.len())
    }

    /// Queue a pure-ack packet if nothing at all is outstanding, so the peer
    /// keeps receiving fresh acknowledgements while this side is idle.
    pub fn synthesize_idle_ack(&mut self, now: Instant) -> bool {
        if !self.entries.is_empty() {
            return false;
        }
        self.push(Packet::pure_ack(self.next_send_seq), now);
        true
    }

    fn push(&mut self, packet: Packet, now: Instant) {
        debug_assert!(!self.is_full());
        self.entries.push_back(TimedPacket {
            packet,
            next_send_time: now,
            tx_count: 0,
        });
        self.next_send_seq = seq_next(self.next_send_seq, self.modulus);
    }

    /// Drop every entry the peer's cumulative ack covers.
    ///
    /// `last_receive_ack` acknowledges everything before it, so the entries
    /// from the front up to `last_receive_ack - 1` are removed. Only an ack
    /// that lands between one past the front and one past the back counts;
    /// anything else is stale or from another lap and is ignored. Returns
    /// the number of entries removed.
    pub fn prune_acknowledged(&mut self, last_receive_ack: u32) -> usize {
        let Some(front) = self.entries.front() else {
            return 0;
        };
        let m = u64::from(self.modulus);
        let front_seq = u64::from(front.packet.header.seq);
        let covered = ((u64::from(last_receive_ack) % m + m - front_seq) % m) as usize;
        if covered == 0 || covered > self.entries.len() {
            return 0;
        }
        self.entries.drain(..covered);
        covered
    }

    /// Stamp every due entry with `ack` and a fresh checksum and encode it.
    ///
    /// Deadlines are left untouched; call [`SendWindow::mark_transmitted`]
    /// for the frames the transport actually accepted.
    pub fn collect_due(&mut self, now: Instant, ack: u32) -> Result<Vec<OutgoingFrame>> {
        let mut due = Vec::new();
        for entry in self.entries.iter_mut() {
            if entry.next_send_time > now {
                continue;
            }
            entry.packet.stamp(ack, self.max_data_len)?;
            due.push(OutgoingFrame {
                seq: entry.packet.header.seq,
                frame: entry.packet.encode(self.max_data_len)?,
                retransmit: entry.tx_count > 0,
                pure_ack: entry.packet.is_pure_ack(),
            });
        }
        Ok(due)
    }

    /// Reschedule the entry with sequence number `seq` one timeout from now.
    /// Returns false if the entry is no longer in the window.
    pub fn mark_transmitted(&mut self, seq: u32, now: Instant, timeout: Duration) -> bool {
        match self.entries.iter_mut().find(|e| e.packet.header.seq == seq) {
            Some(entry) => {
                entry.next_send_time = now + timeout;
                entry.tx_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.limit
    }

    pub fn next_send_seq(&self) -> u32 {
        self.next_send_seq
    }

    pub fn send_count(&self) -> u64 {
        self.send_count
    }

    /// Sequence numbers currently in the window, oldest first.
    pub fn sequences(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|e| e.packet.header.seq)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TimedPacket> {
        self.entries.iter()
    }
}
