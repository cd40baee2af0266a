/// Receive side: in-order acceptance into a single-payload slot.
///
/// - Only the packet carrying `next_receive_seq` is accepted.
/// - Out-of-order and duplicate packets are discarded without buffering;
///   the peer's retransmit timer resends them.
/// - At most one payload waits for the application. While the slot is
///   occupied the next in-order data packet is dropped and the sequence
///   counter stays put, which forces the peer to retransmit later.
/// - Every validated packet, in order or not, refreshes `last_receive_ack`.

use crate::error::{LinkError, Result};
use crate::window::seq_next;
use crate::wire::Packet;

/// What happened to a packet handed to [`Reassembler::on_packet_received`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Payload stored in the slot; sequence advanced.
    Delivered,
    /// In-order pure ack; sequence advanced, nothing stored.
    PureAck,
    /// In-order data but the slot is still full; dropped.
    SlotBusy,
    /// Not the expected sequence number; dropped.
    OutOfOrder,
}

#[derive(Debug)]
pub struct Reassembler {
    modulus: u32,
    next_receive_seq: u32,
    last_receive_ack: u32,
    slot: Option<Vec<u8>>,
}

impl Reassembler {
    pub fn new(modulus: u32) -> Self {
        Reassembler {
            modulus,
            next_receive_seq: 0,
            last_receive_ack: 0,
            slot: None,
        }
    }

    pub fn on_packet_received(&mut self, packet: &Packet) -> Delivery {
        self.last_receive_ack = packet.header.ack;

        if packet.header.seq != self.next_receive_seq {
            return Delivery::OutOfOrder;
        }

        if packet.is_pure_ack() {
            self.advance();
            return Delivery::PureAck;
        }

        if self.slot.is_some() {
            return Delivery::SlotBusy;
        }
        self.slot = Some(packet.data().to_vec());
        self.advance();
        Delivery::Delivered
    }

    /// Take the pending payload, if any. Never blocks.
    pub fn drain(&mut self) -> Option<Vec<u8>> {
        self.slot.take()
    }

    /// Copy the pending payload into `buf` and clear the slot. Returns the
    /// number of bytes copied, 0 if nothing is pending. If `buf` is shorter
    /// than the payload nothing is copied and the payload stays pending.
    pub fn drain_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(data) = self.slot.as_deref() else {
            return Ok(0);
        };
        let n = data.len();
        if buf.len() < n {
            return Err(LinkError::BufferTooSmall {
                len: buf.len(),
                needed: n,
            });
        }
        buf[..n].copy_from_slice(data);
        self.slot = None;
        Ok(n)
    }

    fn advance(&mut self) {
        self.next_receive_seq = seq_next(self.next_receive_seq, self.modulus);
    }

    pub fn next_receive_seq(&self) -> u32 {
        self.next_receive_seq
    }

    pub fn last_receive_ack(&self) -> u32 {
        self.last_receive_ack
    }

    pub fn has_pending(&self) -> bool {
        self.slot.is_some()
    }
}
