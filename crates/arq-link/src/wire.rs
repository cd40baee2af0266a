/// Link-layer packet format, serialization and checksum.
///
/// Frame layout (big-endian):
///   [0..4]    Checksum (u32, low 16 bits used)
///   [4..8]    Sequence number (u32)
///   [8..12]   Ack number (u32): every seq below this has been received
///   [12..16]  Data length (u32)
///   [16..]    Payload, exactly `data_length` bytes
///
/// A frame never exceeds the transport's maximum frame length, so the
/// payload capacity is `max_frame_len - HEADER_LEN`.
/// `data_length == 0` marks a pure-ack packet.

use crate::error::WireError;

pub const HEADER_LEN: usize = 16;

const OFF_CHECKSUM: usize = 0;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_DATA_LEN: usize = 12;

/// Maximum payload bytes for a transport with the given frame size.
/// Returns `None` if the frame cannot carry a single payload byte.
pub fn max_data_len(max_frame_len: usize) -> Option<usize> {
    max_frame_len.checked_sub(HEADER_LEN).filter(|&n| n > 0)
}

/// Fixed-size packet header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub checksum: u32,
    pub seq: u32,
    pub ack: u32,
    pub data_length: u32,
}

impl PacketHeader {
    /// Serialize the header into `buf`.
    pub fn write_to(&self, buf: &mut [u8; HEADER_LEN]) {
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_DATA_LEN..OFF_DATA_LEN + 4].copy_from_slice(&self.data_length.to_be_bytes());
    }

    /// Parse header from buffer. Returns None if the buffer is too short.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let word = |off: usize| u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        Some(PacketHeader {
            checksum: word(OFF_CHECKSUM),
            seq: word(OFF_SEQ),
            ack: word(OFF_ACK),
            data_length: word(OFF_DATA_LEN),
        })
    }
}

/// Header plus payload. `payload` holds at least `header.data_length` bytes;
/// only that prefix goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Data packet with the given sequence number. Ack and checksum are
    /// stamped at transmission time.
    pub fn with_payload(seq: u32, payload: &[u8]) -> Self {
        Packet {
            header: PacketHeader {
                checksum: 0,
                seq,
                ack: 0,
                data_length: payload.len() as u32,
            },
            payload: payload.to_vec(),
        }
    }

    /// Zero-length packet that only carries an ack.
    pub fn pure_ack(seq: u32) -> Self {
        Packet {
            header: PacketHeader {
                seq,
                ..PacketHeader::default()
            },
            payload: Vec::new(),
        }
    }

    pub fn is_pure_ack(&self) -> bool {
        self.header.data_length == 0
    }

    /// The `data_length` bytes that are covered by the checksum.
    pub fn data(&self) -> &[u8] {
        &self.payload[..(self.header.data_length as usize).min(self.payload.len())]
    }

    /// Set the ack field and recompute the checksum.
    pub fn stamp(&mut self, ack: u32, max_data_len: usize) -> Result<(), WireError> {
        self.header.ack = ack;
        self.header.checksum = u32::from(checksum(self, max_data_len)?);
        Ok(())
    }

    /// Serialize to wire format. The header is written as-is; call
    /// [`Packet::stamp`] first to refresh the checksum.
    pub fn encode(&self, max_data_len: usize) -> Result<Vec<u8>, WireError> {
        let len = self.checked_data_len(max_data_len)?;
        let mut header = [0u8; HEADER_LEN];
        self.header.write_to(&mut header);
        let mut buf = Vec::with_capacity(HEADER_LEN + len);
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.payload[..len]);
        Ok(buf)
    }

    /// Parse and validate a received frame.
    ///
    /// Rejects frames shorter than a header, longer than a full frame, with a
    /// declared data length over the maximum or disagreeing with the actual
    /// payload size, and frames whose checksum does not verify.
    pub fn decode(frame: &[u8], max_data_len: usize) -> Result<Self, WireError> {
        let header = PacketHeader::parse(frame).ok_or(WireError::TooShort(frame.len()))?;
        if frame.len() > HEADER_LEN + max_data_len {
            return Err(WireError::TooLong {
                len: frame.len(),
                max: HEADER_LEN + max_data_len,
            });
        }
        let declared = header.data_length as usize;
        if declared > max_data_len {
            return Err(WireError::DataLengthTooLarge {
                declared,
                max: max_data_len,
            });
        }
        let actual = frame.len() - HEADER_LEN;
        if declared != actual {
            return Err(WireError::LengthMismatch { declared, actual });
        }

        let packet = Packet {
            header,
            payload: frame[HEADER_LEN..].to_vec(),
        };
        let computed = u32::from(checksum(&packet, max_data_len)?);
        if computed != header.checksum {
            return Err(WireError::ChecksumMismatch {
                expected: header.checksum,
                computed,
            });
        }
        Ok(packet)
    }

    fn checked_data_len(&self, max_data_len: usize) -> Result<usize, WireError> {
        let declared = self.header.data_length as usize;
        if declared > max_data_len {
            return Err(WireError::DataLengthTooLarge {
                declared,
                max: max_data_len,
            });
        }
        if declared > self.payload.len() {
            return Err(WireError::LengthMismatch {
                declared,
                actual: self.payload.len(),
            });
        }
        Ok(declared)
    }
}

/// Internet checksum over the header (checksum field zeroed) followed by
/// exactly `data_length` payload bytes.
pub fn checksum(packet: &Packet, max_data_len: usize) -> Result<u16, WireError> {
    let len = packet.checked_data_len(max_data_len)?;

    let mut header = [0u8; HEADER_LEN];
    PacketHeader {
        checksum: 0,
        ..packet.header
    }
    .write_to(&mut header);

    let sum = ones_complement_sum(&header, 0);
    let sum = ones_complement_sum(&packet.payload[..len], sum);
    Ok(fold(sum))
}

/// Add big-endian 16-bit words of `data` onto `sum`. An odd trailing byte is
/// padded with a zero low byte. `HEADER_LEN` is even, so header and payload
/// can be summed separately.
fn ones_complement_sum(data: &[u8], mut sum: u64) -> u64 {
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u64::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }
    sum
}

/// Fold carries back into the low 16 bits and complement. Two folds suffice
/// for any frame under 128 KiB; the loop covers the rest.
fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum >> 16) + (sum & 0xffff);
    }
    !(sum as u16)
}
