/// Physical transport abstraction.
///
/// The link engine needs only a message-oriented, best-effort channel that
/// may drop, corrupt or reorder frames but never duplicates or splits them.
/// Both calls must return promptly; the engine polls on every tick.
///
/// Implementations here:
/// - [`MemoryTransport`]: in-process pair over bounded channels (tests)
/// - [`UdpTransport`]: connected, non-blocking UDP socket
/// - [`crate::simulator::LossyTransport`]: fault-injecting wrapper

use std::io;
use std::net::{SocketAddr, UdpSocket};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use socket2::{Domain, Protocol, Socket, Type};

/// Max UDP payload = 1472 bytes (1500 MTU - 20 IP - 8 UDP).
pub const MAX_UDP_PAYLOAD: usize = 1472;

/// Socket buffer size requested for UDP transports (4 MB).
const UDP_SOCKET_BUFFER: usize = 4 * 1024 * 1024;

pub trait Transport: Send + Sync {
    /// Send one frame. Returns the number of bytes sent, 0 on failure.
    fn send(&self, frame: &[u8]) -> usize;

    /// Receive one frame into `buf` if one is waiting. Returns its length,
    /// 0 when nothing is available. Writes at most `max_frame_len()` bytes.
    fn receive(&self, buf: &mut [u8]) -> usize;

    /// Largest frame this transport carries (header included).
    fn max_frame_len(&self) -> usize;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, frame: &[u8]) -> usize {
        (**self).send(frame)
    }

    fn receive(&self, buf: &mut [u8]) -> usize {
        (**self).receive(buf)
    }

    fn max_frame_len(&self) -> usize {
        (**self).max_frame_len()
    }
}

// ── In-memory pair ──

/// One end of an in-process link. Frames are queued in bounded channels;
/// a full queue makes `send` report failure, like a congested NIC.
pub struct MemoryTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    max_frame_len: usize,
}

impl MemoryTransport {
    /// Two connected endpoints with room for 1024 queued frames each way.
    pub fn pair(max_frame_len: usize) -> (Self, Self) {
        Self::pair_with_capacity(max_frame_len, 1024)
    }

    pub fn pair_with_capacity(max_frame_len: usize, capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = bounded(capacity);
        let (b_tx, a_rx) = bounded(capacity);
        (
            MemoryTransport {
                tx: a_tx,
                rx: a_rx,
                max_frame_len,
            },
            MemoryTransport {
                tx: b_tx,
                rx: b_rx,
                max_frame_len,
            },
        )
    }

    /// Frames waiting to be received on this end.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: &[u8]) -> usize {
        if frame.len() > self.max_frame_len {
            return 0;
        }
        match self.tx.try_send(frame.to_vec()) {
            Ok(()) => frame.len(),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => 0,
        }
    }

    fn receive(&self, buf: &mut [u8]) -> usize {
        match self.rx.try_recv() {
            Ok(frame) => {
                let n = frame.len().min(buf.len()).min(self.max_frame_len);
                buf[..n].copy_from_slice(&frame[..n]);
                n
            }
            Err(_) => 0,
        }
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

// ── UDP ──

/// A non-blocking UDP socket connected to a single peer.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    max_frame_len: usize,
}

impl UdpTransport {
    /// Bind `local` and connect to `peer`, with the standard 1472-byte frame.
    pub fn connect(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        Self::connect_with_frame_len(local, peer, MAX_UDP_PAYLOAD)
    }

    pub fn connect_with_frame_len(
        local: SocketAddr,
        peer: SocketAddr,
        max_frame_len: usize,
    ) -> io::Result<Self> {
        let socket = bind_udp_socket(local)?;
        socket.connect(peer)?;
        Ok(UdpTransport {
            socket,
            max_frame_len,
        })
    }

    /// Bind `local` without a peer yet; finish with [`UdpTransport::connect_to`].
    /// Lets two endpoints on ephemeral ports learn each other's address.
    pub fn bind(local: SocketAddr) -> io::Result<Self> {
        Ok(UdpTransport {
            socket: bind_udp_socket(local)?,
            max_frame_len: MAX_UDP_PAYLOAD,
        })
    }

    pub fn connect_to(self, peer: SocketAddr) -> io::Result<Self> {
        self.socket.connect(peer)?;
        Ok(self)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn send(&self, frame: &[u8]) -> usize {
        match self.socket.send(frame) {
            Ok(n) => n,
            Err(e) => {
                tracing::trace!(error = %e, "UDP send failed");
                0
            }
        }
    }

    fn receive(&self, buf: &mut [u8]) -> usize {
        let limit = buf.len().min(self.max_frame_len);
        match self.socket.recv(&mut buf[..limit]) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                // ECONNREFUSED and friends surface here when the peer is not
                // up yet; treat them like an empty poll.
                tracing::trace!(error = %e, "UDP receive failed");
                0
            }
        }
    }

    fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

/// Create a non-blocking UDP socket with enlarged buffers bound to `local`.
fn bind_udp_socket(local: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if local.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    // Best effort; the OS may clamp these.
    let _ = socket.set_recv_buffer_size(UDP_SOCKET_BUFFER);
    let _ = socket.set_send_buffer_size(UDP_SOCKET_BUFFER);
    socket.bind(&local.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
