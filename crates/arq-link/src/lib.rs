//! arq-link: reliable, ordered delivery over an unreliable frame transport.
//!
//! A sliding-window ARQ engine: every packet carries a cumulative ack,
//! unacknowledged packets are resent after a fixed timeout, and the receive
//! side accepts strictly in-order packets into a single payload slot.
//!
//! ```text
//!  caller ──send()──▶ SendWindow ──┐                ┌──▶ Reassembler ──receive()──▶ caller
//!                                  │   engine loop  │        (1 slot)
//!                                  ▼   (worker)     │
//!                              Transport ◀────────▶ Transport
//!                              (memory / UDP / lossy wrapper)
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod reassembler;
pub mod simulator;
pub mod stats;
pub mod transport;
pub mod window;
pub mod wire;

pub use config::LinkConfig;
pub use engine::LinkEngine;
pub use error::{LinkError, Result, WireError};
pub use simulator::{FaultConfig, LossyTransport};
pub use stats::StatsSnapshot;
pub use transport::{MemoryTransport, Transport, UdpTransport};
