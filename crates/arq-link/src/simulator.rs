/// Fault-injecting transport wrapper for tests and soak runs.
///
/// Real links drop, corrupt and reorder frames. [`LossyTransport`] wraps any
/// [`Transport`] and applies a seeded fault model to outgoing frames so the
/// recovery paths can be exercised reproducibly:
///
/// | Fault        | Effect                                                   |
/// |--------------|----------------------------------------------------------|
/// | Send failure | `send` reports 0; the engine retries next tick.          |
/// | Loss         | Frame vanishes but `send` reports success.               |
/// | Corruption   | One random bit of the frame is flipped.                  |
/// | Reordering   | Frame is held back and released after the next frame.   |
///
/// Frames are never duplicated.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transport::Transport;

/// Fault probabilities, each clamped to `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub reorder_rate: f64,
    pub send_failure_rate: f64,
    /// RNG seed; equal seeds replay the same fault sequence.
    pub seed: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        // No faults by default: a transparent pass-through.
        FaultConfig {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            reorder_rate: 0.0,
            send_failure_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counts of injected faults.
#[derive(Debug, Default)]
pub struct FaultStats {
    pub lost: AtomicU64,
    pub corrupted: AtomicU64,
    pub reordered: AtomicU64,
    pub failed: AtomicU64,
}

struct FaultState {
    rng: StdRng,
    held: Option<Vec<u8>>,
}

pub struct LossyTransport<T> {
    inner: T,
    config: FaultConfig,
    state: Mutex<FaultState>,
    stats: FaultStats,
}

impl<T: Transport> LossyTransport<T> {
    pub fn new(inner: T, mut config: FaultConfig) -> Self {
        for rate in [
            &mut config.loss_rate,
            &mut config.corrupt_rate,
            &mut config.reorder_rate,
            &mut config.send_failure_rate,
        ] {
            *rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };
        }
        let rng = StdRng::seed_from_u64(config.seed);
        LossyTransport {
            inner,
            config,
            state: Mutex::new(FaultState { rng, held: None }),
            stats: FaultStats::default(),
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn stats(&self) -> &FaultStats {
        &self.stats
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Release a held-back frame, if any.
    pub fn flush(&self) {
        if let Some(held) = self.state.lock().held.take() {
            self.inner.send(&held);
        }
    }
}

impl<T: Transport> LossyTransport<T> {
    /// Apply the fault model to one frame. `may_hold` is false while an
    /// earlier frame is being released, so at most one frame is ever held.
    fn transmit(&self, state: &mut FaultState, frame: &[u8], may_hold: bool) -> usize {
        let cfg = &self.config;

        if state.rng.random_bool(cfg.send_failure_rate) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return 0;
        }
        if state.rng.random_bool(cfg.loss_rate) {
            self.stats.lost.fetch_add(1, Ordering::Relaxed);
            return frame.len();
        }

        let mut out = frame.to_vec();
        if !out.is_empty() && state.rng.random_bool(cfg.corrupt_rate) {
            let idx = state.rng.random_range(0..out.len());
            let bit = state.rng.random_range(0..8u32);
            out[idx] ^= 1 << bit;
            self.stats.corrupted.fetch_add(1, Ordering::Relaxed);
        }

        if may_hold && state.rng.random_bool(cfg.reorder_rate) {
            state.held = Some(out);
            self.stats.reordered.fetch_add(1, Ordering::Relaxed);
            return frame.len();
        }

        if self.inner.send(&out) == out.len() { frame.len() } else { 0 }
    }
}

impl<T: Transport> Transport for LossyTransport<T> {
    /// A held frame goes out right after the current one, whatever happens
    /// to the current one, so no frame is displaced by more than one slot.
    fn send(&self, frame: &[u8]) -> usize {
        let mut state = self.state.lock();
        let earlier = state.held.take();
        let reported = self.transmit(&mut state, frame, earlier.is_none());
        if let Some(held) = earlier {
            self.inner.send(&held);
        }
        reported
    }

    fn receive(&self, buf: &mut [u8]) -> usize {
        self.inner.receive(buf)
    }

    fn max_frame_len(&self) -> usize {
        self.inner.max_frame_len()
    }
}
