/// Engine configuration.
///
/// Values can come from code (`LinkConfig { .. }` / `Default`) or from the
/// environment via [`LinkConfig::from_env`]:
///
///   ARQ_SEQUENCE_NUMBERS       modulus for sequence arithmetic   (default 256)
///   ARQ_WINDOW_LIMIT           max outstanding packets            (default 8)
///   ARQ_RETRANSMIT_TIMEOUT_US  retransmit timeout, microseconds   (default 50000)
///   ARQ_TICK_US                engine loop pacing, microseconds   (default 1000)

use std::time::Duration;

use crate::error::{LinkError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Sequence numbers run `0..num_sequence_numbers` and wrap.
    pub num_sequence_numbers: u32,
    /// Maximum packets (data or pure ack) awaiting acknowledgement.
    pub window_limit: usize,
    /// Delay before an unacknowledged packet is sent again.
    pub retransmit_timeout: Duration,
    /// Sleep between engine loop iterations.
    pub tick_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            num_sequence_numbers: 256,
            window_limit: 8,
            retransmit_timeout: Duration::from_millis(50),
            tick_interval: Duration::from_millis(1),
        }
    }
}

impl LinkConfig {
    /// Read the `ARQ_*` variables, falling back to the defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = LinkConfig::default();
        LinkConfig {
            num_sequence_numbers: env_parse("ARQ_SEQUENCE_NUMBERS")
                .unwrap_or(defaults.num_sequence_numbers),
            window_limit: env_parse("ARQ_WINDOW_LIMIT").unwrap_or(defaults.window_limit),
            retransmit_timeout: env_parse("ARQ_RETRANSMIT_TIMEOUT_US")
                .map(Duration::from_micros)
                .unwrap_or(defaults.retransmit_timeout),
            tick_interval: env_parse("ARQ_TICK_US")
                .map(Duration::from_micros)
                .unwrap_or(defaults.tick_interval),
        }
    }

    /// Reject configurations the protocol cannot run with.
    ///
    /// The window must stay under half the sequence space. A reordered frame
    /// can carry an ack up to one window behind the newest; with that margin
    /// such an ack always falls outside the outstanding range.
    pub fn validate(&self) -> Result<()> {
        if self.num_sequence_numbers < 2 {
            return Err(LinkError::InvalidConfig(format!(
                "num_sequence_numbers must be at least 2, got {}",
                self.num_sequence_numbers
            )));
        }
        if self.window_limit == 0 {
            return Err(LinkError::InvalidConfig("window_limit must be at least 1".into()));
        }
        if 2 * self.window_limit as u64 >= u64::from(self.num_sequence_numbers) {
            return Err(LinkError::InvalidConfig(format!(
                "window_limit {} must be less than half of num_sequence_numbers {}",
                self.window_limit, self.num_sequence_numbers
            )));
        }
        if self.retransmit_timeout.is_zero() {
            return Err(LinkError::InvalidConfig("retransmit_timeout must be non-zero".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(LinkError::InvalidConfig("tick_interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse an environment variable, treating unset and malformed values alike.
pub fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
