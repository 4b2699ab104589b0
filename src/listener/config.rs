//! Listener configuration.

use std::time::Duration;

use crate::core::constants::{
    LISTEN_MAX_RETRIES, LISTEN_RETRY_BACKOFF, LISTEN_RETRY_INITIAL, LISTEN_RETRY_MAX, PPTP_PORT,
};

/// Bind behaviour of the listener manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Port used when `acquire` is called with port 0.
    pub default_port: u16,
    /// Delay before the first bind retry.
    pub retry_initial: Duration,
    /// Factor applied to the delay after each retry.
    pub retry_backoff: u32,
    /// Upper bound on the retry delay.
    pub retry_max_delay: Duration,
    /// Retries after the first failed bind.
    pub max_retries: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            default_port: PPTP_PORT,
            retry_initial: LISTEN_RETRY_INITIAL,
            retry_backoff: LISTEN_RETRY_BACKOFF,
            retry_max_delay: LISTEN_RETRY_MAX,
            max_retries: LISTEN_MAX_RETRIES,
        }
    }
}

impl ListenerConfig {
    /// Set the default port.
    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Set the first retry delay.
    pub fn retry_initial(mut self, delay: Duration) -> Self {
        self.retry_initial = delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn retry_backoff(mut self, factor: u32) -> Self {
        self.retry_backoff = factor.max(1);
        self
    }

    /// Set the retry delay cap.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// Set the number of retries.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = self.retry_backoff.saturating_pow(attempt);
        self.retry_initial
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ListenerConfig::default();
        assert_eq!(config.default_port, 1723);
        assert_eq!(config.retry_backoff, 2);
        assert_eq!(config.retry_max_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_retry_delay_doubles_up_to_cap() {
        let config = ListenerConfig::default();
        let delays: Vec<u64> = (0..6).map(|n| config.retry_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(config.retry_delay(60), Duration::from_secs(10));
    }
}
