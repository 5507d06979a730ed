//! Engine configuration.
//!
//! Static inter-call delays and retry settings for capture and restore.
//! The binary fills this from CLI flags / environment variables; tests use
//! [`EngineConfig::for_tests`].

use std::time::Duration;

use crate::backup::retry::RetryPolicy;

/// Default delay between role creations/deletions (ms).
const DEFAULT_ROLE_DELAY_MS: u64 = 400;

/// Default delay between channel creations/deletions (ms).
const DEFAULT_CHANNEL_DELAY_MS: u64 = 500;

/// Default delay between emoji creations/deletions (ms).
const DEFAULT_EMOJI_DELAY_MS: u64 = 300;

/// Default delay between capture-time channel and emoji fetches (ms).
const DEFAULT_FETCH_DELAY_MS: u64 = 300;

/// Default relay endpoint (webhook) name.
pub const DEFAULT_RELAY_NAME: &str = "Umbra Backup";

/// Messages between progress callbacks during replay.
const DEFAULT_PROGRESS_EVERY: usize = 50;

/// Fixed courtesy delays between platform calls. Not adaptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    pub role_delay: Duration,
    pub channel_delay: Duration,
    pub emoji_delay: Duration,
    pub fetch_delay: Duration,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            role_delay: Duration::from_millis(DEFAULT_ROLE_DELAY_MS),
            channel_delay: Duration::from_millis(DEFAULT_CHANNEL_DELAY_MS),
            emoji_delay: Duration::from_millis(DEFAULT_EMOJI_DELAY_MS),
            fetch_delay: Duration::from_millis(DEFAULT_FETCH_DELAY_MS),
        }
    }
}

impl Throttle {
    /// No delays at all.
    pub fn none() -> Self {
        Self {
            role_delay: Duration::ZERO,
            channel_delay: Duration::ZERO,
            emoji_delay: Duration::ZERO,
            fetch_delay: Duration::ZERO,
        }
    }
}

/// Sleep for `delay` unless it is zero.
pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Capture / restore engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub throttle: Throttle,
    pub retry: RetryPolicy,
    /// Name of the per-channel relay endpoint used for message replay.
    pub relay_name: String,
    /// Invoke the progress callback every N replayed messages.
    pub progress_every: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle: Throttle::default(),
            retry: RetryPolicy::default(),
            relay_name: DEFAULT_RELAY_NAME.to_string(),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}

impl EngineConfig {
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            throttle: Throttle::none(),
            retry: RetryPolicy {
                max_attempts: 2,
                backoff: crate::backup::retry::Backoff::Fixed(Duration::ZERO),
            },
            ..Self::default()
        }
    }
}
