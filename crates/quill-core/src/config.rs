//! Engine tuning knobs.
//!
//! One struct with conservative defaults; callers override per deployment.

use std::time::Duration;

/// Tuning for the sync/conflict engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum title length accepted by `create_version`, in characters
    pub max_title_len: usize,
    /// Maximum content length accepted by `create_version`, in bytes
    pub max_content_len: usize,
    /// Attempts a queue item gets before failing terminally
    pub max_sync_attempts: u32,
    /// Base delay for exponential retry backoff
    pub backoff_base: Duration,
    /// Window within which a same-title create by the same user is a duplicate
    pub create_dedup_window: Duration,
    /// Inactivity threshold after which an editing session is force-stopped
    pub editing_inactivity_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_title_len: 500,
            max_content_len: 1024 * 1024,
            max_sync_attempts: 3,
            backoff_base: Duration::from_secs(2),
            create_dedup_window: Duration::from_secs(30),
            editing_inactivity_timeout: Duration::from_secs(120),
        }
    }
}

impl EngineConfig {
    /// Retry delay before attempt number `attempts + 1`: base × 2^attempts
    #[must_use]
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        // Cap the shift so a misconfigured attempt count cannot overflow
        let factor = 2_u32.saturating_pow(attempts.min(16));
        self.backoff_base.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let config = EngineConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(4));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_capped() {
        let config = EngineConfig::default();
        // Absurd attempt counts must not overflow
        let delay = config.backoff_delay(u32::MAX);
        assert!(delay >= config.backoff_delay(16));
    }
}
