//! Engine configuration, following the teacher's `ExecutorConfig` builder
//! convention: a plain struct with `Default` plus `with_*` setters, rather
//! than a derive-heavy builder crate.

use std::time::Duration;

/// Tunables for [`crate::pipeline::EventPipeline`] and the retry/stale-task
/// machinery it drives.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum updates pulled off the bus per pipeline tick.
    pub batch_size: usize,
    /// How long a `Scheduled`/`Inprogress` task instance may sit without a
    /// status update before [`crate::store::EventStore::reclaim_stale`]
    /// treats it as abandoned.
    pub stale_threshold: Duration,
    /// Interval between stale-task reclaim sweeps.
    pub reclaim_interval: Duration,
    /// Retries for publishing an effect after the store write it depends on
    /// has already committed (§4.6: publish is retried with exponential
    /// backoff, the store write is not undone).
    pub publish_retry_limit: u32,
    /// Delay before the first retry; doubled on each subsequent attempt
    /// (`publish_retry_delay * publish_retry_backoff_multiplier.pow(n)`) up
    /// to `publish_retry_max_delay`.
    pub publish_retry_delay: Duration,
    /// Growth factor applied to `publish_retry_delay` per attempt.
    pub publish_retry_backoff_multiplier: u32,
    /// Ceiling on the per-attempt delay, regardless of how many attempts
    /// have elapsed.
    pub publish_retry_max_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            stale_threshold: Duration::from_secs(300),
            reclaim_interval: Duration::from_secs(30),
            publish_retry_limit: 5,
            publish_retry_delay: Duration::from_millis(200),
            publish_retry_backoff_multiplier: 2,
            publish_retry_max_delay: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_stale_threshold(mut self, stale_threshold: Duration) -> Self {
        self.stale_threshold = stale_threshold;
        self
    }

    pub fn with_reclaim_interval(mut self, reclaim_interval: Duration) -> Self {
        self.reclaim_interval = reclaim_interval;
        self
    }

    pub fn with_publish_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.publish_retry_limit = limit;
        self.publish_retry_delay = delay;
        self
    }

    pub fn with_publish_retry_backoff(mut self, multiplier: u32, max_delay: Duration) -> Self {
        self.publish_retry_backoff_multiplier = multiplier;
        self.publish_retry_max_delay = max_delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.batch_size > 0);
        assert!(config.stale_threshold > Duration::ZERO);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let config = EngineConfig::default()
            .with_batch_size(16)
            .with_stale_threshold(Duration::from_secs(10));
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.stale_threshold, Duration::from_secs(10));
    }
}
