//! Runtime configuration
//!
//! Parallelism, timeouts, checkpoint cadence, and retry policy for the
//! Pregel execution engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pregel runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PregelConfig {
    /// Maximum supersteps before forced termination
    pub max_supersteps: u64,

    /// Maximum concurrent vertex computations
    pub parallelism: usize,

    /// Checkpoint frequency (every N supersteps, 0 = disabled)
    pub checkpoint_interval: u64,

    /// Deadline for a single vertex computation
    #[serde(with = "humantime_serde")]
    pub vertex_timeout: Duration,

    /// Deadline for the entire workflow
    #[serde(with = "humantime_serde")]
    pub workflow_timeout: Duration,

    /// Enable detailed tracing
    pub tracing_enabled: bool,

    /// Retry policy for failed vertices
    pub retry_policy: RetryPolicy,
}

impl Default for PregelConfig {
    fn default() -> Self {
        Self {
            max_supersteps: 100,
            parallelism: num_cpus::get(),
            checkpoint_interval: 10,
            vertex_timeout: Duration::from_secs(300),
            workflow_timeout: Duration::from_secs(3600),
            tracing_enabled: true,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl PregelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_supersteps(mut self, max: u64) -> Self {
        self.max_supersteps = max;
        self
    }

    /// Set the parallelism level (clamped to at least 1)
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Set the checkpoint interval (0 disables checkpointing)
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_vertex_timeout(mut self, timeout: Duration) -> Self {
        self.vertex_timeout = timeout;
        self
    }

    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = timeout;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Check if checkpointing is enabled
    pub fn checkpointing_enabled(&self) -> bool {
        self.checkpoint_interval > 0
    }

    /// Check if a checkpoint is due at this superstep boundary
    pub fn should_checkpoint(&self, superstep: u64) -> bool {
        self.checkpointing_enabled() && superstep > 0 && superstep % self.checkpoint_interval == 0
    }
}

/// Retry policy for failed vertex computations
///
/// Exponential backoff: attempt n waits `initial_backoff * multiplier^n`,
/// capped at `max_backoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts per vertex
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Backoff growth factor between attempts
    pub multiplier: f64,

    /// Ceiling on any single backoff delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let delay = self.initial_backoff.mul_f64(factor);
        delay.min(self.max_backoff)
    }

    /// Whether another retry is allowed after `attempts` retries so far
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documentation() {
        let config = PregelConfig::default();
        assert_eq!(config.max_supersteps, 100);
        assert!(config.parallelism >= 1);
        assert_eq!(config.checkpoint_interval, 10);
        assert_eq!(config.vertex_timeout, Duration::from_secs(5 * 60));
        assert_eq!(config.workflow_timeout, Duration::from_secs(60 * 60));
        assert!(config.tracing_enabled);

        let retry = &config.retry_policy;
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(retry.multiplier, 2.0);
        assert_eq!(retry.max_backoff, Duration::from_secs(30));
    }

    #[test]
    fn builder_overrides_compose() {
        let config = PregelConfig::default()
            .with_max_supersteps(12)
            .with_parallelism(3)
            .with_checkpoint_interval(4)
            .with_vertex_timeout(Duration::from_secs(90))
            .with_workflow_timeout(Duration::from_secs(900))
            .with_tracing(false);

        assert_eq!(config.max_supersteps, 12);
        assert_eq!(config.parallelism, 3);
        assert_eq!(config.checkpoint_interval, 4);
        assert_eq!(config.vertex_timeout, Duration::from_secs(90));
        assert_eq!(config.workflow_timeout, Duration::from_secs(900));
        assert!(!config.tracing_enabled);
    }

    #[test]
    fn parallelism_never_drops_to_zero() {
        assert_eq!(PregelConfig::default().with_parallelism(0).parallelism, 1);
    }

    #[test]
    fn checkpoint_due_only_on_interval_boundaries() {
        let config = PregelConfig::default().with_checkpoint_interval(4);

        assert!(!config.should_checkpoint(0));
        assert!(!config.should_checkpoint(3));
        assert!(config.should_checkpoint(4));
        assert!(!config.should_checkpoint(6));
        assert!(config.should_checkpoint(8));
        assert!(config.should_checkpoint(12));
    }

    #[test]
    fn zero_interval_disables_checkpointing() {
        let config = PregelConfig::default().with_checkpoint_interval(0);
        assert!(!config.checkpointing_enabled());
        assert!(!config.should_checkpoint(8));
    }

    #[test]
    fn default_backoff_doubles_from_one_second() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn default_ceiling_caps_late_attempts() {
        let policy = RetryPolicy::default();

        // 16s is still under the 30s cap; 32s and beyond are clamped to it.
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(12), Duration::from_secs(30));
    }

    #[test]
    fn retry_budget_is_exclusive_of_max() {
        let policy = RetryPolicy::new(2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));

        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn sub_unit_multiplier_degrades_to_constant_backoff() {
        let policy = RetryPolicy::default().with_multiplier(0.25);

        assert_eq!(policy.multiplier, 1.0);
        assert_eq!(policy.delay_for_attempt(0), policy.delay_for_attempt(6));
        assert_eq!(policy.delay_for_attempt(6), policy.initial_backoff);
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = PregelConfig::default()
            .with_checkpoint_interval(7)
            .with_retry_policy(RetryPolicy::new(5).with_max_backoff(Duration::from_secs(45)));

        let json = serde_json::to_string(&config).unwrap();
        let decoded: PregelConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.checkpoint_interval, 7);
        assert_eq!(decoded.retry_policy.max_retries, 5);
        assert_eq!(decoded.retry_policy.max_backoff, Duration::from_secs(45));
    }
}
