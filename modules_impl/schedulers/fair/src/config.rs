//! # Fair Scheduler Configuration

use crate::record::Weight;
use helix_execution::{ExecError, ExecResult};

/// Tunable policy of the fair scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FairConfig {
    /// Minimum slice ever granted, and minimum run length before a woken
    /// thread may preempt (nanoseconds)
    pub granularity_ns: u64,
    /// Target period over which every runnable thread gets a turn (nanoseconds)
    pub latency_ns: u64,
    /// Scaling constant `K` of `rate = K / weight`, in weight fixed-point
    /// units; [`Weight::ONE_RAW`] makes a weight-1.0 thread accrue one
    /// virtual nanosecond per real nanosecond
    pub rate_scale: u64,
    /// Threads a core will track before admission fails
    pub max_threads: usize,
    /// Minimum virtual time at which all virtual times are shifted down
    pub rebase_threshold: u64,
    /// Run the full consistency check after every event
    pub paranoid_checks: bool,
}

impl FairConfig {
    /// Default granularity: 1ms
    pub const DEFAULT_GRANULARITY_NS: u64 = 1_000_000;
    /// Default latency: 10ms
    pub const DEFAULT_LATENCY_NS: u64 = 10_000_000;
    /// Default thread limit per core
    pub const DEFAULT_MAX_THREADS: usize = 255;
    /// Largest `max_threads` whose summed weights always fit a `u64`
    pub const MAX_THREADS_LIMIT: usize = (u64::MAX / Weight::MAX_RAW) as usize;
    /// Default rebase threshold, a quarter of the `u64` range
    pub const DEFAULT_REBASE_THRESHOLD: u64 = 1 << 62;

    /// Create default configuration
    pub fn new() -> Self {
        Self {
            granularity_ns: Self::DEFAULT_GRANULARITY_NS,
            latency_ns: Self::DEFAULT_LATENCY_NS,
            rate_scale: Weight::ONE_RAW,
            max_threads: Self::DEFAULT_MAX_THREADS,
            rebase_threshold: Self::DEFAULT_REBASE_THRESHOLD,
            paranoid_checks: cfg!(debug_assertions),
        }
    }

    /// Short period for interactive loads
    pub fn low_latency() -> Self {
        Self {
            granularity_ns: 500_000, // 0.5ms
            latency_ns: 4_000_000,   // 4ms
            ..Self::new()
        }
    }

    /// Long slices, fewer switches
    pub fn throughput() -> Self {
        Self {
            granularity_ns: 4_000_000, // 4ms
            latency_ns: 40_000_000,    // 40ms
            ..Self::new()
        }
    }

    /// Set the granularity
    pub fn with_granularity_ns(mut self, granularity_ns: u64) -> Self {
        self.granularity_ns = granularity_ns;
        self
    }

    /// Set the latency
    pub fn with_latency_ns(mut self, latency_ns: u64) -> Self {
        self.latency_ns = latency_ns;
        self
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> ExecResult<()> {
        if self.granularity_ns == 0
            || self.latency_ns < self.granularity_ns
            || self.rate_scale == 0
            || self.max_threads == 0
            || self.max_threads > Self::MAX_THREADS_LIMIT
            || self.rebase_threshold == 0
        {
            return Err(ExecError::InvalidArgument);
        }
        Ok(())
    }

    /// Realized scheduling period for `thread_cnt` schedulable threads
    pub fn sched_period(&self, thread_cnt: usize) -> u64 {
        let stretched = (thread_cnt as u64).saturating_mul(self.granularity_ns);
        self.latency_ns.max(stretched)
    }
}

impl Default for FairConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_stretches_under_load() {
        let config = FairConfig::new();
        assert_eq!(config.sched_period(0), 10_000_000);
        assert_eq!(config.sched_period(2), 10_000_000);
        assert_eq!(config.sched_period(10), 10_000_000);
        assert_eq!(config.sched_period(25), 25_000_000);
    }

    #[test]
    fn test_validate() {
        assert!(FairConfig::new().validate().is_ok());
        assert!(FairConfig::low_latency().validate().is_ok());
        assert!(FairConfig::throughput().validate().is_ok());
        assert_eq!(
            FairConfig::new().with_granularity_ns(0).validate(),
            Err(ExecError::InvalidArgument)
        );
        assert_eq!(
            FairConfig::new().with_latency_ns(500_000).validate(),
            Err(ExecError::InvalidArgument)
        );
    }

    #[test]
    fn test_thread_limit_keeps_weights_summable() {
        let mut config = FairConfig::new();
        config.max_threads = FairConfig::MAX_THREADS_LIMIT;
        assert!(config.validate().is_ok());
        let total = config.max_threads as u128 * Weight::MAX_RAW as u128;
        assert!(total <= u64::MAX as u128);

        config.max_threads = FairConfig::MAX_THREADS_LIMIT + 1;
        assert_eq!(config.validate(), Err(ExecError::InvalidArgument));
        config.max_threads = usize::MAX;
        assert_eq!(config.validate(), Err(ExecError::InvalidArgument));
    }
}
