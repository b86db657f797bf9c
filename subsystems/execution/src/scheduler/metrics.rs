//! # Scheduler Metrics
//!
//! Counters for scheduler behaviour monitoring.

use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler metrics
#[derive(Debug)]
pub struct SchedulerMetrics {
    /// Total context switches
    context_switches: AtomicU64,
    /// Total slice timer expiries delivered
    ticks: AtomicU64,
    /// Expiries that arrived before the slice was used up
    spurious_ticks: AtomicU64,
    /// Total voluntary yields
    voluntary_yields: AtomicU64,
    /// Total preemptions by a woken thread
    preemptions: AtomicU64,
    /// Total block notifications
    blocks: AtomicU64,
    /// Total unblock notifications
    wakeups: AtomicU64,
    /// Times the core went idle
    idle_entries: AtomicU64,
    /// Virtual time rebases
    rebases: AtomicU64,
    /// Real time charged to threads (nanoseconds)
    run_time: AtomicU64,
}

impl SchedulerMetrics {
    /// Create new metrics
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            spurious_ticks: AtomicU64::new(0),
            voluntary_yields: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            idle_entries: AtomicU64::new(0),
            rebases: AtomicU64::new(0),
            run_time: AtomicU64::new(0),
        }
    }

    /// Record a context switch
    pub fn record_context_switch(&self) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timer tick
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an early timer tick
    pub fn record_spurious_tick(&self) {
        self.spurious_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a voluntary yield
    pub fn record_yield(&self) {
        self.voluntary_yields.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a preemption
    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a block notification
    pub fn record_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an unblock notification
    pub fn record_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the core going idle
    pub fn record_idle(&self) {
        self.idle_entries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a virtual time rebase
    pub fn record_rebase(&self) {
        self.rebases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record run time
    pub fn record_run_time(&self, ns: u64) {
        self.run_time.fetch_add(ns, Ordering::Relaxed);
    }

    /// Get total context switches
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Get total ticks
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Get spurious ticks
    pub fn spurious_ticks(&self) -> u64 {
        self.spurious_ticks.load(Ordering::Relaxed)
    }

    /// Get voluntary yields
    pub fn voluntary_yields(&self) -> u64 {
        self.voluntary_yields.load(Ordering::Relaxed)
    }

    /// Get preemptions
    pub fn preemptions(&self) -> u64 {
        self.preemptions.load(Ordering::Relaxed)
    }

    /// Get block notifications
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Get unblock notifications
    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Relaxed)
    }

    /// Get idle entries
    pub fn idle_entries(&self) -> u64 {
        self.idle_entries.load(Ordering::Relaxed)
    }

    /// Get rebases
    pub fn rebases(&self) -> u64 {
        self.rebases.load(Ordering::Relaxed)
    }

    /// Get run time
    pub fn run_time(&self) -> u64 {
        self.run_time.load(Ordering::Relaxed)
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.context_switches,
            &self.ticks,
            &self.spurious_ticks,
            &self.voluntary_yields,
            &self.preemptions,
            &self.blocks,
            &self.wakeups,
            &self.idle_entries,
            &self.rebases,
            &self.run_time,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_reset() {
        let metrics = SchedulerMetrics::new();
        metrics.record_context_switch();
        metrics.record_context_switch();
        metrics.record_preemption();
        metrics.record_run_time(1_500);
        assert_eq!(metrics.context_switches(), 2);
        assert_eq!(metrics.preemptions(), 1);
        assert_eq!(metrics.run_time(), 1_500);

        metrics.reset();
        assert_eq!(metrics.context_switches(), 0);
        assert_eq!(metrics.run_time(), 0);
    }
}
