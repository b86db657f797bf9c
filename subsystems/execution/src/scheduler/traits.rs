//! # Scheduler Traits
//!
//! The two seams of a per-core scheduler: what it consumes from the
//! platform, and what it exposes to the rest of the kernel.

use crate::context::SwitchReason;
use crate::{ExecResult, ThreadId, ThreadStatus};

/// Hooks a per-core scheduler drives on its platform.
///
/// Implemented by the timer driver / architecture layer of each core.
pub trait CorePlatform {
    /// Monotonic real time in nanoseconds
    fn now_ns(&self) -> u64;

    /// Arm the one-shot slice timer; expiry must be reported through
    /// [`CoreScheduler::tick`]. Re-arming replaces any pending alarm.
    fn arm_timer(&mut self, duration_ns: u64);

    /// Cancel the slice timer
    fn cancel_timer(&mut self);

    /// No thread is runnable; `from` is the thread that just left the core
    fn enter_idle(&mut self, _from: Option<ThreadId>) {}

    /// Swap the execution context. Called only after the scheduler's own
    /// bookkeeping is complete, and only when the running thread changes.
    fn context_switch(&mut self, from: Option<ThreadId>, to: ThreadId, reason: SwitchReason);
}

/// The per-core scheduler contract
///
/// Every method is a run-to-completion handler; callers must hold
/// exclusive access to the core's scheduler (see [`super::CoreSchedulers`]).
pub trait CoreScheduler {
    /// Get the scheduler name
    fn name(&self) -> &'static str;

    /// Register a new thread with this core
    fn admit(&mut self, id: ThreadId, weight: f64) -> ExecResult<()>;

    /// Remove a thread permanently
    fn terminate(&mut self, id: ThreadId) -> ExecResult<()>;

    /// A blocking primitive parked the thread; `reason` is a blocked status
    fn notify_blocked(&mut self, id: ThreadId, reason: ThreadStatus) -> ExecResult<()>;

    /// A blocking primitive released the thread
    fn notify_unblocked(&mut self, id: ThreadId) -> ExecResult<()>;

    /// The running thread gives up the rest of its slice
    fn yield_thread(&mut self, id: ThreadId) -> ExecResult<()>;

    /// Slice timer expiry
    fn tick(&mut self);

    /// The running thread on this core, if any
    fn current_thread(&self) -> Option<ThreadId>;

    /// Read-only status introspection
    fn thread_status(&self, id: ThreadId) -> ExecResult<ThreadStatus>;

    /// Scheduler statistics
    fn stats(&self) -> SchedulerStats;
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerStats {
    /// Threads known to the core (any status but stopped)
    pub threads: usize,
    /// Running plus pending threads
    pub runnable_threads: usize,
    /// Threads in a blocked status
    pub blocked_threads: usize,
    /// Sum of schedulable weights
    pub total_weight: f64,
    /// Scheduling period for the current load (nanoseconds)
    pub sched_period_ns: u64,
    /// Total number of context switches
    pub context_switches: u64,
}
