//! # Fair Scheduler Implementation
//!
//! Virtual-time accounting, slice computation, pick-next and the status
//! transition handlers of one core.

use crate::record::{ThreadRecord, ThreadSnapshot, Weight};
use crate::tree::{RunKey, RunnableSet, TreeViolation};
use crate::FairConfig;
use alloc::collections::BTreeMap;
use core::fmt;
use helix_execution::context::SwitchReason;
use helix_execution::scheduler::{CorePlatform, CoreScheduler, SchedulerMetrics, SchedulerStats};
use helix_execution::{CoreId, ExecError, ExecResult, ThreadId, ThreadStatus};

/// Broken invariant found by [`FairScheduler::check_consistency`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyError {
    /// The runnable set itself is malformed
    Tree(TreeViolation),
    /// Tracked total weight differs from the recomputed sum
    WeightMismatch {
        /// Incrementally maintained value (raw fixed point)
        tracked: u64,
        /// Sum over schedulable threads (raw fixed point)
        actual: u64,
    },
    /// Tracked schedulable count differs from the recomputed one
    CountMismatch {
        /// Incrementally maintained value
        tracked: usize,
        /// Threads in running or pending status
        actual: usize,
    },
    /// A pending thread is missing from the runnable set
    PendingNotQueued(ThreadId),
    /// The runnable set holds a key with no matching pending thread
    QueuedNotPending(ThreadId),
    /// The running slot and the running statuses disagree
    RunningMismatch(Option<ThreadId>),
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::Tree(v) => write!(f, "runnable set malformed: {:?}", v),
            ConsistencyError::WeightMismatch { tracked, actual } => {
                write!(f, "total weight {} != recomputed {}", tracked, actual)
            }
            ConsistencyError::CountMismatch { tracked, actual } => {
                write!(f, "thread count {} != recomputed {}", tracked, actual)
            }
            ConsistencyError::PendingNotQueued(id) => write!(f, "pending {} not queued", id),
            ConsistencyError::QueuedNotPending(id) => write!(f, "queued {} not pending", id),
            ConsistencyError::RunningMismatch(id) => write!(f, "running slot {:?} inconsistent", id),
        }
    }
}

/// Weighted fair scheduler of one core
pub struct FairScheduler<P: CorePlatform> {
    /// Owning core
    core: CoreId,
    /// Tunable policy
    config: FairConfig,
    /// Clock, slice timer and context switch
    platform: P,
    /// Every thread known to this core, by ID
    records: BTreeMap<ThreadId, ThreadRecord>,
    /// Exactly the pending threads
    runnable: RunnableSet,
    /// Thread holding the core, kept out of `runnable`
    running: Option<ThreadId>,
    /// Running plus pending threads
    thread_cnt: usize,
    /// Sum of schedulable weights (raw fixed point)
    total_weight: u64,
    /// Virtual time removed by rebasing
    virtual_epoch: u128,
    /// Statistics
    metrics: SchedulerMetrics,
}

impl<P: CorePlatform> FairScheduler<P> {
    /// Create the scheduler of `core`
    pub fn new(core: CoreId, config: FairConfig, platform: P) -> ExecResult<Self> {
        config.validate()?;
        log::info!(
            "[fair] Core {}: granularity {}ns, latency {}ns, max {} threads",
            core.index(),
            config.granularity_ns,
            config.latency_ns,
            config.max_threads
        );
        Ok(Self {
            core,
            runnable: RunnableSet::with_capacity(config.max_threads),
            config,
            platform,
            records: BTreeMap::new(),
            running: None,
            thread_cnt: 0,
            total_weight: 0,
            virtual_epoch: 0,
            metrics: SchedulerMetrics::new(),
        })
    }

    /// Owning core
    pub fn core(&self) -> CoreId {
        self.core
    }

    /// Tunable policy
    pub fn config(&self) -> &FairConfig {
        &self.config
    }

    /// Platform hooks
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Platform hooks (mutable)
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Scheduler metrics
    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.metrics
    }

    /// Running plus pending threads
    pub fn thread_cnt(&self) -> usize {
        self.thread_cnt
    }

    /// Sum of schedulable weights
    pub fn total_weight(&self) -> f64 {
        self.total_weight as f64 / Weight::ONE_RAW as f64
    }

    /// Realized scheduling period for the current load
    pub fn sched_period(&self) -> u64 {
        self.config.sched_period(self.thread_cnt)
    }

    /// Pending threads in key order
    pub fn runnable_set(&self) -> &RunnableSet {
        &self.runnable
    }

    /// Virtual time removed by rebasing so far
    pub fn virtual_epoch(&self) -> u128 {
        self.virtual_epoch
    }

    /// Read-only view of one thread
    pub fn snapshot(&self, id: ThreadId) -> ExecResult<ThreadSnapshot> {
        let record = self.records.get(&id).ok_or(ExecError::ThreadNotFound)?;
        Ok(ThreadSnapshot::capture(record, self.virtual_epoch))
    }

    /// Replace a thread's weight.
    ///
    /// Takes effect on the thread's next selection; the virtual start time
    /// and therefore the runnable set position are unchanged.
    pub fn set_weight(&mut self, id: ThreadId, weight: f64) -> ExecResult<()> {
        let weight = Weight::from_f64(weight).map_err(|e| {
            log::warn!("[fair] Rejected weight {} for {}", weight, id);
            e
        })?;
        let record = self.records.get_mut(&id).ok_or(ExecError::ThreadNotFound)?;
        if record.status.is_schedulable() {
            let total = (self.total_weight - record.weight.raw())
                .checked_add(weight.raw())
                .ok_or(ExecError::OutOfResources)?;
            self.total_weight = total;
        }
        log::debug!("[fair] {} weight {:?} -> {:?}", id, record.weight, weight);
        record.weight = weight;
        self.after_event();
        Ok(())
    }

    /// Recompute every invariant from scratch.
    ///
    /// Walks all records and the whole tree; meant for tests and debug
    /// builds, never for the scheduling path.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        self.runnable.verify().map_err(ConsistencyError::Tree)?;

        let mut schedulable = 0;
        let mut weight = 0u64;
        let mut running = None;
        for record in self.records.values() {
            if record.status.is_schedulable() {
                schedulable += 1;
                weight += record.weight.raw();
            }
            match record.status {
                ThreadStatus::Running => {
                    if running.is_some() || self.running != Some(record.id) {
                        return Err(ConsistencyError::RunningMismatch(self.running));
                    }
                    running = Some(record.id);
                }
                ThreadStatus::Pending => {
                    if !self.runnable.contains(record.key()) {
                        return Err(ConsistencyError::PendingNotQueued(record.id));
                    }
                }
                _ => {}
            }
        }
        if running != self.running {
            return Err(ConsistencyError::RunningMismatch(self.running));
        }
        for key in self.runnable.iter() {
            match self.records.get(&key.id) {
                Some(r) if r.status == ThreadStatus::Pending && r.key() == key => {}
                _ => return Err(ConsistencyError::QueuedNotPending(key.id)),
            }
        }
        if schedulable != self.thread_cnt {
            return Err(ConsistencyError::CountMismatch {
                tracked: self.thread_cnt,
                actual: schedulable,
            });
        }
        if weight != self.total_weight {
            return Err(ConsistencyError::WeightMismatch {
                tracked: self.total_weight,
                actual: weight,
            });
        }
        Ok(())
    }

    /// Panic if any invariant is broken
    pub fn assert_consistent(&self) {
        if let Err(violation) = self.check_consistency() {
            log::error!("[fair] Core {} state corrupted: {}", self.core.index(), violation);
            panic!("fair scheduler core {} corrupted: {}", self.core.index(), violation);
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn after_event(&self) {
        if self.config.paranoid_checks {
            self.assert_consistent();
        }
    }

    fn corrupted(&self, what: &str, id: ThreadId) -> ! {
        log::error!("[fair] Core {}: {} ({})", self.core.index(), what, id);
        panic!("fair scheduler core {}: {} ({})", self.core.index(), what, id);
    }

    /// `max(granularity, sched_period * weight / total_weight)`
    fn time_slice_for(&self, weight: Weight) -> u64 {
        let period = self.sched_period();
        if self.total_weight == 0 {
            return period;
        }
        let share = period as u128 * weight.raw() as u128 / self.total_weight as u128;
        u64::try_from(share).unwrap_or(u64::MAX).max(self.config.granularity_ns)
    }

    fn enqueue(&mut self, key: RunKey) {
        if self.runnable.insert(key).is_err() {
            self.corrupted("thread queued twice", key.id);
        }
    }

    fn dequeue(&mut self, key: RunKey) {
        if self.runnable.remove(key).is_err() {
            self.corrupted("pending thread missing from runnable set", key.id);
        }
    }

    fn admit_weight(&mut self, weight: Weight) {
        self.thread_cnt += 1;
        self.total_weight += weight.raw();
    }

    fn retire_weight(&mut self, weight: Weight) {
        self.thread_cnt -= 1;
        self.total_weight -= weight.raw();
    }

    /// Take the running thread off the core, charging `elapsed` real time
    /// (or its whole slice when `elapsed` is `None`), and move it to `status`.
    /// Returns the outgoing thread.
    fn vacate(&mut self, status: ThreadStatus, elapsed: Option<u64>) -> Option<ThreadId> {
        let id = self.running.take()?;
        let now = self.platform.now_ns();
        let rate_scale = self.config.rate_scale;
        let Some(record) = self.records.get_mut(&id) else {
            self.corrupted("running thread has no record", id);
        };
        let used = record.elapsed(now);
        match elapsed {
            Some(real) => record.charge(real, rate_scale),
            None => record.exhaust(),
        }
        record.status = status;
        let (key, weight) = (record.key(), record.weight);
        self.metrics.record_run_time(used);

        if status == ThreadStatus::Pending {
            self.enqueue(key);
        } else {
            self.retire_weight(weight);
        }
        Some(id)
    }

    /// Select the minimum pending thread, or go idle.
    ///
    /// `outgoing` is the thread that held the core before this decision.
    fn pick_next(&mut self, outgoing: Option<ThreadId>, reason: SwitchReason) {
        self.maybe_rebase();

        let Some(key) = self.runnable.min() else {
            self.platform.cancel_timer();
            if outgoing.is_some() {
                self.metrics.record_idle();
                log::trace!("[fair] Core {} idle", self.core.index());
            }
            self.platform.enter_idle(outgoing);
            return;
        };
        self.dequeue(key);

        let weight = match self.records.get(&key.id) {
            Some(record) => record.weight,
            None => self.corrupted("queued thread has no record", key.id),
        };
        let slice = self.time_slice_for(weight);
        let now = self.platform.now_ns();
        let rate_scale = self.config.rate_scale;
        if let Some(record) = self.records.get_mut(&key.id) {
            record.select(slice, now, rate_scale);
        }
        self.running = Some(key.id);

        log::trace!(
            "[fair] Core {} runs {} for {}ns (vtime {})",
            self.core.index(),
            key.id,
            slice,
            key.vtime
        );
        self.platform.arm_timer(slice);
        if outgoing != Some(key.id) {
            self.metrics.record_context_switch();
            self.platform.context_switch(outgoing, key.id, reason);
        }
    }

    /// Shift all virtual times down once the smallest pending key gets
    /// close to the top of the `u64` range.
    ///
    /// The shift is the smallest schedulable virtual time, so running and
    /// pending threads keep their exact relative order. Blocked threads
    /// further behind are clamped at zero.
    fn maybe_rebase(&mut self) {
        let Some(min) = self.runnable.min() else {
            return;
        };
        if min.vtime < self.config.rebase_threshold {
            return;
        }
        let running = self
            .running
            .and_then(|id| self.records.get(&id))
            .map(|r| r.virtual_start_time);
        let base = running.map_or(min.vtime, |vst| vst.min(min.vtime));
        if base == 0 {
            return;
        }
        for record in self.records.values_mut() {
            record.rebase(base);
        }
        self.runnable.shift_keys(base);
        self.virtual_epoch += base as u128;
        self.metrics.record_rebase();
        log::info!("[fair] Core {} rebased virtual time by {}", self.core.index(), base);
    }
}

impl<P: CorePlatform> CoreScheduler for FairScheduler<P> {
    fn name(&self) -> &'static str {
        "Fair"
    }

    fn admit(&mut self, id: ThreadId, weight: f64) -> ExecResult<()> {
        let weight = Weight::from_f64(weight).map_err(|e| {
            log::warn!("[fair] Rejected admission of {}: weight {}", id, weight);
            e
        })?;
        if self.records.contains_key(&id) {
            log::warn!("[fair] {} admitted twice", id);
            return Err(ExecError::AlreadyExists);
        }
        if self.records.len() >= self.config.max_threads
            || self.total_weight.checked_add(weight.raw()).is_none()
        {
            log::warn!("[fair] Core {} full, cannot admit {}", self.core.index(), id);
            return Err(ExecError::OutOfResources);
        }

        // Catch up to the pack so the newcomer neither starves nor monopolizes.
        let virtual_start_time = match (self.runnable.min(), self.running) {
            (Some(min), _) => min.vtime,
            (None, Some(running)) => self
                .records
                .get(&running)
                .map_or(0, |r| r.virtual_start_time),
            (None, None) => 0,
        };

        let record = ThreadRecord::new(id, weight, virtual_start_time);
        self.enqueue(record.key());
        self.records.insert(id, record);
        self.admit_weight(weight);
        log::debug!(
            "[fair] Admitted {} on core {} (weight {:?}, vtime {})",
            id,
            self.core.index(),
            weight,
            virtual_start_time
        );

        if self.running.is_none() {
            self.pick_next(None, SwitchReason::Dispatch);
        }
        self.after_event();
        Ok(())
    }

    fn terminate(&mut self, id: ThreadId) -> ExecResult<()> {
        let record = self.records.get(&id).ok_or(ExecError::ThreadNotFound)?;
        let (status, key, weight) = (record.status, record.key(), record.weight);

        match status {
            ThreadStatus::Running => {
                self.vacate(ThreadStatus::Stopped, Some(0));
                self.records.remove(&id);
                self.pick_next(Some(id), SwitchReason::Exit);
            }
            ThreadStatus::Pending => {
                self.dequeue(key);
                self.retire_weight(weight);
                self.records.remove(&id);
            }
            _ => {
                self.records.remove(&id);
            }
        }
        log::debug!("[fair] Terminated {} ({:?})", id, status);
        self.after_event();
        Ok(())
    }

    fn notify_blocked(&mut self, id: ThreadId, reason: ThreadStatus) -> ExecResult<()> {
        let record = self.records.get(&id).ok_or(ExecError::ThreadNotFound)?;
        if !reason.is_blocked() {
            log::warn!("[fair] {:?} is not a blocking status", reason);
            return Err(ExecError::InvalidArgument);
        }
        if !record.status.can_transition_to(reason) {
            log::warn!("[fair] {} cannot block: {:?} -> {:?}", id, record.status, reason);
            return Err(ExecError::InvalidTransition {
                from: record.status,
                to: reason,
            });
        }
        let (status, key, weight) = (record.status, record.key(), record.weight);
        self.metrics.record_block();

        if status == ThreadStatus::Running {
            let elapsed = record.elapsed(self.platform.now_ns());
            self.vacate(reason, Some(elapsed));
            self.pick_next(Some(id), SwitchReason::Blocked);
        } else {
            self.dequeue(key);
            self.retire_weight(weight);
            if let Some(record) = self.records.get_mut(&id) {
                record.status = reason;
            }
        }
        log::debug!("[fair] {} blocked ({:?})", id, reason);
        self.after_event();
        Ok(())
    }

    fn notify_unblocked(&mut self, id: ThreadId) -> ExecResult<()> {
        let record = self.records.get_mut(&id).ok_or(ExecError::ThreadNotFound)?;
        if !record.status.is_blocked() {
            log::warn!("[fair] {} is not blocked ({:?})", id, record.status);
            return Err(ExecError::InvalidTransition {
                from: record.status,
                to: ThreadStatus::Pending,
            });
        }
        // Virtual start time is left as it was when the thread blocked.
        record.status = ThreadStatus::Pending;
        let (key, weight) = (record.key(), record.weight);
        self.metrics.record_wakeup();
        self.admit_weight(weight);
        self.enqueue(key);
        log::debug!("[fair] {} unblocked (vtime {})", id, key.vtime);

        match self.running {
            None => self.pick_next(None, SwitchReason::Dispatch),
            Some(current) => {
                let now = self.platform.now_ns();
                let (elapsed, current_key) = match self.records.get(&current) {
                    Some(r) => {
                        let elapsed = r.elapsed(now);
                        (elapsed, r.charged_key(elapsed, self.config.rate_scale))
                    }
                    None => self.corrupted("running thread has no record", current),
                };
                if elapsed >= self.config.granularity_ns && key < current_key {
                    log::debug!("[fair] {} preempts {} after {}ns", id, current, elapsed);
                    self.metrics.record_preemption();
                    let outgoing = self.vacate(ThreadStatus::Pending, Some(elapsed));
                    self.pick_next(outgoing, SwitchReason::Preemption);
                }
            }
        }
        self.after_event();
        Ok(())
    }

    fn yield_thread(&mut self, id: ThreadId) -> ExecResult<()> {
        let record = self.records.get(&id).ok_or(ExecError::ThreadNotFound)?;
        if self.running != Some(id) {
            log::warn!("[fair] {} yielded while {:?}", id, record.status);
            return Err(ExecError::NotRunning);
        }
        let elapsed = record.elapsed(self.platform.now_ns());
        self.metrics.record_yield();
        self.vacate(ThreadStatus::Pending, Some(elapsed));
        self.pick_next(Some(id), SwitchReason::Yield);
        self.after_event();
        Ok(())
    }

    fn tick(&mut self) {
        self.metrics.record_tick();
        let Some(current) = self.running else {
            if !self.runnable.is_empty() {
                self.pick_next(None, SwitchReason::Dispatch);
                self.after_event();
            }
            return;
        };

        let now = self.platform.now_ns();
        let (elapsed, slice) = match self.records.get(&current) {
            Some(r) => (r.elapsed(now), r.time_slice_ns),
            None => self.corrupted("running thread has no record", current),
        };
        if elapsed < slice {
            // The one-shot alarm fired early; arm it again for the remainder.
            self.metrics.record_spurious_tick();
            log::trace!("[fair] Early tick for {} ({}/{}ns)", current, elapsed, slice);
            self.platform.arm_timer(slice - elapsed);
            return;
        }

        let outgoing = self.vacate(ThreadStatus::Pending, None);
        self.pick_next(outgoing, SwitchReason::SliceExpired);
        self.after_event();
    }

    fn current_thread(&self) -> Option<ThreadId> {
        self.running
    }

    fn thread_status(&self, id: ThreadId) -> ExecResult<ThreadStatus> {
        self.records
            .get(&id)
            .map(|r| r.status)
            .ok_or(ExecError::ThreadNotFound)
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            threads: self.records.len(),
            runnable_threads: self.thread_cnt,
            blocked_threads: self.records.len() - self.thread_cnt,
            total_weight: self.total_weight(),
            sched_period_ns: self.sched_period(),
            context_switches: self.metrics.context_switches(),
        }
    }
}

impl<P: CorePlatform + fmt::Debug> fmt::Debug for FairScheduler<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FairScheduler")
            .field("core", &self.core)
            .field("running", &self.running)
            .field("thread_cnt", &self.thread_cnt)
            .field("total_weight", &self.total_weight())
            .field("pending", &self.runnable.len())
            .field("platform", &self.platform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedClock;

    impl CorePlatform for FixedClock {
        fn now_ns(&self) -> u64 {
            0
        }

        fn arm_timer(&mut self, _duration_ns: u64) {}

        fn cancel_timer(&mut self) {}

        fn context_switch(&mut self, _from: Option<ThreadId>, _to: ThreadId, _reason: SwitchReason) {}
    }

    fn tid(raw: u64) -> ThreadId {
        ThreadId::from_raw(raw)
    }

    /// T1 running, T2 and T3 pending
    fn loaded() -> FairScheduler<FixedClock> {
        let mut s = FairScheduler::new(CoreId::BSP, FairConfig::new(), FixedClock).unwrap();
        for id in 1..=3 {
            s.admit(tid(id), 1.0).unwrap();
        }
        assert_eq!(s.check_consistency(), Ok(()));
        s
    }

    #[test]
    fn test_detects_weight_drift() {
        let mut s = loaded();
        s.total_weight += 1;
        assert_eq!(
            s.check_consistency(),
            Err(ConsistencyError::WeightMismatch {
                tracked: 3 * Weight::ONE_RAW + 1,
                actual: 3 * Weight::ONE_RAW,
            })
        );
    }

    #[test]
    fn test_detects_count_drift() {
        let mut s = loaded();
        s.thread_cnt += 1;
        assert_eq!(
            s.check_consistency(),
            Err(ConsistencyError::CountMismatch { tracked: 4, actual: 3 })
        );
    }

    #[test]
    fn test_detects_queued_thread_with_wrong_status() {
        let mut s = loaded();
        if let Some(record) = s.records.get_mut(&tid(2)) {
            record.status = ThreadStatus::Sleeping;
        }
        assert_eq!(
            s.check_consistency(),
            Err(ConsistencyError::QueuedNotPending(tid(2)))
        );
    }

    #[test]
    fn test_detects_stale_tree_key() {
        let mut s = loaded();
        let key = RunKey::new(0, tid(3));
        s.runnable.remove(key).unwrap();
        s.runnable.insert(RunKey::new(7, tid(3))).unwrap();
        assert_eq!(
            s.check_consistency(),
            Err(ConsistencyError::PendingNotQueued(tid(3)))
        );
    }

    #[test]
    fn test_detects_running_slot_mismatch() {
        let mut s = loaded();
        s.running = None;
        assert_eq!(s.check_consistency(), Err(ConsistencyError::RunningMismatch(None)));
    }

    #[test]
    #[should_panic(expected = "corrupted")]
    fn test_assert_consistent_panics_on_violation() {
        let mut s = loaded();
        s.total_weight = 0;
        s.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "corrupted")]
    fn test_paranoid_check_runs_after_events() {
        let mut config = FairConfig::new();
        config.paranoid_checks = true;
        let mut s = FairScheduler::new(CoreId::BSP, config, FixedClock).unwrap();
        s.admit(tid(1), 1.0).unwrap();
        s.thread_cnt += 1;
        let _ = s.admit(tid(2), 1.0);
    }
}
