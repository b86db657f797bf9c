//! # Scheduler Framework
//!
//! This module defines the scheduler FRAMEWORK, not a specific scheduler.
//! Actual scheduler implementations are provided as modules.
//!
//! Each core owns exactly one scheduler instance. The instances live in a
//! [`CoreSchedulers`] table created at bring-up and handed by reference to
//! every event source; nothing here is a global.

pub mod traits;
pub mod metrics;

use crate::{CoreId, ExecError, ExecResult, ThreadId};
use alloc::collections::BTreeMap;
use spin::Mutex;

pub use traits::*;
pub use metrics::SchedulerMetrics;

/// Per-core scheduler table
///
/// Every core's scheduler sits behind its own lock, which is the
/// serialization point for tick, yield, block, unblock, admission and
/// termination handlers. The platform must mask interrupts around
/// [`CoreSchedulers::with_core`] when called from thread context.
#[derive(Debug)]
pub struct CoreSchedulers<S> {
    cores: BTreeMap<CoreId, Mutex<S>>,
}

impl<S> CoreSchedulers<S> {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            cores: BTreeMap::new(),
        }
    }

    /// Install the scheduler of a core that is coming online
    pub fn bring_up(&mut self, core: CoreId, scheduler: S) -> ExecResult<()> {
        if self.cores.contains_key(&core) {
            return Err(ExecError::AlreadyExists);
        }
        log::info!("Core {} scheduler online", core.index());
        self.cores.insert(core, Mutex::new(scheduler));
        Ok(())
    }

    /// Tear down the scheduler of a core going offline
    pub fn shutdown(&mut self, core: CoreId) -> ExecResult<S> {
        let scheduler = self.cores.remove(&core).ok_or(ExecError::InvalidArgument)?;
        log::info!("Core {} scheduler offline", core.index());
        Ok(scheduler.into_inner())
    }

    /// Number of online cores
    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    /// Run a handler with exclusive access to a core's scheduler
    pub fn with_core<R>(&self, core: CoreId, f: impl FnOnce(&mut S) -> R) -> ExecResult<R> {
        let slot = self.cores.get(&core).ok_or(ExecError::InvalidArgument)?;
        let mut scheduler = slot.lock();
        Ok(f(&mut scheduler))
    }

    /// Like [`with_core`](Self::with_core), but fails with [`ExecError::Busy`]
    /// instead of spinning when another handler holds the core.
    pub fn try_with_core<R>(&self, core: CoreId, f: impl FnOnce(&mut S) -> R) -> ExecResult<R> {
        let slot = self.cores.get(&core).ok_or(ExecError::InvalidArgument)?;
        let mut scheduler = slot.try_lock().ok_or(ExecError::Busy)?;
        Ok(f(&mut scheduler))
    }
}

impl<S: CoreScheduler> CoreSchedulers<S> {
    /// Running thread of a core
    pub fn current_thread(&self, core: CoreId) -> ExecResult<Option<ThreadId>> {
        self.with_core(core, |s| s.current_thread())
    }

    /// Deliver a slice timer expiry to a core
    pub fn tick(&self, core: CoreId) -> ExecResult<()> {
        self.with_core(core, |s| s.tick())
    }
}

impl<S> Default for CoreSchedulers<S> {
    fn default() -> Self {
        Self::new()
    }
}

static_assertions::assert_impl_all!(CoreSchedulers<u64>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bring_up_and_shutdown() {
        let mut table: CoreSchedulers<u32> = CoreSchedulers::new();
        table.bring_up(CoreId::BSP, 7).unwrap();
        table.bring_up(CoreId::new(1), 9).unwrap();
        assert_eq!(table.bring_up(CoreId::BSP, 1), Err(ExecError::AlreadyExists));
        assert_eq!(table.core_count(), 2);

        assert_eq!(table.shutdown(CoreId::new(1)), Ok(9));
        assert_eq!(table.shutdown(CoreId::new(1)), Err(ExecError::InvalidArgument));
        assert_eq!(table.core_count(), 1);
    }

    #[test]
    fn test_with_core_is_exclusive() {
        let mut table: CoreSchedulers<u32> = CoreSchedulers::new();
        table.bring_up(CoreId::BSP, 0).unwrap();

        table.with_core(CoreId::BSP, |s| *s += 1).unwrap();
        let nested = table
            .with_core(CoreId::BSP, |_| table.try_with_core(CoreId::BSP, |s| *s))
            .unwrap();
        assert_eq!(nested, Err(ExecError::Busy));
        assert_eq!(table.try_with_core(CoreId::BSP, |s| *s), Ok(1));
        assert_eq!(
            table.with_core(CoreId::new(3), |s| *s),
            Err(ExecError::InvalidArgument)
        );
    }
}
