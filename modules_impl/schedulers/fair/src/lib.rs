//! # Fair Scheduler Module
//!
//! A weighted proportional-share scheduler for one Helix core.
//!
//! ## How threads are ordered
//!
//! Every thread carries a virtual start time that advances at a rate
//! inversely proportional to its weight. Pending threads sit in a balanced
//! tree keyed by `(virtual start time, thread id)`, and the smallest key
//! runs next. Heavier threads accrue virtual time more slowly, stay near
//! the front, and so get proportionally more of the core.
//!
//! ## Slices
//!
//! The scheduling period is `max(latency, threads * granularity)`; each
//! selected thread gets `max(granularity, period * weight / total_weight)`.
//!
//! ## Usage
//!
//! One [`FairScheduler`] is created per core at bring-up and installed in a
//! [`helix_execution::scheduler::CoreSchedulers`] table; timer, IPC and
//! lifecycle code then drive it through
//! [`helix_execution::scheduler::CoreScheduler`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

mod config;
mod record;
mod scheduler;
mod tree;


pub use config::FairConfig;
pub use record::{virtual_delta, ThreadSnapshot, Weight};
pub use scheduler::{ConsistencyError, FairScheduler};
pub use tree::{Iter, RunKey, RunnableSet, TreeViolation};

use helix_execution::scheduler::CorePlatform;
use helix_execution::{CoreId, ExecResult};

/// Create a scheduler for `core` with the default policy
pub fn create_scheduler<P: CorePlatform>(core: CoreId, platform: P) -> ExecResult<FairScheduler<P>> {
    FairScheduler::new(core, FairConfig::default(), platform)
}

/// Create a scheduler for `core` with a custom policy
pub fn create_scheduler_with_config<P: CorePlatform>(
    core: CoreId,
    config: FairConfig,
    platform: P,
) -> ExecResult<FairScheduler<P>> {
    FairScheduler::new(core, config, platform)
}

static_assertions::assert_impl_all!(RunnableSet: Send, Sync);
static_assertions::const_assert!(Weight::MAX_RAW.leading_zeros() > 8);
static_assertions::const_assert!(FairConfig::DEFAULT_MAX_THREADS <= FairConfig::MAX_THREADS_LIMIT);
