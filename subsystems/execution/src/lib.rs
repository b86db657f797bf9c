//! # Helix Execution Subsystem
//!
//! The execution subsystem defines:
//! - Thread identity and the thread status state machine
//! - The per-core scheduler contract consumed by the interrupt and IPC layers
//! - The platform hooks a scheduler drives (clock, slice timer, context switch)
//! - Scheduler metrics
//!
//! ## Key Principle
//!
//! This subsystem provides FRAMEWORKS, not implementations.
//! The actual scheduler is a module that plugs into [`scheduler::CoreScheduler`].

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod scheduler;
pub mod context;
pub mod thread;

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

pub use thread::ThreadStatus;

/// Unique identifier for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Allocate a fresh thread ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap an ID handed out by the thread lifecycle manager
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Identifier of an execution unit (core)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(u32);

impl CoreId {
    /// Boot core
    pub const BSP: Self = Self(0);

    /// Create a core ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Index into per-core tables
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
///
/// Every variant except `Internal` is a caller error: the operation that
/// returned it left the scheduler state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Thread not known to this core
    ThreadNotFound,
    /// Thread (or key) already present
    AlreadyExists,
    /// Requested status change is not in the transition table
    InvalidTransition {
        /// Current status
        from: ThreadStatus,
        /// Requested status
        to: ThreadStatus,
    },
    /// Weight is zero, negative or not finite
    InvalidWeight,
    /// Invalid argument
    InvalidArgument,
    /// Operation requires the thread to be the running one
    NotRunning,
    /// Out of resources
    OutOfResources,
    /// Core state is held by another handler
    Busy,
    /// Internal error
    Internal,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::ThreadNotFound => f.write_str("thread not found"),
            ExecError::AlreadyExists => f.write_str("thread already exists"),
            ExecError::InvalidTransition { from, to } => {
                write!(f, "invalid transition {:?} -> {:?}", from, to)
            }
            ExecError::InvalidWeight => f.write_str("weight must be positive and finite"),
            ExecError::InvalidArgument => f.write_str("invalid argument"),
            ExecError::NotRunning => f.write_str("thread is not running"),
            ExecError::OutOfResources => f.write_str("out of resources"),
            ExecError::Busy => f.write_str("core scheduler busy"),
            ExecError::Internal => f.write_str("internal error"),
        }
    }
}

static_assertions::assert_eq_size!(ThreadId, u64);
static_assertions::assert_impl_all!(ExecError: Copy, Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_ids_are_unique() {
        let a = ThreadId::new();
        let b = ThreadId::new();
        assert_ne!(a, b);
        assert_eq!(ThreadId::from_raw(42).as_u64(), 42);
    }

    #[test]
    fn test_error_display() {
        let err = ExecError::InvalidTransition {
            from: ThreadStatus::Stopped,
            to: ThreadStatus::Running,
        };
        assert_eq!(alloc::format!("{}", err), "invalid transition Stopped -> Running");
        assert_eq!(alloc::format!("{}", ExecError::Busy), "core scheduler busy");
    }
}
