//! # Context Switching
//!
//! Why a scheduler asks the platform to swap execution contexts.
//! The swap itself is the platform's job (see [`crate::scheduler::CorePlatform`]).

/// Context switch reason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchReason {
    /// Core was idle and a thread became available
    Dispatch,
    /// Voluntary yield
    Yield,
    /// Running thread used up its slice
    SliceExpired,
    /// Newly pending thread took over
    Preemption,
    /// Running thread blocked
    Blocked,
    /// Running thread terminated
    Exit,
}

impl SwitchReason {
    /// Whether the outgoing thread gave up the core on its own
    pub fn is_voluntary(self) -> bool {
        matches!(self, SwitchReason::Yield | SwitchReason::Blocked | SwitchReason::Exit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voluntary_reasons() {
        assert!(SwitchReason::Yield.is_voluntary());
        assert!(SwitchReason::Blocked.is_voluntary());
        assert!(!SwitchReason::SliceExpired.is_voluntary());
        assert!(!SwitchReason::Preemption.is_voluntary());
    }
}
