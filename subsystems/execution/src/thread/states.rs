//! # Thread States
//!
//! Thread status state machine definition.

use bitflags::bitflags;

/// Thread status (unit-only for compact storage)
///
/// The blocked variants are distinguished only for reporting; a scheduler
/// treats all of them, `Sleeping` included, the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ThreadStatus {
    /// Has terminated
    Stopped = 0,
    /// Sleeping
    Sleeping = 1,
    /// Waiting for a locked mutex
    MutexBlocked = 2,
    /// Waiting for a message
    ReceiveBlocked = 3,
    /// Waiting for a message to be delivered
    SendBlocked = 4,
    /// Waiting for a message response
    ReplyBlocked = 5,
    /// Waiting for any flag from a flag mask
    FlagBlockedAny = 6,
    /// Waiting for all flags in a flag mask
    FlagBlockedAll = 7,
    /// Waiting for get/put on a mailbox
    MboxBlocked = 8,
    /// Waiting for a condition variable
    CondBlocked = 9,
    /// Currently running
    Running = 10,
    /// Waiting to be scheduled to run
    Pending = 11,
}

bitflags! {
    /// A set of thread statuses
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusSet: u16 {
        /// Stopped
        const STOPPED = 1 << 0;
        /// Sleeping
        const SLEEPING = 1 << 1;
        /// Mutex blocked
        const MUTEX_BLOCKED = 1 << 2;
        /// Receive blocked
        const RECEIVE_BLOCKED = 1 << 3;
        /// Send blocked
        const SEND_BLOCKED = 1 << 4;
        /// Reply blocked
        const REPLY_BLOCKED = 1 << 5;
        /// Flag blocked (any)
        const FLAG_BLOCKED_ANY = 1 << 6;
        /// Flag blocked (all)
        const FLAG_BLOCKED_ALL = 1 << 7;
        /// Mailbox blocked
        const MBOX_BLOCKED = 1 << 8;
        /// Condition variable blocked
        const COND_BLOCKED = 1 << 9;
        /// Running
        const RUNNING = 1 << 10;
        /// Pending
        const PENDING = 1 << 11;

        /// Every waiting status
        const BLOCKED = Self::SLEEPING.bits()
            | Self::MUTEX_BLOCKED.bits()
            | Self::RECEIVE_BLOCKED.bits()
            | Self::SEND_BLOCKED.bits()
            | Self::REPLY_BLOCKED.bits()
            | Self::FLAG_BLOCKED_ANY.bits()
            | Self::FLAG_BLOCKED_ALL.bits()
            | Self::MBOX_BLOCKED.bits()
            | Self::COND_BLOCKED.bits();

        /// Statuses that count towards a core's load
        const SCHEDULABLE = Self::RUNNING.bits() | Self::PENDING.bits();
    }
}

impl ThreadStatus {
    /// All statuses, in discriminant order
    pub const ALL: [ThreadStatus; 12] = [
        ThreadStatus::Stopped,
        ThreadStatus::Sleeping,
        ThreadStatus::MutexBlocked,
        ThreadStatus::ReceiveBlocked,
        ThreadStatus::SendBlocked,
        ThreadStatus::ReplyBlocked,
        ThreadStatus::FlagBlockedAny,
        ThreadStatus::FlagBlockedAll,
        ThreadStatus::MboxBlocked,
        ThreadStatus::CondBlocked,
        ThreadStatus::Running,
        ThreadStatus::Pending,
    ];

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.get(value as usize).copied()
    }

    /// Convert to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Singleton set holding this status
    pub fn as_set(self) -> StatusSet {
        StatusSet::from_bits_truncate(1 << self.as_u8())
    }

    /// Running or pending
    pub fn is_schedulable(self) -> bool {
        StatusSet::SCHEDULABLE.contains(self.as_set())
    }

    /// Any of the waiting statuses
    pub fn is_blocked(self) -> bool {
        StatusSet::BLOCKED.contains(self.as_set())
    }

    /// Terminal status
    pub fn is_stopped(self) -> bool {
        self == ThreadStatus::Stopped
    }

    /// Statuses reachable from this one
    pub fn valid_transitions(self) -> StatusSet {
        match self {
            ThreadStatus::Stopped => StatusSet::empty(),
            ThreadStatus::Running => {
                StatusSet::PENDING | StatusSet::BLOCKED | StatusSet::STOPPED
            }
            ThreadStatus::Pending => {
                StatusSet::RUNNING | StatusSet::BLOCKED | StatusSet::STOPPED
            }
            _ => StatusSet::PENDING | StatusSet::STOPPED,
        }
    }

    /// Check a single transition against the table
    pub fn can_transition_to(self, target: ThreadStatus) -> bool {
        self.valid_transitions().contains(target.as_set())
    }
}

// Statuses only come from the scheduler's transitions.
static_assertions::assert_not_impl_any!(ThreadStatus: Default);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_discriminants() {
        for status in ThreadStatus::ALL {
            assert_eq!(ThreadStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(ThreadStatus::from_u8(12), None);
    }

    #[test]
    fn test_classification_partitions_statuses() {
        for status in ThreadStatus::ALL {
            let classes = [status.is_schedulable(), status.is_blocked(), status.is_stopped()];
            assert_eq!(classes.iter().filter(|&&c| c).count(), 1, "{:?}", status);
        }
        assert!(ThreadStatus::Sleeping.is_blocked());
        assert!(ThreadStatus::CondBlocked.is_blocked());
    }

    #[test]
    fn test_stopped_is_terminal() {
        for status in ThreadStatus::ALL {
            assert!(!ThreadStatus::Stopped.can_transition_to(status));
            if status != ThreadStatus::Stopped {
                assert!(status.can_transition_to(ThreadStatus::Stopped));
            }
        }
    }

    #[test]
    fn test_blocked_never_runs_directly() {
        for status in ThreadStatus::ALL.iter().filter(|s| s.is_blocked()) {
            assert!(!status.can_transition_to(ThreadStatus::Running));
            assert!(status.can_transition_to(ThreadStatus::Pending));
            assert!(!status.can_transition_to(ThreadStatus::MutexBlocked));
        }
    }

    #[test]
    fn test_running_pending_exchange() {
        assert!(ThreadStatus::Running.can_transition_to(ThreadStatus::Pending));
        assert!(ThreadStatus::Pending.can_transition_to(ThreadStatus::Running));
        assert!(ThreadStatus::Pending.can_transition_to(ThreadStatus::FlagBlockedAll));
        assert!(!ThreadStatus::Running.can_transition_to(ThreadStatus::Running));
    }
}
