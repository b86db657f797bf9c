//! # Thread Records
//!
//! Per-thread scheduling state owned by a core's fair scheduler.

use crate::tree::RunKey;
use core::fmt;
use helix_execution::{ExecError, ExecResult, ThreadId, ThreadStatus};

/// Relative CPU entitlement of a thread
///
/// Stored as unsigned fixed point with [`Weight::FRAC_BITS`] fractional
/// bits, so sums over a core are exact.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Weight(u64);

impl Weight {
    /// Fractional bits of the fixed-point representation
    pub const FRAC_BITS: u32 = 16;
    /// Raw value of a weight of 1.0
    pub const ONE_RAW: u64 = 1 << Self::FRAC_BITS;
    /// Weight 1.0
    pub const ONE: Self = Self(Self::ONE_RAW);
    /// Largest accepted raw value; 255 of these still sum inside a `u64`
    pub const MAX_RAW: u64 = 1 << 47;

    /// Convert a caller-supplied weight
    pub fn from_f64(weight: f64) -> ExecResult<Self> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(ExecError::InvalidWeight);
        }
        let scaled = weight * Self::ONE_RAW as f64 + 0.5;
        if scaled > Self::MAX_RAW as f64 {
            return Err(ExecError::InvalidWeight);
        }
        Self::from_raw(scaled as u64)
    }

    /// Build from a raw fixed-point value
    pub fn from_raw(raw: u64) -> ExecResult<Self> {
        if raw == 0 || raw > Self::MAX_RAW {
            return Err(ExecError::InvalidWeight);
        }
        Ok(Self(raw))
    }

    /// Raw fixed-point value
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Approximate real value
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::ONE_RAW as f64
    }
}

impl fmt::Debug for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weight({})", self.as_f64())
    }
}

/// Virtual time a thread of `weight` accrues over `real_ns`.
///
/// `rate_scale` is `K` in weight fixed-point units: `rate = rate_scale / raw weight`.
pub fn virtual_delta(real_ns: u64, weight: Weight, rate_scale: u64) -> u64 {
    let scaled = real_ns as u128 * rate_scale as u128 / weight.raw() as u128;
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Scheduling state of one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    /// Stable identity
    pub(crate) id: ThreadId,
    /// Relative entitlement
    pub(crate) weight: Weight,
    /// Virtual runtime consumed so far
    pub(crate) virtual_start_time: u64,
    /// Virtual time at which the current slice runs out
    pub(crate) virtual_end_time: u64,
    /// Real length of the current slice
    pub(crate) time_slice_ns: u64,
    /// Current status
    pub(crate) status: ThreadStatus,
    /// Real time of the last selection
    pub(crate) selected_at_ns: u64,
}

impl ThreadRecord {
    /// New pending record starting at `virtual_start_time`
    pub fn new(id: ThreadId, weight: Weight, virtual_start_time: u64) -> Self {
        Self {
            id,
            weight,
            virtual_start_time,
            virtual_end_time: virtual_start_time,
            time_slice_ns: 0,
            status: ThreadStatus::Pending,
            selected_at_ns: 0,
        }
    }

    /// Ordering key in the runnable set
    pub fn key(&self) -> RunKey {
        RunKey::new(self.virtual_start_time, self.id)
    }

    /// Key as if the running thread were charged `elapsed_ns` right now
    pub fn charged_key(&self, elapsed_ns: u64, rate_scale: u64) -> RunKey {
        let delta = virtual_delta(elapsed_ns, self.weight, rate_scale);
        RunKey::new(self.virtual_start_time.saturating_add(delta), self.id)
    }

    /// Start a slice of `time_slice_ns` at real time `now_ns`
    pub(crate) fn select(&mut self, time_slice_ns: u64, now_ns: u64, rate_scale: u64) {
        self.status = ThreadStatus::Running;
        self.time_slice_ns = time_slice_ns;
        self.selected_at_ns = now_ns;
        self.virtual_end_time = self
            .virtual_start_time
            .saturating_add(virtual_delta(time_slice_ns, self.weight, rate_scale));
    }

    /// Charge the whole slice
    pub(crate) fn exhaust(&mut self) {
        self.virtual_start_time = self.virtual_start_time.max(self.virtual_end_time);
    }

    /// Charge the virtual equivalent of `real_ns` actually consumed
    pub(crate) fn charge(&mut self, real_ns: u64, rate_scale: u64) {
        let delta = virtual_delta(real_ns, self.weight, rate_scale);
        self.virtual_start_time = self.virtual_start_time.saturating_add(delta);
    }

    /// Real time since selection
    pub(crate) fn elapsed(&self, now_ns: u64) -> u64 {
        now_ns.saturating_sub(self.selected_at_ns)
    }

    /// Shift virtual timestamps down by `base`, clamping at zero
    pub(crate) fn rebase(&mut self, base: u64) {
        self.virtual_start_time = self.virtual_start_time.saturating_sub(base);
        self.virtual_end_time = self.virtual_end_time.saturating_sub(base);
    }
}

/// Read-only view of a thread record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreadSnapshot {
    /// Thread ID
    pub id: ThreadId,
    /// Weight as supplied
    pub weight: f64,
    /// Virtual runtime consumed, relative to the core's virtual epoch
    pub virtual_start_time: u64,
    /// Projected end of the current slice
    pub virtual_end_time: u64,
    /// Real length of the last granted slice
    pub time_slice_ns: u64,
    /// Current status
    pub status: ThreadStatus,
    /// Virtual time removed from every record by rebasing so far
    pub virtual_epoch: u128,
}

impl ThreadSnapshot {
    pub(crate) fn capture(record: &ThreadRecord, virtual_epoch: u128) -> Self {
        Self {
            id: record.id,
            weight: record.weight.as_f64(),
            virtual_start_time: record.virtual_start_time,
            virtual_end_time: record.virtual_end_time,
            time_slice_ns: record.time_slice_ns,
            status: record.status,
            virtual_epoch,
        }
    }

    /// Virtual runtime on the core's never-rebased scale
    pub fn absolute_virtual_time(&self) -> u128 {
        self.virtual_epoch + self.virtual_start_time as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_conversion() {
        assert_eq!(Weight::from_f64(1.0).unwrap(), Weight::ONE);
        assert_eq!(Weight::from_f64(2.0).unwrap().raw(), 2 * Weight::ONE_RAW);
        assert_eq!(Weight::from_f64(0.5).unwrap().as_f64(), 0.5);
        assert_eq!(Weight::from_f64(0.0), Err(ExecError::InvalidWeight));
        assert_eq!(Weight::from_f64(-3.0), Err(ExecError::InvalidWeight));
        assert_eq!(Weight::from_f64(f64::NAN), Err(ExecError::InvalidWeight));
        assert_eq!(Weight::from_f64(f64::INFINITY), Err(ExecError::InvalidWeight));
        assert_eq!(Weight::from_f64(1e-9), Err(ExecError::InvalidWeight));
        assert_eq!(Weight::from_f64(1e12), Err(ExecError::InvalidWeight));
    }

    #[test]
    fn test_heavier_threads_accrue_slower() {
        let one = Weight::ONE;
        let two = Weight::from_f64(2.0).unwrap();
        assert_eq!(virtual_delta(5_000_000, one, Weight::ONE_RAW), 5_000_000);
        assert_eq!(virtual_delta(5_000_000, two, Weight::ONE_RAW), 2_500_000);
        assert_eq!(virtual_delta(u64::MAX, Weight::from_raw(1).unwrap(), u64::MAX), u64::MAX);
    }

    #[test]
    fn test_select_then_exhaust() {
        let mut record = ThreadRecord::new(ThreadId::from_raw(1), Weight::ONE, 500);
        record.select(5_000_000, 42, Weight::ONE_RAW);
        assert_eq!(record.status, ThreadStatus::Running);
        assert_eq!(record.virtual_end_time, 5_000_500);
        assert_eq!(record.elapsed(1_042), 1_000);

        record.exhaust();
        assert_eq!(record.virtual_start_time, 5_000_500);
    }

    #[test]
    fn test_partial_charge() {
        let mut record = ThreadRecord::new(ThreadId::from_raw(1), Weight::from_f64(4.0).unwrap(), 0);
        record.select(8_000, 0, Weight::ONE_RAW);
        record.charge(2_000, Weight::ONE_RAW);
        assert_eq!(record.virtual_start_time, 500);
        assert_eq!(record.charged_key(400, Weight::ONE_RAW), RunKey::new(600, ThreadId::from_raw(1)));
    }
}
