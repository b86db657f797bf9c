//! # Ordered Runnable Set
//!
//! AVL tree holding the pending threads of one core, ordered by
//! `(virtual start time, thread id)`.
//!
//! Nodes live in an arena and link by index; freed slots are reused, so a
//! set created with enough capacity never allocates while scheduling.

use alloc::vec::Vec;
use core::cmp::Ordering;
use helix_execution::{ExecError, ExecResult, ThreadId};

/// Ordering key of a pending thread
///
/// Field order matters: the derived ordering compares virtual time first
/// and breaks ties on the thread ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunKey {
    /// Virtual start time
    pub vtime: u64,
    /// Thread ID
    pub id: ThreadId,
}

impl RunKey {
    /// Create a key
    pub const fn new(vtime: u64, id: ThreadId) -> Self {
        Self { vtime, id }
    }
}

/// Structural problems found by [`RunnableSet::verify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeViolation {
    /// In-order traversal is not strictly increasing
    OutOfOrder(RunKey),
    /// A node's subtrees differ in height by more than one
    Unbalanced(RunKey),
    /// A cached height is stale
    HeightMismatch(RunKey),
    /// Reachable nodes disagree with the length counter
    CountMismatch {
        /// Counter value
        expected: usize,
        /// Nodes reachable from the root
        found: usize,
    },
}

#[derive(Debug, Clone)]
struct Node {
    key: RunKey,
    left: Option<usize>,
    right: Option<usize>,
    height: u8,
}

/// Balanced set of pending threads
#[derive(Debug, Clone, Default)]
pub struct RunnableSet {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: Option<usize>,
    len: usize,
}

impl RunnableSet {
    /// Create an empty set
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    /// Create an empty set with room for `capacity` threads
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            root: None,
            len: 0,
        }
    }

    /// Number of pending threads
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Add a key; a key already present is a consistency violation
    pub fn insert(&mut self, key: RunKey) -> ExecResult<()> {
        let root = self.insert_at(self.root, key)?;
        self.root = Some(root);
        self.len += 1;
        Ok(())
    }

    /// Remove a key
    pub fn remove(&mut self, key: RunKey) -> ExecResult<()> {
        self.root = self.remove_at(self.root, key)?;
        self.len -= 1;
        Ok(())
    }

    /// Smallest key, without removing it
    pub fn min(&self) -> Option<RunKey> {
        let mut at = self.root?;
        while let Some(left) = self.nodes[at].left {
            at = left;
        }
        Some(self.nodes[at].key)
    }

    /// Check membership
    pub fn contains(&self, key: RunKey) -> bool {
        let mut cursor = self.root;
        while let Some(at) = cursor {
            let node = &self.nodes[at];
            cursor = match key.cmp(&node.key) {
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
                Ordering::Equal => return true,
            };
        }
        false
    }

    /// Keys in ascending order
    pub fn iter(&self) -> Iter<'_> {
        let mut iter = Iter {
            set: self,
            stack: Vec::new(),
        };
        iter.push_left(self.root);
        iter
    }

    /// Height of the tree (0 when empty)
    pub fn height(&self) -> usize {
        self.height_of(self.root) as usize
    }

    /// Subtract `delta` from every key's virtual time.
    ///
    /// Order is preserved because every key moves by the same amount; the
    /// caller guarantees no key is below `delta`.
    pub fn shift_keys(&mut self, delta: u64) {
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(at) = stack.pop() {
            let node = &mut self.nodes[at];
            node.key.vtime -= delta;
            stack.extend(node.left);
            stack.extend(node.right);
        }
    }

    /// Full structural check: order, balance, heights and length
    pub fn verify(&self) -> Result<(), TreeViolation> {
        let (_, found) = self.verify_at(self.root, None, None)?;
        if found != self.len {
            return Err(TreeViolation::CountMismatch {
                expected: self.len,
                found,
            });
        }
        Ok(())
    }

    // =========================================================================
    // AVL mechanics
    // =========================================================================

    fn alloc(&mut self, key: RunKey) -> usize {
        let node = Node {
            key,
            left: None,
            right: None,
            height: 1,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn insert_at(&mut self, at: Option<usize>, key: RunKey) -> ExecResult<usize> {
        let Some(at) = at else {
            return Ok(self.alloc(key));
        };
        match key.cmp(&self.nodes[at].key) {
            Ordering::Less => {
                let left = self.insert_at(self.nodes[at].left, key)?;
                self.nodes[at].left = Some(left);
            }
            Ordering::Greater => {
                let right = self.insert_at(self.nodes[at].right, key)?;
                self.nodes[at].right = Some(right);
            }
            Ordering::Equal => return Err(ExecError::AlreadyExists),
        }
        Ok(self.rebalance(at))
    }

    fn remove_at(&mut self, at: Option<usize>, key: RunKey) -> ExecResult<Option<usize>> {
        let at = at.ok_or(ExecError::ThreadNotFound)?;
        match key.cmp(&self.nodes[at].key) {
            Ordering::Less => {
                let left = self.remove_at(self.nodes[at].left, key)?;
                self.nodes[at].left = left;
            }
            Ordering::Greater => {
                let right = self.remove_at(self.nodes[at].right, key)?;
                self.nodes[at].right = right;
            }
            Ordering::Equal => {
                let (left, right) = (self.nodes[at].left, self.nodes[at].right);
                self.free.push(at);
                return Ok(match (left, right) {
                    (None, only) | (only, None) => only,
                    (Some(left), Some(right)) => {
                        let (rest, successor) = self.detach_min(right);
                        self.nodes[successor].left = Some(left);
                        self.nodes[successor].right = rest;
                        Some(self.rebalance(successor))
                    }
                });
            }
        }
        Ok(Some(self.rebalance(at)))
    }

    /// Unlink the leftmost node of a subtree: (new subtree root, detached node)
    fn detach_min(&mut self, at: usize) -> (Option<usize>, usize) {
        match self.nodes[at].left {
            Some(left) => {
                let (rest, min) = self.detach_min(left);
                self.nodes[at].left = rest;
                (Some(self.rebalance(at)), min)
            }
            None => (self.nodes[at].right, at),
        }
    }

    fn height_of(&self, at: Option<usize>) -> u8 {
        at.map_or(0, |i| self.nodes[i].height)
    }

    fn balance_factor(&self, at: usize) -> i16 {
        let node = &self.nodes[at];
        self.height_of(node.left) as i16 - self.height_of(node.right) as i16
    }

    fn update_height(&mut self, at: usize) {
        let node = &self.nodes[at];
        let height = 1 + self.height_of(node.left).max(self.height_of(node.right));
        self.nodes[at].height = height;
    }

    fn rotate_right(&mut self, at: usize) -> usize {
        let Some(pivot) = self.nodes[at].left else {
            return at;
        };
        self.nodes[at].left = self.nodes[pivot].right;
        self.nodes[pivot].right = Some(at);
        self.update_height(at);
        self.update_height(pivot);
        pivot
    }

    fn rotate_left(&mut self, at: usize) -> usize {
        let Some(pivot) = self.nodes[at].right else {
            return at;
        };
        self.nodes[at].right = self.nodes[pivot].left;
        self.nodes[pivot].left = Some(at);
        self.update_height(at);
        self.update_height(pivot);
        pivot
    }

    fn rebalance(&mut self, at: usize) -> usize {
        self.update_height(at);
        let factor = self.balance_factor(at);
        if factor > 1 {
            if let Some(left) = self.nodes[at].left {
                if self.balance_factor(left) < 0 {
                    self.nodes[at].left = Some(self.rotate_left(left));
                }
            }
            return self.rotate_right(at);
        }
        if factor < -1 {
            if let Some(right) = self.nodes[at].right {
                if self.balance_factor(right) > 0 {
                    self.nodes[at].right = Some(self.rotate_right(right));
                }
            }
            return self.rotate_left(at);
        }
        at
    }

    /// Returns (height, node count) of a subtree whose keys lie in (lo, hi)
    fn verify_at(
        &self,
        at: Option<usize>,
        lo: Option<RunKey>,
        hi: Option<RunKey>,
    ) -> Result<(u8, usize), TreeViolation> {
        let Some(at) = at else {
            return Ok((0, 0));
        };
        let node = &self.nodes[at];
        if lo.is_some_and(|lo| node.key <= lo) || hi.is_some_and(|hi| node.key >= hi) {
            return Err(TreeViolation::OutOfOrder(node.key));
        }
        let (left_height, left_count) = self.verify_at(node.left, lo, Some(node.key))?;
        let (right_height, right_count) = self.verify_at(node.right, Some(node.key), hi)?;
        if left_height.abs_diff(right_height) > 1 {
            return Err(TreeViolation::Unbalanced(node.key));
        }
        let height = 1 + left_height.max(right_height);
        if height != node.height {
            return Err(TreeViolation::HeightMismatch(node.key));
        }
        Ok((height, left_count + right_count + 1))
    }
}

/// Ascending iterator over a [`RunnableSet`]
#[derive(Debug)]
pub struct Iter<'a> {
    set: &'a RunnableSet,
    stack: Vec<usize>,
}

impl Iter<'_> {
    fn push_left(&mut self, mut at: Option<usize>) {
        while let Some(i) = at {
            self.stack.push(i);
            at = self.set.nodes[i].left;
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = RunKey;

    fn next(&mut self) -> Option<RunKey> {
        let at = self.stack.pop()?;
        let set = self.set;
        let node = &set.nodes[at];
        self.push_left(node.right);
        Some(node.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;
    use alloc::vec::Vec;

    fn key(vtime: u64, id: u64) -> RunKey {
        RunKey::new(vtime, ThreadId::from_raw(id))
    }

    /// Loose AVL height bound, about 1.44 * log2(n + 2)
    fn avl_bound(n: usize) -> usize {
        let log2 = (usize::BITS - (n + 2).leading_zeros()) as usize;
        log2 * 3 / 2 + 1
    }

    #[test]
    fn test_empty_set() {
        let set = RunnableSet::new();
        assert!(set.is_empty());
        assert_eq!(set.min(), None);
        assert_eq!(set.height(), 0);
        assert!(set.verify().is_ok());
    }

    #[test]
    fn test_min_breaks_ties_on_id() {
        let mut set = RunnableSet::new();
        set.insert(key(10, 3)).unwrap();
        set.insert(key(10, 1)).unwrap();
        set.insert(key(12, 0)).unwrap();
        assert_eq!(set.min(), Some(key(10, 1)));
        assert_eq!(set.len(), 3);

        set.remove(key(10, 1)).unwrap();
        assert_eq!(set.min(), Some(key(10, 3)));
    }

    #[test]
    fn test_duplicate_and_missing_keys() {
        let mut set = RunnableSet::new();
        set.insert(key(5, 5)).unwrap();
        assert_eq!(set.insert(key(5, 5)), Err(ExecError::AlreadyExists));
        assert_eq!(set.remove(key(5, 6)), Err(ExecError::ThreadNotFound));
        assert_eq!(set.len(), 1);
        assert!(set.verify().is_ok());

        set.remove(key(5, 5)).unwrap();
        assert_eq!(set.remove(key(5, 5)), Err(ExecError::ThreadNotFound));
        assert!(set.is_empty());
    }

    #[test]
    fn test_ascending_insertion_stays_balanced() {
        let mut set = RunnableSet::new();
        for i in 0..1024 {
            set.insert(key(i * 10, i)).unwrap();
        }
        assert!(set.verify().is_ok());
        assert!(set.height() <= avl_bound(1024));
        assert_eq!(set.min(), Some(key(0, 0)));

        for i in (0..1024).rev().step_by(2) {
            set.remove(key(i * 10, i)).unwrap();
        }
        assert!(set.verify().is_ok());
        assert_eq!(set.len(), 512);
        assert!(set.height() <= avl_bound(512));
    }

    #[test]
    fn test_matches_ordered_reference() {
        let mut set = RunnableSet::new();
        let mut reference = BTreeSet::new();
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..4000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let k = key(state % 64, (state >> 32) % 16);
            if state & 1 == 0 {
                assert_eq!(set.insert(k).is_ok(), reference.insert(k));
            } else {
                assert_eq!(set.remove(k).is_ok(), reference.remove(&k));
            }
            assert_eq!(set.min(), reference.first().copied());
        }
        assert!(set.verify().is_ok());
        let ours: Vec<RunKey> = set.iter().collect();
        let expected: Vec<RunKey> = reference.iter().copied().collect();
        assert_eq!(ours, expected);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut set = RunnableSet::with_capacity(4);
        for round in 0..100 {
            for id in 0..4 {
                set.insert(key(round, id)).unwrap();
            }
            for id in 0..4 {
                set.remove(key(round, id)).unwrap();
            }
        }
        assert!(set.nodes.len() <= 4);
    }

    #[test]
    fn test_shift_keys_preserves_order() {
        let mut set = RunnableSet::new();
        for (vtime, id) in [(100, 1), (150, 2), (100, 3), (400, 4)] {
            set.insert(key(vtime, id)).unwrap();
        }
        set.shift_keys(100);
        let keys: Vec<RunKey> = set.iter().collect();
        assert_eq!(keys, [key(0, 1), key(0, 3), key(50, 2), key(300, 4)]);
        assert!(set.contains(key(300, 4)));
        assert!(!set.contains(key(400, 4)));
        assert!(set.verify().is_ok());
    }

    #[test]
    fn test_verify_reports_corruption() {
        let build = || {
            let mut set = RunnableSet::new();
            for i in 0..7 {
                set.insert(key(i, i)).unwrap();
            }
            assert!(set.verify().is_ok());
            set
        };

        let mut set = build();
        let root = set.root.unwrap();
        let left = set.nodes[root].left.unwrap();
        set.nodes[left].key = key(100, 100);
        assert_eq!(set.verify(), Err(TreeViolation::OutOfOrder(key(100, 100))));

        let mut set = build();
        set.nodes[root].height += 1;
        assert_eq!(set.verify(), Err(TreeViolation::HeightMismatch(set.nodes[root].key)));

        let mut set = build();
        set.len += 1;
        assert_eq!(
            set.verify(),
            Err(TreeViolation::CountMismatch { expected: 8, found: 7 })
        );

        let mut set = build();
        set.nodes[root].right = None;
        assert_eq!(set.verify(), Err(TreeViolation::Unbalanced(set.nodes[root].key)));
    }
}
