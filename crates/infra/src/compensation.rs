//! Compensating-transaction bookkeeping for multi-row deductions.
//!
//! Each successful conditional decrement pushes its undo onto the stack.
//! On failure the stack is unwound last-in-first-out through the same pool;
//! on success it is committed (discarded).

use tracing::error;

use crate::error::FulfillmentError;
use crate::pool::StockPool;

/// Undo record: credit `quantity` back to row `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compensation<K> {
    pub key: K,
    pub quantity: u64,
}

#[derive(Debug)]
pub struct CompensationStack<K> {
    entries: Vec<Compensation<K>>,
}

impl<K> Default for CompensationStack<K> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<K> CompensationStack<K>
where
    K: Copy + core::fmt::Debug + core::fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: K, quantity: u64) {
        self.entries.push(Compensation { key, quantity });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Undo records in commitment order.
    pub fn entries(&self) -> &[Compensation<K>] {
        &self.entries
    }

    /// Keep all committed work. Returns how many takes were kept.
    pub fn commit(self) -> usize {
        self.entries.len()
    }

    /// Credit every recorded take back, newest first. Returns units restored.
    ///
    /// Every entry is attempted even after a failure; any failure yields
    /// `ConsistencyViolation` naming the rows that could not be restored.
    pub fn unwind<P>(self, pool: &P) -> Result<u64, FulfillmentError>
    where
        P: StockPool<Key = K> + ?Sized,
    {
        let mut restored = 0u64;
        let mut failed = Vec::new();

        for entry in self.entries.into_iter().rev() {
            match pool.give_back(entry.key, entry.quantity) {
                Ok(()) => restored += entry.quantity,
                Err(e) => {
                    error!(
                        pool = pool.kind(),
                        row = %entry.key,
                        quantity = entry.quantity,
                        error = %e,
                        "compensating credit failed"
                    );
                    failed.push(format!("{} {} x{}: {e}", pool.kind(), entry.key, entry.quantity));
                }
            }
        }

        if failed.is_empty() {
            Ok(restored)
        } else {
            Err(FulfillmentError::consistency(format!(
                "rollback could not restore {} take(s): {}",
                failed.len(),
                failed.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use larder_core::{BatchId, VariantId};

    use crate::pool::Candidate;
    use crate::store::StoreError;

    /// Pool that records credits and refuses a configured set of rows.
    #[derive(Default)]
    struct RecordingPool {
        credits: Mutex<Vec<(u32, u64)>>,
        missing: HashSet<u32>,
    }

    impl StockPool for RecordingPool {
        type Key = u32;

        fn kind(&self) -> &'static str {
            "recording"
        }

        fn candidates(&self, _variant_id: VariantId) -> Result<Vec<Candidate<u32>>, StoreError> {
            Ok(vec![Candidate {
                key: 0,
                lot_ref: BatchId::new(),
                quantity: 0,
            }])
        }

        fn try_take(&self, _key: u32, _amount: u64) -> Result<bool, StoreError> {
            Ok(true)
        }

        fn give_back(&self, key: u32, amount: u64) -> Result<(), StoreError> {
            if self.missing.contains(&key) {
                return Err(StoreError::NotFound(format!("row {key}")));
            }
            self.credits.lock().unwrap().push((key, amount));
            Ok(())
        }
    }

    #[test]
    fn unwind_restores_in_reverse_commit_order() {
        let pool = RecordingPool::default();
        let mut stack = CompensationStack::new();
        stack.push(1, 3);
        stack.push(2, 5);
        stack.push(3, 1);

        let restored = stack.unwind(&pool).unwrap();
        assert_eq!(restored, 9);
        assert_eq!(*pool.credits.lock().unwrap(), vec![(3, 1), (2, 5), (1, 3)]);
    }

    #[test]
    fn empty_stack_unwinds_to_nothing() {
        let pool = RecordingPool::default();
        let stack: CompensationStack<u32> = CompensationStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.unwind(&pool).unwrap(), 0);
        assert!(pool.credits.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_credit_is_a_consistency_violation_but_others_still_run() {
        let pool = RecordingPool {
            missing: HashSet::from([2]),
            ..RecordingPool::default()
        };
        let mut stack = CompensationStack::new();
        stack.push(1, 3);
        stack.push(2, 5);
        stack.push(3, 1);

        let err = stack.unwind(&pool).unwrap_err();
        assert!(err.is_fatal());
        match err {
            FulfillmentError::ConsistencyViolation(msg) if msg.contains("recording 2 x5") => {}
            other => panic!("Expected ConsistencyViolation naming row 2, got {other:?}"),
        }
        assert_eq!(*pool.credits.lock().unwrap(), vec![(3, 1), (1, 3)]);
    }

    #[test]
    fn commit_keeps_work() {
        let mut stack = CompensationStack::new();
        stack.push(7u32, 2);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.entries()[0], Compensation { key: 7, quantity: 2 });
        assert_eq!(stack.commit(), 1);
    }
}
