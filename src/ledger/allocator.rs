use serde::{Deserialize, Serialize};

use crate::ledger::error::{LedgerError, LedgerResult};

/// Single id counter shared by projects and nfts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }

    /// Hands out the next id. Fails closed instead of wrapping around.
    pub fn next_id(&mut self) -> LedgerResult<u64> {
        let id = self.next;
        self.next = id.checked_add(1).ok_or(LedgerError::AllocatorExhausted)?;
        Ok(id)
    }

    /// The id the next call to `next_id` would return.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn starts_at_zero() {
        let mut ids = IdAllocator::default();
        assert_eq!(ids.next_id().unwrap(), 0);
        assert_eq!(ids.next_id().unwrap(), 1);
        assert_eq!(ids.peek(), 2);
    }

    #[test]
    fn overflow_is_reported_and_counter_untouched() {
        let mut ids = IdAllocator::starting_at(u64::MAX - 1);

        assert_eq!(ids.next_id().unwrap(), u64::MAX - 1);
        assert_eq!(ids.next_id(), Err(LedgerError::AllocatorExhausted));
        assert_eq!(ids.next_id(), Err(LedgerError::AllocatorExhausted));
        assert_eq!(ids.peek(), u64::MAX);
    }

    proptest! {
        #[test]
        fn ids_strictly_increase(start in 0u64..u64::MAX - 1000, n in 1usize..500) {
            let mut ids = IdAllocator::starting_at(start);
            let mut seen = HashSet::new();
            let mut last = None;
            for _ in 0..n {
                let id = ids.next_id().unwrap();
                prop_assert!(seen.insert(id));
                if let Some(prev) = last {
                    prop_assert!(id > prev);
                }
                last = Some(id);
            }
        }
    }
}
