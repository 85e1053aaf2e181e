use std::collections::BTreeMap;

use crate::foundation::core::IndexRange;
use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Completion state of one time index.
#[derive(Debug)]
pub enum Slot<T> {
    Ready(T),
    /// The index will never produce an item; delivery moves past it.
    Skipped,
}

/// Holds out-of-order completions until every earlier index has arrived.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next: usize,
    end: usize,
    pending: BTreeMap<usize, Slot<T>>,
}

impl<T> ReorderBuffer<T> {
    pub fn new(range: IndexRange) -> Self {
        Self {
            next: range.start,
            end: range.end,
            pending: BTreeMap::new(),
        }
    }

    /// Record the completion of `index`. Each index may complete once.
    pub fn insert(&mut self, index: usize, slot: Slot<T>) -> TimelapseResult<()> {
        if index < self.next || index >= self.end || self.pending.contains_key(&index) {
            return Err(TimelapseError::Other(anyhow::anyhow!(
                "time {index} completed twice or lies outside {}..{}",
                self.next,
                self.end
            )));
        }
        self.pending.insert(index, slot);
        Ok(())
    }

    /// Next deliverable item, if the lowest outstanding index has completed.
    pub fn pop_ready(&mut self) -> Option<(usize, T)> {
        while let Some(slot) = self.pending.remove(&self.next) {
            let index = self.next;
            self.next += 1;
            if let Slot::Ready(item) = slot {
                return Some((index, item));
            }
        }
        None
    }

    /// Lowest index not yet delivered or skipped.
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Completions waiting on an earlier index.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// `true` once every index of the range has been delivered or skipped.
    pub fn is_complete(&self) -> bool {
        self.next >= self.end
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/reorder.rs"]
mod tests;
