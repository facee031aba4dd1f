use crate::state::ItemResult;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised when merging into a [`ProcessingState`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Index {index} is outside the item range 0..{total}")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("No result recorded for index {0}")]
    Missing(usize),
}

/// Result table for one run
///
/// Maps item index to its terminal result. Entries are only ever added:
/// a second merge for the same index is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingState<T> {
    total: usize,
    results: BTreeMap<usize, ItemResult<T>>,
}

impl<T> ProcessingState<T> {
    /// Creates an empty table for `total` items
    pub fn new(total: usize) -> Self {
        Self {
            total,
            results: BTreeMap::new(),
        }
    }

    /// Rebuilds a table from persisted results
    pub fn from_results(
        total: usize,
        results: BTreeMap<usize, ItemResult<T>>,
    ) -> Result<Self, StateError> {
        if let Some((&index, _)) = results.iter().next_back() {
            if index >= total {
                return Err(StateError::IndexOutOfRange { index, total });
            }
        }
        Ok(Self { total, results })
    }

    /// Number of items in the source collection
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of items with a terminal result
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.results.contains_key(&index)
    }

    pub fn get(&self, index: usize) -> Option<&ItemResult<T>> {
        self.results.get(&index)
    }

    /// Records the result for `index`
    ///
    /// Returns `Ok(true)` when the entry was added and `Ok(false)` when the
    /// index already had a result.
    pub fn merge(&mut self, index: usize, result: ItemResult<T>) -> Result<bool, StateError> {
        if index >= self.total {
            return Err(StateError::IndexOutOfRange {
                index,
                total: self.total,
            });
        }

        if self.results.contains_key(&index) {
            return Ok(false);
        }

        self.results.insert(index, result);
        Ok(true)
    }

    /// Indices that already have a result, ascending
    pub fn completed_indices(&self) -> Vec<usize> {
        self.results.keys().copied().collect()
    }

    /// Indices still waiting for a result, ascending
    pub fn remaining(&self) -> Vec<usize> {
        (0..self.total)
            .filter(|index| !self.results.contains_key(index))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.total
    }

    pub fn successes(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.results.len() - self.successes()
    }

    /// Iterates results in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ItemResult<T>)> {
        self.results.iter().map(|(index, result)| (*index, result))
    }

    /// Consumes the table into one result per index, `0..total` in order
    ///
    /// Fails on the first index without a result.
    pub fn into_ordered(self) -> Result<Vec<ItemResult<T>>, StateError> {
        let mut ordered = Vec::with_capacity(self.total);
        let mut results = self.results;
        for index in 0..self.total {
            let result = results.remove(&index).ok_or(StateError::Missing(index))?;
            ordered.push(result);
        }
        Ok(ordered)
    }
}
