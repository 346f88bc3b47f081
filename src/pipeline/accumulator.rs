//! Thread-safe collection of per-chunk outcomes.

use crate::pipeline::error::ChunkFailure;
use crate::pipeline::types::ChunkOutput;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug, Default)]
struct Outcomes {
    successes: BTreeMap<usize, ChunkOutput>,
    failures: BTreeMap<usize, ChunkFailure>,
}

impl Outcomes {
    fn contains(&self, index: usize) -> bool {
        self.successes.contains_key(&index) || self.failures.contains_key(&index)
    }
}

/// Collects outcomes from concurrent workers, keyed by chunk index.
///
/// Each index is recorded at most once; a second record for the same index
/// is rejected.
#[derive(Debug)]
pub struct ResultAccumulator {
    total: usize,
    outcomes: Mutex<Outcomes>,
    completed: AtomicUsize,
}

impl ResultAccumulator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            outcomes: Mutex::new(Outcomes::default()),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Returns `false` if `index` already has an outcome.
    pub fn record_success(&self, index: usize, output: ChunkOutput) -> bool {
        let mut outcomes = self.lock();
        if outcomes.contains(index) {
            warn!("Chunk {} already recorded, ignoring success", index);
            return false;
        }
        outcomes.successes.insert(index, output);
        true
    }

    /// Returns `false` if the failed chunk already has an outcome.
    pub fn record_failure(&self, failure: ChunkFailure) -> bool {
        let mut outcomes = self.lock();
        if outcomes.contains(failure.index) {
            warn!("Chunk {} already recorded, ignoring failure", failure.index);
            return false;
        }
        outcomes.failures.insert(failure.index, failure);
        true
    }

    pub fn increment_and_get_completed(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Successful outputs in index order.
    pub fn successes(&self) -> Vec<(usize, ChunkOutput)> {
        self.lock()
            .successes
            .iter()
            .map(|(index, output)| (*index, output.clone()))
            .collect()
    }

    /// Failures in index order.
    pub fn failures(&self) -> Vec<ChunkFailure> {
        self.lock().failures.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Outcomes> {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ChunkError;
    use std::sync::Arc;

    fn failure(index: usize) -> ChunkFailure {
        ChunkFailure {
            index,
            error: ChunkError::Cancelled,
            attempts: 0,
        }
    }

    #[test]
    fn outcomes_are_sorted_by_index() {
        let acc = ResultAccumulator::new(4);
        acc.record_success(3, ChunkOutput::Text("d".into()));
        acc.record_failure(failure(2));
        acc.record_success(0, ChunkOutput::Text("a".into()));
        acc.record_failure(failure(1));

        let indices: Vec<usize> = acc.successes().iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![0, 3]);
        let failed: Vec<usize> = acc.failures().iter().map(|f| f.index).collect();
        assert_eq!(failed, vec![1, 2]);
        assert_eq!(acc.total(), 4);
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let acc = ResultAccumulator::new(1);
        assert!(acc.record_success(0, ChunkOutput::Text("first".into())));
        assert!(!acc.record_success(0, ChunkOutput::Text("second".into())));
        assert!(!acc.record_failure(failure(0)));

        assert_eq!(acc.successes(), vec![(0, ChunkOutput::Text("first".into()))]);
        assert!(acc.failures().is_empty());
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let acc = Arc::new(ResultAccumulator::new(800));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let acc = acc.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let index = t * 100 + i;
                        if index % 2 == 0 {
                            acc.record_success(index, ChunkOutput::Audio(vec![1]));
                        } else {
                            acc.record_failure(failure(index));
                        }
                        acc.increment_and_get_completed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(acc.completed(), 800);
        assert_eq!(acc.successes().len(), 400);
        assert_eq!(acc.failures().len(), 400);
    }
}
