//! Worker pool tasks: recursive partition sort and two-way merge.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log;
use rayon::prelude::*;

use crate::future::{FutureResult, MergingResult};
use crate::merger::MergeIter;
use crate::run::Run;
use crate::sort::SortError;
use crate::store::RunStore;

/// Handle to the worker pool shared by all tasks of a single sort.
/// Carries a cancellation flag tripped by the first failing task.
#[derive(Clone)]
pub(crate) struct Executor {
    pool: Arc<rayon::ThreadPool>,
    cancelled: Arc<AtomicBool>,
}

impl Executor {
    pub(crate) fn new(pool: Arc<rayon::ThreadPool>) -> Self {
        Executor {
            pool,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(task);
    }

    /// Makes all tasks started from now on bail out.
    pub(crate) fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            log::warn!("cancelling outstanding tasks");
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Returns the number of leaves the sort task produces for a run of `len` integers,
/// halving the run until every part holds at most `min_split_len` integers.
/// Uneven halves may stop at different depths, so the count is not necessarily a power of two.
pub(crate) fn leaf_count(len: usize, min_split_len: usize) -> usize {
    assert!(min_split_len > 0, "minimal split length must be positive");

    // every level holds at most two distinct part lengths
    let mut parts = BTreeMap::from([(len, 1)]);
    let mut leaves = 0;
    while let Some((part_len, count)) = parts.pop_last() {
        if part_len <= min_split_len {
            leaves += count;
        } else {
            *parts.entry(part_len / 2).or_insert(0) += count;
            *parts.entry(part_len - part_len / 2).or_insert(0) += count;
        }
    }

    leaves
}

/// Schedules a recursive sort of the run reporting sorted leaves to the sink.
pub(crate) fn submit_sort(executor: &Executor, source: Run, min_split_len: usize, sink: FutureResult) {
    let task_executor = executor.clone();
    executor.spawn(move || sort(task_executor, source, min_split_len, sink));
}

fn sort(executor: Executor, source: Run, min_split_len: usize, sink: FutureResult) {
    if executor.is_cancelled() {
        source.close();
        sink.fail(SortError::Aborted);
        return;
    }

    if source.len() <= min_split_len {
        let mut data = source.materialize();
        source.close();
        data.par_sort_unstable();
        log::trace!("sorted leaf of {} integers", data.len());
        sink.add_part(Run::from_vec(data));
    } else {
        let (first, second) = source.split();
        source.close();
        submit_sort(&executor, first, min_split_len, sink.clone());
        submit_sort(&executor, second, min_split_len, sink);
    }
}

/// Pair of runs scheduled for a merge.
pub(crate) struct MergeJob {
    /// Generation of the merge result.
    pub(crate) generation: u32,
    pub(crate) first: Run,
    pub(crate) second: Run,
    /// Placement of the merge result.
    pub(crate) store: RunStore,
}

/// Schedules a merge of the pair reporting the result to the sink.
pub(crate) fn submit_merge(executor: &Executor, job: MergeJob, sink: MergingResult) {
    let task_executor = executor.clone();
    executor.spawn(move || merge(task_executor, job, sink));
}

fn merge(executor: Executor, job: MergeJob, sink: MergingResult) {
    let MergeJob {
        generation,
        first,
        second,
        store,
    } = job;

    if executor.is_cancelled() {
        first.close();
        second.close();
        sink.fail(SortError::Aborted);
        return;
    }

    let size = first.size() + second.size();
    let merged = store.hold_iter(MergeIter::new(first.iter(), second.iter()), size);
    first.close();
    second.close();

    match merged {
        Ok(result) => {
            log::debug!("merged generation {} run ({} bytes)", generation, size);
            sink.add_merge_result(generation, result);
        }
        Err(err) => {
            log::error!("generation {} merge failed: {}", generation, err);
            sink.fail(SortError::IO(err));
            executor.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::Arc;

    use rand::Rng;
    use rstest::*;

    use super::{leaf_count, submit_sort, Executor};
    use crate::future::FutureResult;
    use crate::run::Run;
    use crate::store::RunStore;

    pub(crate) fn executor(threads_number: usize) -> Executor {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .build()
            .unwrap();
        Executor::new(Arc::new(pool))
    }

    #[rstest]
    #[case(0, 1, 1)]
    #[case(1, 1, 1)]
    #[case(2, 1, 2)]
    #[case(5, 2, 3)]
    #[case(8, 2, 4)]
    #[case(1024, 256, 4)]
    #[case(1025, 256, 5)]
    #[case(1000, 1, 1000)]
    fn test_leaf_count(#[case] len: usize, #[case] min_split_len: usize, #[case] expected: usize) {
        assert_eq!(leaf_count(len, min_split_len), expected);
    }

    #[rstest]
    #[case(1, 1, 1)]
    #[case(1, 100, 7)]
    #[case(4, 100, 7)]
    #[case(4, 1000, 64)]
    #[case(4, 1001, 10)]
    #[case(2, 37, 1)]
    fn test_sort_task(#[case] threads_number: usize, #[case] len: usize, #[case] min_split_len: usize) {
        let executor = executor(threads_number);
        let mut rng = rand::thread_rng();
        let data = Vec::from_iter((0..len).map(|_| rng.gen::<i32>()));

        let parts = leaf_count(len, min_split_len);
        let sink = FutureResult::new(parts, RunStore::Heap, RunStore::Heap, executor.clone());
        submit_sort(&executor, Run::from_vec(data.clone()), min_split_len, sink.clone());

        let mut expected = data;
        expected.sort_unstable();
        assert_eq!(sink.get().unwrap().materialize(), expected);
    }

    #[test]
    fn test_cancelled_sort_fails_sink() {
        let executor = executor(2);
        executor.cancel();

        let sink = FutureResult::new(4, RunStore::Heap, RunStore::Heap, executor.clone());
        submit_sort(&executor, Run::from_vec(vec![4, 3, 2, 1]), 1, sink.clone());

        assert!(sink.get().is_err());
    }
}
