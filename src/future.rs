//! Completion sinks collecting sorted parts into a single run.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use log;
use parking_lot::{Condvar, Mutex};

use crate::run::Run;
use crate::sort::SortError;
use crate::store::RunStore;
use crate::task::{self, Executor, MergeJob};

/// Receives sorted parts asynchronously and produces exactly one run once all expected parts
/// have arrived and have been merged together.
#[derive(Clone)]
pub(crate) enum FutureResult {
    Single(SingleResult),
    Merging(MergingResult),
}

impl FutureResult {
    /// Creates a sink expecting `parts` parts. Intermediate merge results are placed by `intermediate`,
    /// the final run always lands in `destination`.
    pub(crate) fn new(parts: usize, intermediate: RunStore, destination: RunStore, executor: Executor) -> Self {
        assert!(parts > 0, "sink must expect at least one part");

        if parts == 1 {
            FutureResult::Single(SingleResult::new(destination, executor))
        } else {
            FutureResult::Merging(MergingResult::new(parts, intermediate, destination, executor))
        }
    }

    pub(crate) fn add_part(&self, part: Run) {
        match self {
            FutureResult::Single(result) => result.add_part(part),
            FutureResult::Merging(result) => result.add_part(part),
        }
    }

    /// Reports a failure of a task contributing to this sink. The first reported error wins.
    pub(crate) fn fail(&self, err: SortError) {
        match self {
            FutureResult::Single(result) => result.fail(err),
            FutureResult::Merging(result) => result.fail(err),
        }
    }

    /// Blocks until the final run is ready or a contributing task failed.
    /// Must not be called from a worker pool task.
    pub(crate) fn get(&self) -> Result<Run, SortError> {
        match self {
            FutureResult::Single(result) => result.get(),
            FutureResult::Merging(result) => result.get(),
        }
    }
}

/// Sink expecting a single part. The part is moved to the destination placement on arrival.
#[derive(Clone)]
pub(crate) struct SingleResult {
    inner: Arc<SingleState>,
}

struct SingleState {
    destination: RunStore,
    executor: Executor,
    slot: Mutex<Slot>,
    ready: Condvar,
}

#[derive(Default)]
struct Slot {
    result: Option<Run>,
    failed: bool,
    failure: Option<SortError>,
}

impl SingleResult {
    fn new(destination: RunStore, executor: Executor) -> Self {
        SingleResult {
            inner: Arc::new(SingleState {
                destination,
                executor,
                slot: Mutex::new(Slot::default()),
                ready: Condvar::new(),
            }),
        }
    }

    fn add_part(&self, part: Run) {
        let state = &self.inner;
        let result = if state.destination.is_heap() && part.is_heap() {
            Ok(part)
        } else {
            let size = part.size();
            let result = state.destination.hold_iter(part.iter(), size);
            part.close();
            result
        };

        match result {
            Ok(result) => {
                let mut slot = state.slot.lock();
                if slot.failed {
                    result.close();
                } else {
                    slot.result = Some(result);
                }
                state.ready.notify_all();
            }
            Err(err) => {
                log::error!("sorted run placement failed: {}", err);
                self.fail(SortError::IO(err));
                state.executor.cancel();
            }
        }
    }

    fn fail(&self, err: SortError) {
        let mut slot = self.inner.slot.lock();
        if !slot.failed {
            slot.failed = true;
            slot.failure = Some(err);
            if let Some(result) = slot.result.take() {
                result.close();
            }
        }
        self.inner.ready.notify_all();
    }

    fn get(&self) -> Result<Run, SortError> {
        let mut slot = self.inner.slot.lock();
        loop {
            if slot.failed {
                return Err(slot.failure.take().unwrap_or(SortError::Aborted));
            }
            if let Some(result) = slot.result.take() {
                return Ok(result);
            }
            self.inner.ready.wait(&mut slot);
        }
    }
}

/// Sink reducing parts through a tree of two-way merges.
///
/// Every part carries a generation: 0 for parts added from outside, `k + 1` for the merge of generation `k` parts.
/// Parts of the same generation are paired as soon as both are available, keeping the tree balanced. Once every
/// outstanding part is held and nothing is being merged, leftovers are paired lowest generation first. The last
/// merge writes to the destination placement, all others to the intermediate one.
#[derive(Clone)]
pub(crate) struct MergingResult {
    inner: Arc<MergingState>,
}

struct MergingState {
    intermediate: RunStore,
    destination: RunStore,
    executor: Executor,
    queue: Mutex<CompletionQueue>,
    ready: Condvar,
}

/// Held parts and merge progress, guarded by a single lock.
struct CompletionQueue {
    /// Parts still to be reduced: held, being merged or not arrived yet.
    remaining: usize,
    /// Completed parts waiting for a merge partner, at most one per generation.
    held: BTreeMap<u32, Run>,
    failed: bool,
    failure: Option<SortError>,
}

impl CompletionQueue {
    /// Accepts a part and returns the merges it makes possible. Scheduled parts leave the queue.
    fn reduce(&mut self, generation: u32, part: Run, intermediate: &RunStore, destination: &RunStore) -> Vec<MergeJob> {
        let mut jobs = Vec::new();

        if self.remaining == 2 {
            match self.held.pop_first() {
                Some((held_generation, held)) => jobs.push(MergeJob {
                    generation: held_generation.max(generation) + 1,
                    first: held,
                    second: part,
                    store: destination.clone(),
                }),
                None => {
                    self.held.insert(generation, part);
                }
            }
        } else if self.remaining > 2 {
            match self.held.remove(&generation) {
                Some(twin) => jobs.push(MergeJob {
                    generation: generation + 1,
                    first: twin,
                    second: part,
                    store: intermediate.clone(),
                }),
                None => {
                    self.held.insert(generation, part);
                }
            }

            if self.held.len() == self.remaining {
                while self.held.len() > 2 {
                    if let (Some((first_generation, first)), Some((second_generation, second))) =
                        (self.held.pop_first(), self.held.pop_first())
                    {
                        jobs.push(MergeJob {
                            generation: first_generation.max(second_generation) + 1,
                            first,
                            second,
                            store: intermediate.clone(),
                        });
                    }
                }
            }
        } else {
            self.held.insert(generation, part);
        }

        jobs
    }
}

impl MergingResult {
    fn new(parts: usize, intermediate: RunStore, destination: RunStore, executor: Executor) -> Self {
        MergingResult {
            inner: Arc::new(MergingState {
                intermediate,
                destination,
                executor,
                queue: Mutex::new(CompletionQueue {
                    remaining: parts,
                    held: BTreeMap::new(),
                    failed: false,
                    failure: None,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    fn add_part(&self, part: Run) {
        self.accept(0, part, false);
    }

    /// Accepts the merge of two parts, which replaces both of them.
    pub(crate) fn add_merge_result(&self, generation: u32, part: Run) {
        self.accept(generation, part, true);
    }

    fn accept(&self, generation: u32, part: Run, merged: bool) {
        let state = &self.inner;
        let mut queue = state.queue.lock();

        if queue.failed {
            part.close();
            return;
        }
        if merged {
            queue.remaining -= 1;
        }

        let jobs = queue.reduce(generation, part, &state.intermediate, &state.destination);
        for job in jobs {
            log::trace!("scheduling generation {} merge ({} parts remaining)", job.generation, queue.remaining);
            task::submit_merge(&state.executor, job, self.clone());
        }
        state.ready.notify_all();
    }

    pub(crate) fn fail(&self, err: SortError) {
        let mut queue = self.inner.queue.lock();
        if !queue.failed {
            queue.failed = true;
            queue.failure = Some(err);
            for (_, part) in mem::take(&mut queue.held) {
                part.close();
            }
        }
        self.inner.ready.notify_all();
    }

    fn get(&self) -> Result<Run, SortError> {
        let mut queue = self.inner.queue.lock();
        loop {
            if queue.failed {
                return Err(queue.failure.take().unwrap_or(SortError::Aborted));
            }
            if queue.remaining == 1 && queue.held.len() == 1 {
                if let Some((_, result)) = queue.held.pop_first() {
                    return Ok(result);
                }
            }
            self.inner.ready.wait(&mut queue);
        }
    }
}
