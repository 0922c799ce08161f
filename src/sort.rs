//! External sorter.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytesize::{ByteSize, GIB, MIB};
use log;

use crate::future::FutureResult;
use crate::run::{Run, INT_SIZE};
use crate::store::{FileStore, RunStore, SpillStore};
use crate::task::{self, Executor};

/// Default input chunk size.
pub const DEFAULT_CHUNK_SIZE: u64 = 96 * MIB;
/// Default memory budget.
pub const DEFAULT_MEMORY_LIMIT: u64 = 8 * GIB;

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Input size is not a multiple of the integer size.
    InvalidInputSize(u64),
    /// Chunk size is zero or not a multiple of the integer size.
    InvalidChunkSize(u64),
    /// Zero worker threads requested.
    InvalidThreadsNumber(usize),
    /// Output file already exists.
    OutputExists(PathBuf),
    /// Sorting working set exceeds the memory budget.
    MemoryLimitExceeded { required: u64, limit: u64 },
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Sorting cancelled because another task failed.
    Aborted,
    /// Sorted output size differs from the input size.
    SizeMismatch { input: u64, output: u64 },
    /// Sorted output is out of order.
    OrderViolation { position: u64, previous: i32, current: i32 },
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidInputSize(size) => {
                write!(f, "input size {} is not a multiple of {}", size, INT_SIZE)
            }
            SortError::InvalidChunkSize(size) => {
                write!(f, "chunk size {} is not a positive multiple of {}", size, INT_SIZE)
            }
            SortError::InvalidThreadsNumber(threads) => write!(f, "invalid threads number: {}", threads),
            SortError::OutputExists(path) => write!(f, "output file {} already exists", path.display()),
            SortError::MemoryLimitExceeded { required, limit } => write!(
                f,
                "too many threads: sorting requires {} while the memory limit is {}",
                ByteSize(*required),
                ByteSize(*limit)
            ),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Aborted => write!(f, "sorting aborted due to a failed task"),
            SortError::SizeMismatch { input, output } => {
                write!(f, "invalid output size: expected {} bytes, got {}", input, output)
            }
            SortError::OrderViolation {
                position,
                previous,
                current,
            } => write!(
                f,
                "invalid order at position {}: {} follows {}",
                position, current, previous
            ),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::IO(err)
    }
}

/// Placement of the sorted chunks while they wait for the cross-chunk merge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpillPolicy {
    /// Keep sorted chunks in memory if the sort working set of all threads exceeds twice the input size,
    /// otherwise spill them to temporary files.
    Auto,
    /// Always keep sorted chunks in memory.
    Memory,
    /// Always spill sorted chunks to temporary files.
    Disk,
}

/// Sorting summary.
#[derive(Clone, Debug)]
pub struct SortStats {
    /// Sorted data size in bytes.
    pub input_size: u64,
    /// Number of input chunks.
    pub chunks: u64,
    /// Sorting duration.
    pub elapsed: Duration,
}

/// Solver builder. Provides methods for [`Solver`] initialization.
#[derive(Clone)]
pub struct SolverBuilder {
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Input chunk size in bytes.
    chunk_size: u64,
    /// Memory budget in bytes.
    memory_limit: u64,
    /// Run file write buffer size.
    rw_buf_size: Option<usize>,
    /// Sorted chunks placement.
    spill_policy: SpillPolicy,
}

impl SolverBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        SolverBuilder::default()
    }

    /// Builds a [`Solver`] instance using provided configuration.
    pub fn build(self) -> Result<Solver, SortError> {
        Solver::new(
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.chunk_size,
            self.memory_limit,
            self.rw_buf_size,
            self.spill_policy,
        )
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> SolverBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> SolverBuilder {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets input chunk size.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> SolverBuilder {
        self.chunk_size = chunk_size;
        return self;
    }

    /// Sets memory budget the sort working set of all threads must fit in.
    pub fn with_memory_limit(mut self, memory_limit: u64) -> SolverBuilder {
        self.memory_limit = memory_limit;
        return self;
    }

    /// Sets run file write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> SolverBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets sorted chunks placement.
    pub fn with_spill_policy(mut self, spill_policy: SpillPolicy) -> SolverBuilder {
        self.spill_policy = spill_policy;
        return self;
    }
}

impl Default for SolverBuilder {
    fn default() -> Self {
        SolverBuilder {
            threads_number: None,
            tmp_dir: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_limit: DEFAULT_MEMORY_LIMIT,
            rw_buf_size: None,
            spill_policy: SpillPolicy::Auto,
        }
    }
}

/// External sorter of big-endian 32-bit integer files.
///
/// The input is split into chunks, each chunk is sorted by recursively halving it across the worker pool and merging
/// the sorted halves back, and the sorted chunks are merged into the output file. Dropping the solver shuts the
/// worker pool down and removes its temporary directory.
pub struct Solver {
    /// Sorting thread pool.
    thread_pool: Arc<rayon::ThreadPool>,
    threads_number: usize,
    /// Directory to be used to store temporary data.
    tmp_dir: tempfile::TempDir,
    /// Input chunk size in bytes.
    chunk_size: u64,
    /// Run file write buffer size.
    rw_buf_size: usize,
    /// Sorted chunks placement.
    spill_policy: SpillPolicy,
}

impl Solver {
    /// Creates a new solver instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] the working directory
    ///   will be used.
    /// * `chunk_size` - Input chunk size in bytes.
    /// * `memory_limit` - Memory budget in bytes, `threads_number * chunk_size` must not exceed it.
    /// * `rw_buf_size` - Run files write buffer size. Defaults to a third of the chunk size.
    /// * `spill_policy` - Sorted chunks placement.
    pub fn new(
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        chunk_size: u64,
        memory_limit: u64,
        rw_buf_size: Option<usize>,
        spill_policy: SpillPolicy,
    ) -> Result<Self, SortError> {
        let threads_number = match threads_number {
            Some(0) => return Err(SortError::InvalidThreadsNumber(0)),
            Some(threads_number) => threads_number,
            None => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };

        if chunk_size == 0 || chunk_size % INT_SIZE != 0 {
            return Err(SortError::InvalidChunkSize(chunk_size));
        }

        let required = (threads_number as u64).saturating_mul(chunk_size);
        if required > memory_limit {
            return Err(SortError::MemoryLimitExceeded {
                required,
                limit: memory_limit,
            });
        }

        let rw_buf_size = rw_buf_size.unwrap_or_else(|| {
            let buf_size = (chunk_size / 3).min(usize::MAX as u64) as usize;
            buf_size - buf_size % INT_SIZE as usize
        });

        return Ok(Solver {
            thread_pool: Arc::new(Self::init_thread_pool(threads_number)?),
            threads_number,
            tmp_dir: Self::init_tmp_directory(tmp_path)?,
            chunk_size,
            rw_buf_size,
            spill_policy,
        });
    }

    fn init_thread_pool(threads_number: usize) -> Result<rayon::ThreadPool, SortError> {
        log::info!("initializing thread-pool (threads: {})", threads_number);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .thread_name(|idx| format!("sort-worker-{}", idx))
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    fn init_tmp_directory(tmp_path: Option<&Path>) -> Result<tempfile::TempDir, SortError> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("sort")
            .tempdir_in(tmp_path.unwrap_or_else(|| Path::new("./")))
            .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a temporary directory", tmp_dir.path().display());

        return Ok(tmp_dir);
    }

    /// Sorts the input file into the output file. The output file must not exist.
    pub fn solve(&self, input: &Path, output: &Path) -> Result<SortStats, SortError> {
        let input_size = fs::metadata(input)?.len();
        if input_size % INT_SIZE != 0 {
            return Err(SortError::InvalidInputSize(input_size));
        }
        log::info!("input data size: {}", ByteSize(input_size));

        match fs::OpenOptions::new().write(true).create_new(true).open(output) {
            Ok(_) => (),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(SortError::OutputExists(output.into()));
            }
            Err(err) => return Err(SortError::IO(err)),
        }

        let intermediate_store = self.intermediate_store(input_size);
        let output_store = RunStore::File(FileStore::new(output, self.rw_buf_size));
        let executor = Executor::new(Arc::clone(&self.thread_pool));

        let input_run = FileStore::wrap(input)?;
        let chunks_number = input_run.chunk_count(self.chunk_size);
        log::info!("chunks number: {}", chunks_number);

        log::info!("sorting...");
        let sort_start = Instant::now();

        let mut chunks = input_run.split_into_chunks(self.chunk_size);
        input_run.close();

        let output_run = if chunks_number == 1 {
            let chunk = chunks.next().ok_or(SortError::Aborted)??;
            Some(self.sort_chunk(&executor, chunk, output_store).get()?)
        } else if chunks_number > 1 {
            let parts = usize::try_from(chunks_number).map_err(|_| SortError::InvalidChunkSize(self.chunk_size))?;
            let final_result = FutureResult::new(parts, intermediate_store.clone(), output_store, executor.clone());

            for (idx, chunk) in chunks.enumerate() {
                if executor.is_cancelled() {
                    break;
                }
                let chunk = chunk?;
                log::debug!("sorting chunk {} of {}", idx + 1, chunks_number);
                let sorted = self
                    .sort_chunk(&executor, chunk, intermediate_store.clone())
                    .get()
                    .map_err(|err| first_failure(err, &final_result))?;
                final_result.add_part(sorted);
            }

            Some(final_result.get()?)
        } else {
            None
        };

        if let Some(output_run) = output_run {
            output_run.close();
        }

        let elapsed = sort_start.elapsed();
        log::info!("sort complete in {:.3} seconds", elapsed.as_secs_f64());

        Ok(SortStats {
            input_size,
            chunks: chunks_number,
            elapsed,
        })
    }

    fn intermediate_store(&self, input_size: u64) -> RunStore {
        let in_memory = match self.spill_policy {
            SpillPolicy::Auto => {
                (self.threads_number as u64).saturating_mul(self.chunk_size) > input_size.saturating_mul(2)
            }
            SpillPolicy::Memory => true,
            SpillPolicy::Disk => false,
        };

        if in_memory {
            log::info!("keeping sorted chunks in memory");
            RunStore::Heap
        } else {
            log::info!("spilling sorted chunks to {}", self.tmp_dir.path().display());
            RunStore::Spill(SpillStore::new(self.tmp_dir.path(), self.rw_buf_size))
        }
    }

    /// Schedules a recursive sort of the chunk whose sorted result lands in `destination`.
    fn sort_chunk(&self, executor: &Executor, chunk: Run, destination: RunStore) -> FutureResult {
        let min_split_len = self.min_split_len();
        let parts = task::leaf_count(chunk.len(), min_split_len);
        log::debug!("sorting {} in {} parts", ByteSize(chunk.size()), parts);

        let result = FutureResult::new(parts, RunStore::Heap, destination, executor.clone());
        task::submit_sort(executor, chunk, min_split_len, result.clone());
        result
    }

    /// Largest part (in integers) sorted without further splitting.
    fn min_split_len(&self) -> usize {
        let len = self.chunk_size / self.threads_number as u64 / INT_SIZE;
        (len.min(usize::MAX as u64) as usize).max(1)
    }
}

/// Chunk pipelines abort when a top-level merge cancels the sort. The merge error is then held by the top-level sink.
fn first_failure(err: SortError, final_result: &FutureResult) -> SortError {
    match err {
        SortError::Aborted => final_result.get().err().unwrap_or(SortError::Aborted),
        err => err,
    }
}
