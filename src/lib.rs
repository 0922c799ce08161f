//! `int-ext-sort` is a parallel external sorter of binary 32-bit integer files.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! The input is a flat sequence of big-endian signed 32-bit integers without any header. It is sorted in two
//! passes:
//!
//! * **Chunk sort:**
//!   the memory mapped input is split into fixed size chunks. Every chunk is recursively halved across a bounded
//!   worker pool until its parts are small enough to be sorted in memory, and the sorted parts are merged back
//!   through a balanced tree of two-way merges as soon as same level pairs become available.
//! * **Chunk merge:**
//!   sorted chunks are kept in memory or spilled to anonymous temporary files, depending on the memory budget, and
//!   merged by the same kind of merge tree, the last merge landing in the output file.
//!
//! A failing task cancels the remaining ones and the error is returned to the caller instead of stalling the sort.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use bytesize::MIB;
//!
//! use int_ext_sort::{validate, SolverBuilder};
//!
//! fn main() {
//!     let solver = SolverBuilder::new()
//!         .with_threads_number(4)
//!         .with_chunk_size(64 * MIB)
//!         .with_tmp_dir(Path::new("./"))
//!         .build()
//!         .unwrap();
//!
//!     solver.solve(Path::new("input.bin"), Path::new("output.bin")).unwrap();
//!     validate(Path::new("input.bin"), Path::new("output.bin")).unwrap();
//! }
//! ```

pub mod chunk;
mod future;
pub mod generate;
pub mod merger;
pub mod run;
pub mod sort;
pub mod store;
mod task;
pub mod validate;

pub use chunk::Chunker;
pub use generate::{generate, generate_with_rng};
pub use merger::MergeIter;
pub use run::{Run, RunIter};
pub use sort::{Solver, SolverBuilder, SortError, SortStats, SpillPolicy};
pub use store::{FileStore, RunStore, SpillStore};
pub use validate::validate;
