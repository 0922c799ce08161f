//! Storage agnostic runs of 32-bit integers.

use std::fs::File;
use std::io;
use std::ops::Range;
use std::slice;
use std::sync::Arc;

use log;
use memmap2::{Mmap, MmapOptions};

use crate::chunk::Chunker;

/// Size of a single encoded integer in bytes.
pub const INT_SIZE: u64 = 4;

/// A contiguous block of (possibly sorted) 32-bit integers.
///
/// A run owns its backing storage. Splitting a run produces two views over the same storage without copying it,
/// the storage itself is released when the last view is closed. Closing consumes the run, so a closed run can't be
/// iterated, split or materialized again.
pub struct Run {
    repr: Repr,
}

enum Repr {
    Heap(HeapRun),
    Mapped(MappedRun),
}

/// Heap backed run: a range over a shared integer array.
struct HeapRun {
    data: Arc<Vec<i32>>,
    range: Range<usize>,
}

/// Memory mapped file region backing one or more runs.
pub(crate) struct Mapping {
    /// Empty files are kept unmapped.
    map: Option<Mmap>,
    file: Arc<File>,
    /// Offset of the mapping inside the file in bytes.
    offset: u64,
}

impl Mapping {
    /// Maps the whole file.
    pub(crate) fn open(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Self::map_region(Arc::new(file), 0, len)
    }

    /// Maps `len` bytes of the file starting from `offset`.
    pub(crate) fn map_region(file: Arc<File>, offset: u64, len: u64) -> io::Result<Self> {
        if len % INT_SIZE != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("mapped region length {} is not a multiple of {}", len, INT_SIZE),
            ));
        }

        let map = if len == 0 {
            None
        } else {
            let len = usize::try_from(len).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "mapped region exceeds address space")
            })?;
            // SAFETY: runs never write through the mapping and the engine does not truncate files it maps.
            Some(unsafe { MmapOptions::new().offset(offset).len(len).map(&*file)? })
        };

        Ok(Mapping { map, file, offset })
    }

    fn bytes(&self) -> &[u8] {
        match &self.map {
            Some(map) => &map[..],
            None => &[],
        }
    }
}

/// Mapped file backed run: an integer range over a shared mapping.
struct MappedRun {
    mapping: Arc<Mapping>,
    range: Range<usize>,
}

impl MappedRun {
    fn bytes(&self) -> &[u8] {
        let start = self.range.start * INT_SIZE as usize;
        let end = self.range.end * INT_SIZE as usize;
        &self.mapping.bytes()[start..end]
    }
}

impl Run {
    /// Wraps an in-memory array.
    pub fn from_vec(data: Vec<i32>) -> Self {
        let range = 0..data.len();
        Run {
            repr: Repr::Heap(HeapRun {
                data: Arc::new(data),
                range,
            }),
        }
    }

    /// Wraps a whole mapped region.
    pub(crate) fn from_mapping(mapping: Mapping) -> Self {
        let range = 0..mapping.bytes().len() / INT_SIZE as usize;
        Run {
            repr: Repr::Mapped(MappedRun {
                mapping: Arc::new(mapping),
                range,
            }),
        }
    }

    /// Number of integers in the run.
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Heap(run) => run.range.len(),
            Repr::Mapped(run) => run.range.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run size in bytes.
    pub fn size(&self) -> u64 {
        self.len() as u64 * INT_SIZE
    }

    /// Checks if the run is backed by heap memory.
    pub fn is_heap(&self) -> bool {
        matches!(self.repr, Repr::Heap(_))
    }

    /// Splits the run into two halves covering disjoint contiguous ranges. The first half holds `len / 2` integers.
    ///
    /// # Panics
    ///
    /// Panics if the run holds fewer than two integers.
    pub fn split(&self) -> (Run, Run) {
        let len = self.len();
        assert!(len >= 2, "run of {} integers can't be split", len);

        let (first, second) = match &self.repr {
            Repr::Heap(run) => {
                let (first, second) = halve(&run.range);
                (
                    Repr::Heap(HeapRun {
                        data: Arc::clone(&run.data),
                        range: first,
                    }),
                    Repr::Heap(HeapRun {
                        data: Arc::clone(&run.data),
                        range: second,
                    }),
                )
            }
            Repr::Mapped(run) => {
                let (first, second) = halve(&run.range);
                (
                    Repr::Mapped(MappedRun {
                        mapping: Arc::clone(&run.mapping),
                        range: first,
                    }),
                    Repr::Mapped(MappedRun {
                        mapping: Arc::clone(&run.mapping),
                        range: second,
                    }),
                )
            }
        };

        (Run { repr: first }, Run { repr: second })
    }

    /// Copies the run content into a dense in-memory array.
    pub fn materialize(&self) -> Vec<i32> {
        match &self.repr {
            Repr::Heap(run) => run.data[run.range.clone()].to_vec(),
            Repr::Mapped(run) => run.bytes().chunks_exact(INT_SIZE as usize).map(decode).collect(),
        }
    }

    /// Returns a lazy sequence of the run integers. Every call starts from the beginning of the run.
    pub fn iter(&self) -> RunIter<'_> {
        let inner = match &self.repr {
            Repr::Heap(run) => IterRepr::Heap(run.data[run.range.clone()].iter()),
            Repr::Mapped(run) => IterRepr::Mapped(run.bytes().chunks_exact(INT_SIZE as usize)),
        };
        RunIter { inner }
    }

    /// Returns the number of chunks of `chunk_size` bytes the run is divided into by [`Run::split_into_chunks`].
    pub fn chunk_count(&self, chunk_size: u64) -> u64 {
        assert!(
            chunk_size > 0 && chunk_size % INT_SIZE == 0,
            "chunk size {} must be a positive multiple of {}",
            chunk_size,
            INT_SIZE
        );
        (self.size() + chunk_size - 1) / chunk_size
    }

    /// Returns a forward-only sequence of chunks of `chunk_size` bytes (the last one may be shorter).
    /// Every chunk gets its own mapping of the underlying file.
    ///
    /// # Panics
    ///
    /// Panics if the run is not file backed.
    pub fn split_into_chunks(&self, chunk_size: u64) -> Chunker {
        let chunks = self.chunk_count(chunk_size);
        match &self.repr {
            Repr::Mapped(run) => {
                let start = run.mapping.offset + run.range.start as u64 * INT_SIZE;
                log::debug!("splitting {} bytes into {} chunks", self.size(), chunks);
                Chunker::new(Arc::clone(&run.mapping.file), start, self.size(), chunk_size)
            }
            Repr::Heap(_) => panic!("only file backed runs can be split into chunks"),
        }
    }

    /// Releases the backing storage.
    pub fn close(self) {
        if let Repr::Mapped(run) = &self.repr {
            if Arc::strong_count(&run.mapping) == 1 {
                log::trace!("unmapping {} bytes", run.mapping.bytes().len());
            }
        }
    }
}

fn halve(range: &Range<usize>) -> (Range<usize>, Range<usize>) {
    let middle = range.start + range.len() / 2;
    (range.start..middle, middle..range.end)
}

fn decode(bytes: &[u8]) -> i32 {
    i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Lazy single-pass sequence of run integers.
pub struct RunIter<'a> {
    inner: IterRepr<'a>,
}

enum IterRepr<'a> {
    Heap(slice::Iter<'a, i32>),
    Mapped(slice::ChunksExact<'a, u8>),
}

impl Iterator for RunIter<'_> {
    type Item = i32;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            IterRepr::Heap(iter) => iter.next().copied(),
            IterRepr::Mapped(iter) => iter.next().map(decode),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.inner {
            IterRepr::Heap(iter) => iter.size_hint(),
            IterRepr::Mapped(iter) => iter.size_hint(),
        }
    }
}

impl ExactSizeIterator for RunIter<'_> {}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::prelude::*;

    use rand::Rng;
    use rstest::*;

    use super::{Mapping, Run};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn mapped_run(dir: &tempfile::TempDir, data: &[i32]) -> Run {
        let path = dir.path().join("run.bin");
        let mut file = fs::File::create(&path).unwrap();
        for value in data {
            file.write_all(&value.to_be_bytes()).unwrap();
        }
        file.flush().unwrap();

        Run::from_mapping(Mapping::open(fs::File::open(&path).unwrap()).unwrap())
    }

    #[rstest]
    #[case(vec![1, 2])]
    #[case(vec![3, -1, 2])]
    #[case(vec![i32::MAX, i32::MIN, 0, -5, 7, 7, 9])]
    fn test_split_recombine(tmp_dir: tempfile::TempDir, #[case] data: Vec<i32>) {
        for run in [Run::from_vec(data.clone()), mapped_run(&tmp_dir, &data)] {
            let (first, second) = run.split();
            assert_eq!(first.len(), data.len() / 2);
            assert_eq!(first.size() + second.size(), run.size());
            run.close();

            let recombined = Vec::from_iter(first.iter().chain(second.iter()));
            assert_eq!(recombined, data);
            first.close();
            second.close();
        }
    }

    #[rstest]
    fn test_nested_split(tmp_dir: tempfile::TempDir) {
        let data: Vec<i32> = Vec::from_iter(rand::thread_rng().sample_iter(rand::distributions::Standard).take(101));
        let run = mapped_run(&tmp_dir, &data);

        let (first, second) = run.split();
        run.close();
        let (a, b) = second.split();
        second.close();

        let mut recombined = first.materialize();
        recombined.extend(a.materialize());
        recombined.extend(b.iter());
        assert_eq!(recombined, data);
    }

    #[rstest]
    fn test_mapped_run_is_big_endian(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("run.bin");
        fs::write(&path, [0x00, 0x00, 0x00, 0x01, 0xff, 0xff, 0xff, 0xfe]).unwrap();

        let run = Run::from_mapping(Mapping::open(fs::File::open(&path).unwrap()).unwrap());
        assert_eq!(run.size(), 8);
        assert!(!run.is_heap());
        assert_eq!(run.materialize(), vec![1, -2]);
    }

    #[rstest]
    fn test_empty_file(tmp_dir: tempfile::TempDir) {
        let run = mapped_run(&tmp_dir, &[]);
        assert!(run.is_empty());
        assert_eq!(run.iter().count(), 0);
        assert_eq!(run.chunk_count(16), 0);
        assert_eq!(run.split_into_chunks(16).count(), 0);
    }

    #[test]
    fn test_repeated_iteration() {
        let run = Run::from_vec(vec![3, 1, 2]);
        assert_eq!(Vec::from_iter(run.iter()), vec![3, 1, 2]);
        assert_eq!(run.iter().len(), 3);
        assert_eq!(Vec::from_iter(run.iter()), vec![3, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "can't be split")]
    fn test_split_single_integer() {
        Run::from_vec(vec![1]).split();
    }

    #[test]
    #[should_panic(expected = "file backed")]
    fn test_chunking_heap_run() {
        Run::from_vec(vec![1, 2]).split_into_chunks(4);
    }
}
