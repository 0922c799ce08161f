//! Input file chunking.

use std::fs::File;
use std::io;
use std::sync::Arc;

use crate::run::{Mapping, Run};

/// Forward-only sequence of fixed size chunks of a file region.
/// Each chunk is mapped on demand, so only the chunks currently alive occupy address space.
pub struct Chunker {
    file: Arc<File>,
    position: u64,
    end: u64,
    chunk_size: u64,
}

impl Chunker {
    pub(crate) fn new(file: Arc<File>, start: u64, len: u64, chunk_size: u64) -> Self {
        Chunker {
            file,
            position: start,
            end: start + len,
            chunk_size,
        }
    }

    /// Number of chunks not yet produced.
    pub fn remaining(&self) -> u64 {
        (self.end - self.position + self.chunk_size - 1) / self.chunk_size
    }
}

impl Iterator for Chunker {
    type Item = io::Result<Run>;

    /// Maps the next chunk. The cursor only advances if the mapping succeeds.
    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }

        let chunk_size = self.chunk_size.min(self.end - self.position);
        let chunk = match Mapping::map_region(Arc::clone(&self.file), self.position, chunk_size) {
            Ok(mapping) => Run::from_mapping(mapping),
            Err(err) => return Some(Err(err)),
        };
        self.position += chunk_size;

        Some(Ok(chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining() as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use crate::store::FileStore;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    #[rstest]
    #[case(0, 16, 0)]
    #[case(4, 16, 1)]
    #[case(16, 16, 1)]
    #[case(20, 16, 2)]
    #[case(64, 16, 4)]
    #[case(68, 8, 9)]
    fn test_chunking_completeness(
        tmp_dir: tempfile::TempDir,
        #[case] len: usize,
        #[case] chunk_size: u64,
        #[case] expected_chunks: u64,
    ) {
        let path = tmp_dir.path().join("input.bin");
        let content = Vec::from_iter((0..len).map(|i| i as u8));
        fs::write(&path, &content).unwrap();

        let input = FileStore::wrap(&path).unwrap();
        assert_eq!(input.chunk_count(chunk_size), expected_chunks);

        let chunks = input.split_into_chunks(chunk_size);
        assert_eq!(chunks.remaining(), expected_chunks);

        let mut total = 0;
        let mut joined = Vec::new();
        for chunk in chunks {
            let chunk = chunk.unwrap();
            assert!(chunk.size() > 0 && chunk.size() <= chunk_size);
            total += chunk.size();
            joined.extend(chunk.iter().flat_map(i32::to_be_bytes));
            chunk.close();
        }
        input.close();

        assert_eq!(total, len as u64);
        assert_eq!(joined, content);
    }

    #[rstest]
    fn test_chunks_outlive_input(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("input.bin");
        fs::write(&path, Vec::from_iter([1i32, 2, 3].iter().flat_map(|v| v.to_be_bytes()))).unwrap();

        let input = FileStore::wrap(&path).unwrap();
        let mut chunks = input.split_into_chunks(8);
        input.close();

        let first = chunks.next().unwrap().unwrap();
        let second = chunks.next().unwrap().unwrap();
        assert!(chunks.next().is_none());
        assert_eq!(first.materialize(), vec![1, 2]);
        assert_eq!(second.materialize(), vec![3]);
    }
}
