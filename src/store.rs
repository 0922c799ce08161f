//! Run placement policies.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

use crate::run::{Mapping, Run, INT_SIZE};

/// Materializes new runs from arrays or lazily produced sequences.
#[derive(Clone, Debug)]
pub enum RunStore {
    /// Keeps runs in heap memory.
    Heap,
    /// Writes runs to a caller named file.
    File(FileStore),
    /// Writes runs to anonymous temporary files removed once the run is closed.
    Spill(SpillStore),
}

impl RunStore {
    /// Creates a run holding the provided array.
    pub fn hold(&self, data: Vec<i32>) -> io::Result<Run> {
        match self {
            RunStore::Heap => Ok(Run::from_vec(data)),
            RunStore::File(store) => {
                let size = data.len() as u64 * INT_SIZE;
                store.hold_iter(data, size)
            }
            RunStore::Spill(store) => {
                let size = data.len() as u64 * INT_SIZE;
                store.hold_iter(data, size)
            }
        }
    }

    /// Creates a run from a sequence of exactly `size` bytes worth of integers.
    pub fn hold_iter<I>(&self, items: I, size: u64) -> io::Result<Run>
    where
        I: IntoIterator<Item = i32>,
    {
        match self {
            RunStore::Heap => {
                let len = usize::try_from(size / INT_SIZE)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "run exceeds address space"))?;
                let mut data = Vec::with_capacity(len);
                data.extend(items);
                check_size(data.len() as u64 * INT_SIZE, size)?;
                Ok(Run::from_vec(data))
            }
            RunStore::File(store) => store.hold_iter(items, size),
            RunStore::Spill(store) => store.hold_iter(items, size),
        }
    }

    /// Checks if runs are kept in heap memory.
    pub fn is_heap(&self) -> bool {
        matches!(self, RunStore::Heap)
    }
}

/// Named file placement.
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
    /// File write buffer size.
    buf_size: usize,
}

impl FileStore {
    pub fn new(path: &Path, buf_size: usize) -> Self {
        FileStore {
            path: path.into(),
            buf_size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the sequence to the file (truncating it) and reopens it read-only as a mapped run.
    pub fn hold_iter<I>(&self, items: I, size: u64) -> io::Result<Run>
    where
        I: IntoIterator<Item = i32>,
    {
        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        dump(file, items, size, self.buf_size)?;
        log::debug!("{} bytes saved to {}", size, self.path.display());

        Self::wrap(&self.path)
    }

    /// Opens an existing file as a mapped run without rewriting it.
    pub fn wrap(path: &Path) -> io::Result<Run> {
        Ok(Run::from_mapping(Mapping::open(fs::File::open(path)?)?))
    }
}

/// Anonymous temporary file placement.
#[derive(Clone, Debug)]
pub struct SpillStore {
    dir: PathBuf,
    /// File write buffer size.
    buf_size: usize,
}

impl SpillStore {
    pub fn new(dir: &Path, buf_size: usize) -> Self {
        SpillStore {
            dir: dir.into(),
            buf_size,
        }
    }

    /// Writes the sequence to a new anonymous file and maps it. The file disappears once the run is closed.
    pub fn hold_iter<I>(&self, items: I, size: u64) -> io::Result<Run>
    where
        I: IntoIterator<Item = i32>,
    {
        let tmp_file = tempfile::tempfile_in(&self.dir)?;
        dump(tmp_file.try_clone()?, items, size, self.buf_size)?;
        log::debug!("{} bytes spilled to {}", size, self.dir.display());

        Ok(Run::from_mapping(Mapping::open(tmp_file)?))
    }
}

fn dump<I>(file: fs::File, items: I, size: u64, buf_size: usize) -> io::Result<()>
where
    I: IntoIterator<Item = i32>,
{
    let mut writer = io::BufWriter::with_capacity(buf_size.max(INT_SIZE as usize), file);
    let mut written = 0;
    for item in items.into_iter() {
        writer.write_all(&item.to_be_bytes())?;
        written += INT_SIZE;
    }
    writer.flush()?;

    check_size(written, size)
}

fn check_size(actual: u64, expected: u64) -> io::Result<()> {
    if actual != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("run size mismatch: expected {} bytes, got {}", expected, actual),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io;

    use rstest::*;

    use super::{FileStore, RunStore, SpillStore};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn stores(dir: &tempfile::TempDir) -> Vec<RunStore> {
        vec![
            RunStore::Heap,
            RunStore::File(FileStore::new(&dir.path().join("run.bin"), 8)),
            RunStore::Spill(SpillStore::new(dir.path(), 8)),
        ]
    }

    #[rstest]
    fn test_hold(tmp_dir: tempfile::TempDir) {
        let saved = vec![5, -3, 0, i32::MIN, i32::MAX];

        for store in stores(&tmp_dir) {
            let run = store.hold(saved.clone()).unwrap();
            assert_eq!(run.is_heap(), store.is_heap());
            assert_eq!(run.size(), 20);
            assert_eq!(Vec::from_iter(run.iter()), saved);
            run.close();
        }
    }

    #[rstest]
    fn test_hold_iter(tmp_dir: tempfile::TempDir) {
        for store in stores(&tmp_dir) {
            let run = store.hold_iter(0..100, 400).unwrap();
            assert_eq!(run.materialize(), Vec::from_iter(0..100));
            run.close();

            let empty = store.hold_iter(std::iter::empty(), 0).unwrap();
            assert!(empty.is_empty());
        }
    }

    #[rstest]
    fn test_size_mismatch(tmp_dir: tempfile::TempDir) {
        for store in stores(&tmp_dir) {
            let err = store.hold_iter(0..3, 16).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
    }

    #[rstest]
    fn test_file_store_format(tmp_dir: tempfile::TempDir) {
        let path = tmp_dir.path().join("out.bin");
        let store = FileStore::new(&path, 3);

        store.hold_iter(vec![1, -2], 8).unwrap().close();
        assert_eq!(fs::read(&path).unwrap(), vec![0, 0, 0, 1, 0xff, 0xff, 0xff, 0xfe]);

        let wrapped = FileStore::wrap(&path).unwrap();
        assert_eq!(wrapped.materialize(), vec![1, -2]);
    }

    #[rstest]
    fn test_spill_leaves_no_files(tmp_dir: tempfile::TempDir) {
        let store = SpillStore::new(tmp_dir.path(), 16);
        let run = store.hold_iter((0..10).rev(), 40).unwrap();
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
        assert_eq!(run.materialize(), Vec::from_iter((0..10).rev()));
        run.close();
    }
}
