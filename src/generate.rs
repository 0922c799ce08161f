//! Random dataset generator.

use std::path::Path;

use bytesize::ByteSize;
use log;
use rand::Rng;

use crate::run::INT_SIZE;
use crate::sort::SortError;
use crate::store::FileStore;

/// Fills the file with `length / 4` random integers, replacing its previous content.
///
/// # Arguments
/// * `path` - File to be generated
/// * `length` - File length in bytes, must be a multiple of 4
/// * `buf_size` - File write buffer size
pub fn generate(path: &Path, length: u64, buf_size: usize) -> Result<(), SortError> {
    generate_with_rng(path, length, buf_size, &mut rand::thread_rng())
}

/// Same as [`generate`] but draws the integers from the provided random number generator.
pub fn generate_with_rng<R: Rng>(path: &Path, length: u64, buf_size: usize, rng: &mut R) -> Result<(), SortError> {
    if length % INT_SIZE != 0 {
        return Err(SortError::InvalidInputSize(length));
    }

    log::info!("generating {} of input data into {}", ByteSize(length), path.display());

    let items = (0..length / INT_SIZE).map(|_| rng.gen::<i32>());
    FileStore::new(path, buf_size).hold_iter(items, length)?.close();

    log::info!("generation done");
    Ok(())
}
