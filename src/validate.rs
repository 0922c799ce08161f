//! Sorted output validator.

use std::fs;
use std::path::Path;

use log;

use crate::sort::SortError;
use crate::store::FileStore;

/// Checks that the output holds as many bytes as the input and that its integers are in non-decreasing order.
///
/// # Arguments
/// * `input` - Unsorted input file
/// * `output` - Sorted output file
pub fn validate(input: &Path, output: &Path) -> Result<(), SortError> {
    log::info!("validating {}", output.display());

    let input_size = fs::metadata(input)?.len();
    let output_size = fs::metadata(output)?.len();
    if input_size != output_size {
        return Err(SortError::SizeMismatch {
            input: input_size,
            output: output_size,
        });
    }

    let result = FileStore::wrap(output)?;
    let mut previous = i32::MIN;
    for (position, current) in result.iter().enumerate() {
        if current < previous {
            return Err(SortError::OrderViolation {
                position: position as u64,
                previous,
                current,
            });
        }
        previous = current;
    }
    result.close();

    log::info!("validation done");
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use rstest::*;

    use super::validate;
    use crate::sort::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir_in("./").unwrap()
    }

    fn write_ints(path: &Path, data: &[i32]) {
        fs::write(path, Vec::from_iter(data.iter().flat_map(|v| v.to_be_bytes()))).unwrap();
    }

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![1], vec![1])]
    #[case(vec![5, -3, 0, 5], vec![-3, 0, 5, 5])]
    #[case(vec![0, 0, 0], vec![i32::MIN, 0, i32::MAX])]
    fn test_valid(tmp_dir: tempfile::TempDir, #[case] input: Vec<i32>, #[case] output: Vec<i32>) {
        let input_path = tmp_dir.path().join("input.bin");
        let output_path = tmp_dir.path().join("output.bin");
        write_ints(&input_path, &input);
        write_ints(&output_path, &output);

        validate(&input_path, &output_path).unwrap();
    }

    #[rstest]
    fn test_order_violation(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.bin");
        let output_path = tmp_dir.path().join("output.bin");
        write_ints(&input_path, &[0, 0, 0, 0]);
        write_ints(&output_path, &[-1, 3, 2, 4]);

        match validate(&input_path, &output_path) {
            Err(SortError::OrderViolation {
                position,
                previous,
                current,
            }) => assert_eq!((position, previous, current), (2, 3, 2)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    fn test_size_mismatch(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("input.bin");
        let output_path = tmp_dir.path().join("output.bin");
        write_ints(&input_path, &[2, 1]);
        write_ints(&output_path, &[1]);

        assert!(matches!(
            validate(&input_path, &output_path),
            Err(SortError::SizeMismatch { input: 8, output: 4 })
        ));
    }
}
