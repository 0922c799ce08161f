//! Two-way merger.

use std::iter::Peekable;

/// Two-way merger implementation.
/// Merges two sorted inputs into a single sorted output by repeatedly comparing the input heads.
/// On equal heads the first input wins.
pub struct MergeIter<I1, I2>
where
    I1: Iterator<Item = i32>,
    I2: Iterator<Item = i32>,
{
    first: Peekable<I1>,
    second: Peekable<I2>,
}

impl<I1, I2> MergeIter<I1, I2>
where
    I1: Iterator<Item = i32>,
    I2: Iterator<Item = i32>,
{
    /// Creates an instance of a two-way merger.
    /// Inputs should be sorted in ascending order otherwise the result is undefined.
    pub fn new<C1, C2>(first: C1, second: C2) -> Self
    where
        C1: IntoIterator<IntoIter = I1>,
        C2: IntoIterator<IntoIter = I2>,
    {
        MergeIter {
            first: first.into_iter().peekable(),
            second: second.into_iter().peekable(),
        }
    }
}

impl<I1, I2> Iterator for MergeIter<I1, I2>
where
    I1: Iterator<Item = i32>,
    I2: Iterator<Item = i32>,
{
    type Item = i32;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        match (self.first.peek(), self.second.peek()) {
            (Some(first), Some(second)) if first <= second => self.first.next(),
            (Some(_), Some(_)) => self.second.next(),
            (Some(_), None) => self.first.next(),
            (None, _) => self.second.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (first_low, first_high) = self.first.size_hint();
        let (second_low, second_high) = self.second.size_hint();
        let high = match (first_high, second_high) {
            (Some(first), Some(second)) => first.checked_add(second),
            _ => None,
        };
        (first_low.saturating_add(second_low), high)
    }
}

#[cfg(test)]
mod test {
    use rand::Rng;
    use rstest::*;

    use super::MergeIter;
    use crate::run::Run;

    #[rstest]
    #[case(vec![], vec![], vec![])]
    #[case(vec![1, 2], vec![], vec![1, 2])]
    #[case(vec![], vec![-1, 5], vec![-1, 5])]
    #[case(vec![4, 5, 7], vec![1, 6], vec![1, 4, 5, 6, 7])]
    #[case(vec![-3, 0, 5], vec![5], vec![-3, 0, 5, 5])]
    #[case(vec![i32::MIN, i32::MAX], vec![i32::MIN, 0, i32::MAX], vec![i32::MIN, i32::MIN, 0, i32::MAX, i32::MAX])]
    fn test_merger(#[case] first: Vec<i32>, #[case] second: Vec<i32>, #[case] expected_result: Vec<i32>) {
        let merger = MergeIter::new(first, second);
        assert_eq!(merger.size_hint(), (expected_result.len(), Some(expected_result.len())));

        let actual_result = Vec::from_iter(merger);
        assert_eq!(actual_result, expected_result);
    }

    #[test]
    fn test_merger_random_runs() {
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let mut first = Vec::from_iter((0..rng.gen_range(0..200)).map(|_| rng.gen_range(-100..100)));
            let mut second = Vec::from_iter((0..rng.gen_range(0..200)).map(|_| rng.gen::<i32>()));
            first.sort_unstable();
            second.sort_unstable();

            let first = Run::from_vec(first);
            let second = Run::from_vec(second);
            let merged = Vec::from_iter(MergeIter::new(first.iter(), second.iter()));

            let mut expected = first.materialize();
            expected.extend(second.iter());
            expected.sort_unstable();

            assert_eq!(merged.len(), first.len() + second.len());
            assert_eq!(merged, expected);
        }
    }
}
