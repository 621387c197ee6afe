use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{PipelineError, Result};

/// Repeats `items` end to end and truncates to exactly `target` entries.
///
/// `[a, b, c]` with target 7 gives `[a, b, c, a, b, c, a]`. An empty input
/// stays empty.
pub fn cyclic_repeat<T: Clone>(items: &[T], target: usize) -> Vec<T> {
    items.iter().cycle().take(target).cloned().collect()
}

/// Equalizes per-class counts by replication or truncation in list order.
///
/// The target is `samples_per_class`, or the size of the largest class. A
/// class at or below the target is cycled up to it; a larger class keeps its
/// first `target` entries. Classes are concatenated in label order and the
/// label list is rebuilt to match.
pub fn balance_classes<T: Clone>(
    files: &[T],
    labels: &[usize],
    num_classes: usize,
    samples_per_class: Option<usize>,
) -> Result<(Vec<T>, Vec<usize>)> {
    let mut segregated: Vec<Vec<T>> = vec![Vec::new(); num_classes];
    for (file, &label) in files.iter().zip(labels) {
        let class = segregated.get_mut(label).ok_or_else(|| {
            PipelineError::config(format!("label {label} outside 0..{num_classes}"))
        })?;
        class.push(file.clone());
    }

    let target = match samples_per_class {
        Some(n) => n,
        None => segregated.iter().map(Vec::len).max().unwrap_or(0),
    };

    let mut balanced_files = Vec::with_capacity(target * num_classes);
    let mut balanced_labels = Vec::with_capacity(target * num_classes);
    for (label, elements) in segregated.iter().enumerate() {
        if elements.is_empty() && target > 0 {
            return Err(PipelineError::config(format!(
                "class {label} has no files and cannot be balanced"
            )));
        }
        let class_files = if elements.len() <= target {
            cyclic_repeat(elements, target)
        } else {
            elements[..target].to_vec()
        };
        balanced_labels.extend(std::iter::repeat(label).take(class_files.len()));
        balanced_files.extend(class_files);
    }

    Ok((balanced_files, balanced_labels))
}

/// Shuffles files and labels with the same permutation.
///
/// Each list is shuffled by a generator freshly seeded with the same value,
/// so equal seeds always reproduce the same pairing order and no shared
/// generator is disturbed. Without a seed, one is drawn from the thread rng.
pub fn shuffle_in_lockstep<T>(files: &mut [T], labels: &mut [usize], seed: Option<u64>) {
    debug_assert_eq!(files.len(), labels.len());
    let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
    files.shuffle(&mut StdRng::seed_from_u64(seed));
    labels.shuffle(&mut StdRng::seed_from_u64(seed));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_repeat_fills_and_truncates() {
        assert_eq!(cyclic_repeat(&[0, 1, 2], 7), vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(cyclic_repeat(&[0, 1, 2], 2), vec![0, 1]);
        assert!(cyclic_repeat::<u8>(&[], 5).is_empty());
    }

    #[test]
    fn three_and_seven_balance_to_seven_each() {
        let files: Vec<String> = (0..10).map(|i| format!("f{i}")).collect();
        let labels = vec![0, 0, 0, 1, 1, 1, 1, 1, 1, 1];
        let (out_files, out_labels) = balance_classes(&files, &labels, 2, None).unwrap();

        assert_eq!(out_files.len(), 14);
        assert_eq!(out_labels.iter().filter(|&&l| l == 0).count(), 7);
        assert_eq!(out_labels.iter().filter(|&&l| l == 1).count(), 7);
        assert_eq!(
            &out_files[..7],
            &["f0", "f1", "f2", "f0", "f1", "f2", "f0"].map(String::from)
        );
        assert_eq!(&out_files[7..], &files[3..]);
    }

    #[test]
    fn explicit_target_truncates_large_classes_in_order() {
        let files = vec!["a0", "a1", "a2", "a3", "b0"];
        let labels = vec![0, 0, 0, 0, 1];
        let (out_files, out_labels) = balance_classes(&files, &labels, 2, Some(2)).unwrap();
        assert_eq!(out_files, vec!["a0", "a1", "b0", "b0"]);
        assert_eq!(out_labels, vec![0, 0, 1, 1]);
    }

    #[test]
    fn every_class_hits_the_target() {
        let counts = [1usize, 4, 9, 2];
        let mut files = Vec::new();
        let mut labels = Vec::new();
        for (label, &n) in counts.iter().enumerate() {
            for i in 0..n {
                files.push((label, i));
                labels.push(label);
            }
        }
        for target in [None, Some(3), Some(12)] {
            let (_, out) = balance_classes(&files, &labels, counts.len(), target).unwrap();
            let expected = target.unwrap_or(9);
            for label in 0..counts.len() {
                assert_eq!(out.iter().filter(|&&l| l == label).count(), expected);
            }
            assert_eq!(out.len(), expected * counts.len());
        }
    }

    #[test]
    fn empty_class_cannot_be_balanced() {
        let err = balance_classes(&["a"], &[0], 2, None).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn seeded_shuffle_is_reproducible_and_keeps_pairs() {
        let files: Vec<usize> = (0..50).collect();
        let labels: Vec<usize> = (0..50).map(|i| i % 3).collect();

        let mut f1 = files.clone();
        let mut l1 = labels.clone();
        shuffle_in_lockstep(&mut f1, &mut l1, Some(250));
        let mut f2 = files.clone();
        let mut l2 = labels.clone();
        shuffle_in_lockstep(&mut f2, &mut l2, Some(250));

        assert_eq!(f1, f2);
        assert_eq!(l1, l2);
        assert_ne!(f1, files);
        for (f, l) in f1.iter().zip(&l1) {
            assert_eq!(*l, f % 3);
        }
    }

    #[test]
    fn unseeded_shuffle_keeps_pairs() {
        let mut files: Vec<usize> = (0..40).collect();
        let mut labels: Vec<usize> = (0..40).map(|i| i * 10).collect();
        shuffle_in_lockstep(&mut files, &mut labels, None);
        for (f, l) in files.iter().zip(&labels) {
            assert_eq!(*l, f * 10);
        }
        let mut sorted = files.clone();
        sorted.sort();
        assert_eq!(sorted, (0..40).collect::<Vec<_>>());
    }
}
