//! Leave-one-subject-out cross-validation folds.
//!
//! Folds are index sets, never row copies. The outer split runs over the
//! subject column of a whole feature table; the inner split runs over the
//! subject column of one outer training set and yields positions within it.

use std::collections::BTreeSet;

use crate::types::SubjectId;

/// One train/validation split. All rows of `subject` are in `validation`,
/// every other row is in `train`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LosoFold {
    pub subject: SubjectId,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

impl LosoFold {
    /// Subject labels of the training rows, the input for an inner split.
    pub fn train_subjects(&self, subjects: &[SubjectId]) -> Vec<SubjectId> {
        self.train.iter().map(|&i| subjects[i]).collect()
    }
}

fn split_by_subject(subjects: &[SubjectId]) -> Vec<LosoFold> {
    let distinct: BTreeSet<SubjectId> = subjects.iter().copied().collect();
    distinct
        .into_iter()
        .map(|subject| {
            let (validation, train): (Vec<usize>, Vec<usize>) =
                (0..subjects.len()).partition(|&i| subjects[i] == subject);
            LosoFold {
                subject,
                train,
                validation,
            }
        })
        .collect()
}

/// Outer folds: one per distinct subject, in ascending subject order.
/// Indices refer to rows of the table `subjects` was taken from.
pub fn outer_loso_split(subjects: &[SubjectId]) -> Vec<LosoFold> {
    split_by_subject(subjects)
}

/// Inner folds over one outer training set. `subjects` holds the subject of
/// each training row in order; indices are positions within that set.
pub fn inner_loso_split(subjects: &[SubjectId]) -> Vec<LosoFold> {
    split_by_subject(subjects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_fold_per_subject_in_order() {
        let subjects = [7, 3, 3, 7, 5, 3];
        let folds = outer_loso_split(&subjects);
        assert_eq!(folds.iter().map(|f| f.subject).collect::<Vec<_>>(), vec![3, 5, 7]);
        assert_eq!(folds[0].validation, vec![1, 2, 5]);
        assert_eq!(folds[0].train, vec![0, 3, 4]);
        assert_eq!(folds[1].validation, vec![4]);
        assert_eq!(folds[2].validation, vec![0, 3]);
    }

    #[test]
    fn test_validation_sets_partition_rows() {
        let subjects: Vec<SubjectId> = (0..40).map(|i| (i * 7 % 5) as SubjectId).collect();
        let folds = outer_loso_split(&subjects);
        assert_eq!(folds.len(), 5);

        let mut seen = vec![0usize; subjects.len()];
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.validation.len(), subjects.len());
            assert!(fold.train.iter().all(|&i| subjects[i] != fold.subject));
            assert!(fold.validation.iter().all(|&i| subjects[i] == fold.subject));
            for &i in &fold.validation {
                seen[i] += 1;
            }
        }
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn test_inner_split_uses_positions_within_training_set() {
        let subjects = [1, 2, 3, 1, 2, 3];
        let outer = outer_loso_split(&subjects);
        let held_out_three = &outer[2];
        assert_eq!(held_out_three.train, vec![0, 1, 3, 4]);

        let train_subjects = held_out_three.train_subjects(&subjects);
        assert_eq!(train_subjects, vec![1, 2, 1, 2]);

        let inner = inner_loso_split(&train_subjects);
        assert_eq!(inner.len(), 2);
        assert_eq!(inner[0].subject, 1);
        assert_eq!(inner[0].validation, vec![0, 2]);
        assert_eq!(inner[0].train, vec![1, 3]);
        assert_eq!(inner[1].validation, vec![1, 3]);
    }

    #[test]
    fn test_empty_and_single_subject() {
        assert!(outer_loso_split(&[]).is_empty());
        let folds = outer_loso_split(&[4, 4, 4]);
        assert_eq!(folds.len(), 1);
        assert!(folds[0].train.is_empty());
        assert_eq!(folds[0].validation, vec![0, 1, 2]);
    }
}
