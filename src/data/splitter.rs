//! Label group splitting

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;

use crate::{IncrementalError, Result};

/// Partitions the class set into ordered, equally sized groups.
///
/// The partition is a seeded permutation of `0..num_classes` cut into
/// `num_groups` consecutive chunks. A class's incremental index is its
/// position in that permutation, so output column `i` of the classifier
/// always belongs to the `i`-th class introduced.
#[derive(Debug, Clone)]
pub struct LabelSplitter {
    labels_split: Vec<Vec<usize>>,
    index_of: HashMap<usize, usize>,
}

impl LabelSplitter {
    pub fn new(num_classes: usize, num_groups: usize, seed: u64) -> Result<Self> {
        if num_groups == 0 || num_classes == 0 || num_classes % num_groups != 0 {
            return Err(IncrementalError::InvalidConfig(format!(
                "cannot split {} classes into {} equal groups",
                num_classes, num_groups
            )));
        }

        let mut order: Vec<usize> = (0..num_classes).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let index_of = order
            .iter()
            .enumerate()
            .map(|(index, &label)| (label, index))
            .collect();

        let labels_split = order
            .chunks(num_classes / num_groups)
            .map(|chunk| chunk.to_vec())
            .collect();

        Ok(Self {
            labels_split,
            index_of,
        })
    }

    /// Original labels introduced at `step`
    pub fn group(&self, step: usize) -> Option<&[usize]> {
        self.labels_split.get(step).map(Vec::as_slice)
    }

    /// All groups in introduction order
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.labels_split
    }

    pub fn num_groups(&self) -> usize {
        self.labels_split.len()
    }

    pub fn classes_per_group(&self) -> usize {
        self.labels_split.first().map_or(0, Vec::len)
    }

    /// Incremental index of an original label
    pub fn map_label(&self, label: usize) -> Option<usize> {
        self.index_of.get(&label).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_partition_classes() {
        let splitter = LabelSplitter::new(10, 5, 42).unwrap();
        assert_eq!(splitter.num_groups(), 5);
        assert_eq!(splitter.classes_per_group(), 2);

        let mut all: Vec<usize> = splitter.groups().iter().flatten().copied().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = LabelSplitter::new(100, 10, 7).unwrap();
        let b = LabelSplitter::new(100, 10, 7).unwrap();
        assert_eq!(a.groups(), b.groups());
    }

    #[test]
    fn test_map_label_follows_introduction_order() {
        let splitter = LabelSplitter::new(6, 3, 3).unwrap();
        for (step, group) in splitter.groups().iter().enumerate() {
            for (offset, &label) in group.iter().enumerate() {
                assert_eq!(splitter.map_label(label), Some(step * 2 + offset));
            }
        }
        assert_eq!(splitter.map_label(6), None);
    }

    #[test]
    fn test_invalid_split() {
        assert!(LabelSplitter::new(10, 3, 0).is_err());
        assert!(LabelSplitter::new(10, 0, 0).is_err());

        let splitter = LabelSplitter::new(4, 2, 0).unwrap();
        assert!(splitter.group(2).is_none());
    }
}
