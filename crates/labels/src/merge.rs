//! Cross-model label merging
//!
//! Masks are folded in model order. Each mask's labels are shifted by the
//! running offset before it is combined into the merged volume with an
//! elementwise maximum, and the offset then grows by the mask's original
//! maximum label. An instance from model `k` therefore ends up with its
//! original ID plus the sum of the original maxima of models `1..k-1`.
//!
//! Where instances of different models overlap spatially the higher ID wins.
//! This is a lossy collision policy: the covered part of the lower instance
//! is lost.

use cellfuse_common::{max_label, LabelVolume, Result, SegmentationError};
use ndarray::Zip;
use tracing::debug;

/// Fold state: next free offset and the volume merged so far
#[derive(Debug, Clone, PartialEq)]
pub struct MergeState {
    pub offset: u32,
    pub merged: LabelVolume,
}

impl MergeState {
    /// Empty state for volumes of `shape`
    #[must_use]
    pub fn new(shape: (usize, usize, usize)) -> Self {
        Self {
            offset: 0,
            merged: LabelVolume::zeros(shape),
        }
    }

    /// Fold one mask into the state.
    ///
    /// Masks without any instance leave the state untouched.
    ///
    /// # Errors
    /// Returns an error when the mask shape differs from the merged volume or
    /// when shifted IDs would overflow `u32`.
    pub fn fold(self, mask: &LabelVolume) -> Result<Self> {
        check_shape(&self.merged, mask)?;

        let original_max = max_label(mask);
        if original_max == 0 {
            debug!("Dropping mask without instances");
            return Ok(self);
        }

        let Self { offset, mut merged } = self;
        let next_offset = checked_shift(offset, original_max)?;

        Zip::from(&mut merged).and(mask).for_each(|out, &label| {
            if label > 0 {
                *out = (*out).max(label + offset);
            }
        });

        Ok(Self {
            offset: next_offset,
            merged,
        })
    }
}

fn check_shape(expected: &LabelVolume, actual: &LabelVolume) -> Result<()> {
    if expected.shape() != actual.shape() {
        return Err(SegmentationError::ShapeMismatch {
            expected: expected.shape().to_vec(),
            actual: actual.shape().to_vec(),
        });
    }
    Ok(())
}

fn checked_shift(offset: u32, label: u32) -> Result<u32> {
    offset
        .checked_add(label)
        .ok_or(SegmentationError::LabelOverflow { offset, label })
}

/// Merge per-model masks into one volume with non-colliding IDs
pub fn merge_label_masks<'a, I>(shape: (usize, usize, usize), masks: I) -> Result<LabelVolume>
where
    I: IntoIterator<Item = &'a LabelVolume>,
{
    let state = masks
        .into_iter()
        .try_fold(MergeState::new(shape), MergeState::fold)?;

    debug!("Merged label space ends at offset {}", state.offset);
    Ok(state.merged)
}

/// Merge nucleus/whole-cell pairs, both volumes sharing one offset.
///
/// A pair is dropped when either of its masks has no instance. The offset
/// grows by the larger of the pair's two original maxima.
pub fn merge_label_pairs<'a, I>(
    shape: (usize, usize, usize),
    pairs: I,
) -> Result<(LabelVolume, LabelVolume)>
where
    I: IntoIterator<Item = (&'a LabelVolume, &'a LabelVolume)>,
{
    let mut offset = 0u32;
    let mut merged_nuc = LabelVolume::zeros(shape);
    let mut merged_cell = LabelVolume::zeros(shape);

    for (nuc, cell) in pairs {
        check_shape(&merged_nuc, nuc)?;
        check_shape(&merged_cell, cell)?;

        let (nuc_max, cell_max) = (max_label(nuc), max_label(cell));
        if nuc_max == 0 || cell_max == 0 {
            debug!("Dropping compartment pair without instances");
            continue;
        }
        let next_offset = checked_shift(offset, nuc_max.max(cell_max))?;

        for (merged, mask) in [(&mut merged_nuc, nuc), (&mut merged_cell, cell)] {
            Zip::from(merged).and(mask).for_each(|out, &label| {
                if label > 0 {
                    *out = (*out).max(label + offset);
                }
            });
        }
        offset = next_offset;
    }

    Ok((merged_nuc, merged_cell))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array3};

    fn single_instance(shape: (usize, usize, usize), region: (usize, usize), id: u32) -> LabelVolume {
        let mut mask = LabelVolume::zeros(shape);
        mask.slice_mut(s![.., region.0..region.1, ..]).fill(id);
        mask
    }

    #[test]
    fn test_disjoint_masks_do_not_collide() {
        let shape = (1, 6, 4);
        let a = single_instance(shape, (0, 2), 1);
        let b = single_instance(shape, (4, 6), 1);

        let merged = merge_label_masks(shape, [&a, &b]).unwrap();

        assert!(merged.slice(s![.., 0..2, ..]).iter().all(|&v| v == 1));
        assert!(merged.slice(s![.., 2..4, ..]).iter().all(|&v| v == 0));
        assert!(merged.slice(s![.., 4..6, ..]).iter().all(|&v| v == 2));
    }

    #[test]
    fn test_offset_is_sum_of_original_maxima() {
        let shape = (1, 3, 3);
        let mut a = LabelVolume::zeros(shape);
        a[[0, 0, 0]] = 3;
        a[[0, 0, 1]] = 1;
        let mut b = LabelVolume::zeros(shape);
        b[[0, 1, 0]] = 2;
        b[[0, 1, 1]] = 5;
        let mut c = LabelVolume::zeros(shape);
        c[[0, 2, 0]] = 1;

        let state = [&a, &b, &c]
            .into_iter()
            .try_fold(MergeState::new(shape), MergeState::fold)
            .unwrap();

        assert_eq!(state.offset, 3 + 5 + 1);
        assert_eq!(state.merged[[0, 0, 0]], 3);
        assert_eq!(state.merged[[0, 0, 1]], 1);
        assert_eq!(state.merged[[0, 1, 0]], 2 + 3);
        assert_eq!(state.merged[[0, 1, 1]], 5 + 3);
        assert_eq!(state.merged[[0, 2, 0]], 1 + 3 + 5);
    }

    #[test]
    fn test_empty_masks_are_dropped() {
        let shape = (1, 2, 2);
        let empty = LabelVolume::zeros(shape);
        let mut a = LabelVolume::zeros(shape);
        a[[0, 0, 0]] = 4;

        let merged = merge_label_masks(shape, [&empty, &a, &empty]).unwrap();
        assert_eq!(merged[[0, 0, 0]], 4);
    }

    #[test]
    fn test_overlap_takes_higher_id() {
        let shape = (1, 2, 2);
        let a = Array3::from_elem(shape, 1u32);
        let mut b = LabelVolume::zeros(shape);
        b[[0, 1, 1]] = 1;

        let merged = merge_label_masks(shape, [&a, &b]).unwrap();
        assert_eq!(merged[[0, 0, 0]], 1);
        assert_eq!(merged[[0, 1, 1]], 2);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Array3::from_elem((1, 2, 2), 1u32);
        let err = merge_label_masks((1, 3, 3), [&a]).unwrap_err();
        assert!(matches!(err, SegmentationError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_overflow_is_reported() {
        let shape = (1, 1, 2);
        let mut a = LabelVolume::zeros(shape);
        a[[0, 0, 0]] = u32::MAX - 1;
        let mut b = LabelVolume::zeros(shape);
        b[[0, 0, 1]] = 5;

        let err = merge_label_masks(shape, [&a, &b]).unwrap_err();
        assert!(matches!(err, SegmentationError::LabelOverflow { .. }));
    }

    #[test]
    fn test_pairs_share_offset() {
        let shape = (1, 2, 4);
        let mut nuc_a = LabelVolume::zeros(shape);
        nuc_a[[0, 0, 0]] = 2;
        let mut cell_a = LabelVolume::zeros(shape);
        cell_a.slice_mut(s![.., .., 0..2]).fill(2);

        let mut nuc_b = LabelVolume::zeros(shape);
        nuc_b[[0, 0, 3]] = 1;
        let mut cell_b = LabelVolume::zeros(shape);
        cell_b.slice_mut(s![.., .., 2..4]).fill(1);

        let empty = LabelVolume::zeros(shape);

        let (nuc, cell) = merge_label_pairs(
            shape,
            [(&nuc_a, &cell_a), (&empty, &cell_b), (&nuc_b, &cell_b)],
        )
        .unwrap();

        assert_eq!(nuc[[0, 0, 0]], 2);
        assert_eq!(nuc[[0, 0, 3]], 3);
        assert_eq!(cell[[0, 1, 1]], 2);
        assert_eq!(cell[[0, 1, 2]], 3);
    }
}
