//! Nucleus to whole-cell identity reconciliation
//!
//! Nucleus and whole-cell masks come out of a model with unrelated ID
//! spaces. Each nucleus is matched to the whole-cell instance it overlaps
//! most, and both outputs are rewritten to carry that whole-cell ID:
//!
//! - the nucleus output holds the ID on the pixels where the nucleus and its
//!   matched cell overlap
//! - the cytoplasm output holds the ID on the whole matched cell
//!
//! Nuclei without any overlapping cell are dropped, as are cells that no
//! nucleus was matched to.

use cellfuse_common::{LabelVolume, Result, SegmentationError};
use ndarray::Zip;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Nucleus and whole-cell masks sharing one ID per matched pair
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledPair {
    pub nucleus: LabelVolume,
    pub cytoplasm: LabelVolume,
}

/// Whole-cell ID chosen for each nucleus ID.
///
/// The cell with the largest pixel overlap wins, ties going to the lower
/// cell ID. Nuclei without overlap are absent from the map.
#[must_use]
pub fn match_nuclei(nucleus: &LabelVolume, whole_cell: &LabelVolume) -> BTreeMap<u32, u32> {
    let mut overlaps: HashMap<(u32, u32), usize> = HashMap::new();
    Zip::from(nucleus).and(whole_cell).for_each(|&nuc, &cell| {
        if nuc > 0 && cell > 0 {
            *overlaps.entry((nuc, cell)).or_insert(0) += 1;
        }
    });

    let mut best: BTreeMap<u32, (u32, usize)> = BTreeMap::new();
    for ((nuc, cell), count) in overlaps {
        best.entry(nuc)
            .and_modify(|(best_cell, best_count)| {
                if count > *best_count || (count == *best_count && cell < *best_cell) {
                    *best_cell = cell;
                    *best_count = count;
                }
            })
            .or_insert((cell, count));
    }

    best.into_iter().map(|(nuc, (cell, _))| (nuc, cell)).collect()
}

/// Reconcile a nucleus mask with a whole-cell mask of the same shape
///
/// # Errors
/// Returns [`SegmentationError::ShapeMismatch`] when the shapes differ.
pub fn reconcile(nucleus: &LabelVolume, whole_cell: &LabelVolume) -> Result<ReconciledPair> {
    if nucleus.shape() != whole_cell.shape() {
        return Err(SegmentationError::ShapeMismatch {
            expected: nucleus.shape().to_vec(),
            actual: whole_cell.shape().to_vec(),
        });
    }

    let matches = match_nuclei(nucleus, whole_cell);
    let matched_cells: HashSet<u32> = matches.values().copied().collect();

    let mut out_nucleus = LabelVolume::zeros(nucleus.raw_dim());
    let mut out_cytoplasm = LabelVolume::zeros(whole_cell.raw_dim());

    Zip::from(&mut out_nucleus)
        .and(&mut out_cytoplasm)
        .and(nucleus)
        .and(whole_cell)
        .for_each(|out_nuc, out_cell, &nuc, &cell| {
            if cell == 0 || !matched_cells.contains(&cell) {
                return;
            }
            *out_cell = cell;
            if nuc > 0 && matches.get(&nuc) == Some(&cell) {
                *out_nuc = cell;
            }
        });

    debug!(
        "Reconciled {} nuclei onto {} cells",
        matches.len(),
        matched_cells.len()
    );

    Ok(ReconciledPair {
        nucleus: out_nucleus,
        cytoplasm: out_cytoplasm,
    })
}
