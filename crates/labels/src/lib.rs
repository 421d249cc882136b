//! Label post-processing, cross-model merging and compartment reconciliation
//!
//! All operations work on `(Z, Y, X)` label volumes where 0 is background and
//! every positive value is one instance.
//!
//! # Example
//! ```
//! use cellfuse_labels::merge_label_masks;
//! use ndarray::Array3;
//!
//! let shape = (1, 4, 4);
//! let mut model_a = Array3::<u32>::zeros(shape);
//! model_a[[0, 0, 0]] = 1;
//! let mut model_b = Array3::<u32>::zeros(shape);
//! model_b[[0, 3, 3]] = 1;
//!
//! let merged = merge_label_masks(shape, [&model_a, &model_b]).unwrap();
//! assert_eq!(merged[[0, 0, 0]], 1);
//! assert_eq!(merged[[0, 3, 3]], 2);
//! ```

pub mod merge;
pub mod postprocess;
pub mod reconcile;

pub use merge::{merge_label_masks, merge_label_pairs, MergeState};
pub use postprocess::{
    binarize, connected_components, expand_labels, minimum_filter, LabelPostProcessor,
    PostProcessSettings,
};
pub use reconcile::{match_nuclei, reconcile, ReconciledPair};
