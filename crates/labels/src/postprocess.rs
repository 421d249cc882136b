//! Fragment merging for over-segmenting models
//!
//! Some models split one cell into several touching instances. The merge
//! pass throws the model's instance boundaries away and rebuilds instances
//! from connectivity:
//!
//! 1. **Binarize**: every positive label becomes 1
//! 2. **Minimum filter**: cube footprint erosion (size 1 leaves the mask as is)
//! 3. **Connected components**: full connectivity, raster-order labels
//! 4. **Expansion**: grow labels into background up to a distance

use cellfuse_common::boundary::reflect_index;
use cellfuse_common::LabelVolume;
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings of the fragment merge pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PostProcessSettings {
    /// Edge length of the cube minimum-filter footprint
    #[serde(default = "default_min_filter_size")]
    pub min_filter_size: usize,
    /// Euclidean distance labels are grown into background
    #[serde(default = "default_expand_distance")]
    pub expand_distance: f32,
}

fn default_min_filter_size() -> usize {
    1
}

fn default_expand_distance() -> f32 {
    1.0
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            min_filter_size: default_min_filter_size(),
            expand_distance: default_expand_distance(),
        }
    }
}

/// Set every positive label to 1
#[must_use]
pub fn binarize(labels: &LabelVolume) -> LabelVolume {
    labels.mapv(|v| u32::from(v > 0))
}

/// Minimum filter with a cube footprint of edge `size` and mirrored borders.
///
/// Only the Y and X axes are filtered unless `volumetric` is set.
#[must_use]
pub fn minimum_filter(labels: &LabelVolume, size: usize, volumetric: bool) -> LabelVolume {
    if size <= 1 {
        return labels.clone();
    }

    let lo = -((size / 2) as isize);
    let hi = lo + size as isize - 1;
    let z_span = if volumetric { lo..=hi } else { 0..=0 };
    let (nz, ny, nx) = labels.dim();

    let mut out = LabelVolume::zeros(labels.raw_dim());
    Zip::indexed(&mut out).for_each(|(z, y, x), value| {
        let mut min = u32::MAX;
        for dz in z_span.clone() {
            let zi = reflect_index(z as isize + dz, nz);
            for dy in lo..=hi {
                let yi = reflect_index(y as isize + dy, ny);
                for dx in lo..=hi {
                    let xi = reflect_index(x as isize + dx, nx);
                    min = min.min(labels[[zi, yi, xi]]);
                }
            }
        }
        *value = min;
    });
    out
}

fn find_root(parents: &mut [usize], label: usize) -> usize {
    let mut current = label;
    while current != parents[current] {
        parents[current] = parents[parents[current]];
        current = parents[current];
    }
    current
}

fn union_labels(parents: &mut [usize], a: usize, b: usize) {
    let root_a = find_root(parents, a);
    let root_b = find_root(parents, b);
    if root_a < root_b {
        parents[root_b] = root_a;
    } else if root_b < root_a {
        parents[root_a] = root_b;
    }
}

/// Offsets of already-visited neighbours in raster order (full connectivity)
fn backward_neighbours(volumetric: bool) -> Vec<(isize, isize, isize)> {
    let z_span = if volumetric { -1..=0 } else { 0..=0 };
    let mut offsets = Vec::new();
    for dz in z_span {
        for dy in -1..=1 {
            for dx in -1..=1 {
                if (dz, dy, dx) < (0, 0, 0) {
                    offsets.push((dz, dy, dx));
                }
            }
        }
    }
    offsets
}

/// Label connected foreground regions.
///
/// Voxels touching by face, edge or corner belong to the same region.
/// Regions are numbered from 1 in the raster order of their first voxel.
#[must_use]
pub fn connected_components(mask: &LabelVolume, volumetric: bool) -> LabelVolume {
    let (nz, ny, nx) = mask.dim();
    let neighbours = backward_neighbours(volumetric);

    let mut provisional = ndarray::Array3::<usize>::zeros((nz, ny, nx));
    let mut parents = vec![0usize];

    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                if mask[[z, y, x]] == 0 {
                    continue;
                }

                let mut assigned = 0usize;
                for &(dz, dy, dx) in &neighbours {
                    let (zi, yi, xi) = (z as isize + dz, y as isize + dy, x as isize + dx);
                    if zi < 0 || yi < 0 || xi < 0 || yi >= ny as isize || xi >= nx as isize {
                        continue;
                    }
                    let neighbour = provisional[[zi as usize, yi as usize, xi as usize]];
                    if neighbour == 0 {
                        continue;
                    }
                    if assigned == 0 {
                        assigned = neighbour;
                    } else if neighbour != assigned {
                        union_labels(&mut parents, assigned, neighbour);
                    }
                }

                if assigned == 0 {
                    assigned = parents.len();
                    parents.push(assigned);
                }
                provisional[[z, y, x]] = assigned;
            }
        }
    }

    let mut relabel = vec![0u32; parents.len()];
    let mut next = 0u32;
    for label in 1..parents.len() {
        let root = find_root(&mut parents, label);
        if relabel[root] == 0 {
            next += 1;
            relabel[root] = next;
        }
        relabel[label] = relabel[root];
    }

    provisional.mapv(|p| relabel[p])
}

/// Grow labels into background voxels within `distance` (Euclidean).
///
/// A background voxel takes the label of its nearest labelled voxel. Among
/// equally near candidates the one with the smaller `(dz, dy, dx)` offset
/// wins. Labelled voxels are never overwritten.
#[must_use]
pub fn expand_labels(labels: &LabelVolume, distance: f32, volumetric: bool) -> LabelVolume {
    if distance.is_nan() || distance < 1.0 {
        return labels.clone();
    }

    let reach = distance.floor() as isize;
    let limit = f64::from(distance) * f64::from(distance);
    let z_span = if volumetric { -reach..=reach } else { 0..=0 };

    let mut offsets = Vec::new();
    for dz in z_span {
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let d2 = (dz * dz + dy * dy + dx * dx) as f64;
                if d2 > 0.0 && d2 <= limit {
                    offsets.push((d2, (dz, dy, dx)));
                }
            }
        }
    }
    offsets.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    let (nz, ny, nx) = labels.dim();
    let mut out = labels.clone();
    Zip::indexed(&mut out).for_each(|(z, y, x), value| {
        if *value != 0 {
            return;
        }
        for &(_, (dz, dy, dx)) in &offsets {
            let (zi, yi, xi) = (z as isize + dz, y as isize + dy, x as isize + dx);
            if zi < 0
                || yi < 0
                || xi < 0
                || zi >= nz as isize
                || yi >= ny as isize
                || xi >= nx as isize
            {
                continue;
            }
            let label = labels[[zi as usize, yi as usize, xi as usize]];
            if label != 0 {
                *value = label;
                break;
            }
        }
    });
    out
}

/// Runs the fragment merge pass with fixed settings
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelPostProcessor {
    settings: PostProcessSettings,
}

impl LabelPostProcessor {
    #[must_use]
    pub fn new(settings: PostProcessSettings) -> Self {
        Self { settings }
    }

    /// Rebuild instances of `labels` from connectivity
    #[must_use]
    pub fn merge_fragments(&self, labels: &LabelVolume, volumetric: bool) -> LabelVolume {
        let binary = binarize(labels);
        let eroded = minimum_filter(&binary, self.settings.min_filter_size, volumetric);
        let components = connected_components(&eroded, volumetric);
        let expanded = expand_labels(&components, self.settings.expand_distance, volumetric);

        debug!(
            "Merged fragments: {} instances in, {} out",
            distinct_labels(labels),
            distinct_labels(&expanded)
        );
        expanded
    }
}

fn distinct_labels(labels: &LabelVolume) -> usize {
    let mut ids: Vec<u32> = labels.iter().copied().filter(|&v| v > 0).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}
