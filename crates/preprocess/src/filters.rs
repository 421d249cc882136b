//! Neighbourhood filters over `(Z, Y, X)` volumes
//!
//! 2D data is a volume with a single Z plane. Filters take a `volumetric`
//! flag: when it is false the Z axis is never part of a neighbourhood.

use cellfuse_common::boundary::{nearest_index, reflect_index};
use cellfuse_common::Volume;
use ndarray::{Array1, Axis, Zip};

/// Offsets `(dz, dy, dx)` of a disk (2D) or ball (3D) footprint of `radius`
#[must_use]
pub fn round_footprint(radius: u32, volumetric: bool) -> Vec<(isize, isize, isize)> {
    let r = radius as isize;
    let r2 = r * r;
    let z_range = if volumetric { -r..=r } else { 0..=0 };

    let mut offsets = Vec::new();
    for dz in z_range {
        for dy in -r..=r {
            for dx in -r..=r {
                if dz * dz + dy * dy + dx * dx <= r2 {
                    offsets.push((dz, dy, dx));
                }
            }
        }
    }
    offsets
}

/// Median filter with a disk/ball footprint.
///
/// Out-of-bounds neighbours repeat the nearest edge voxel. For an even
/// neighbourhood the upper of the two middle values is taken.
#[must_use]
pub fn median_filter(volume: &Volume, radius: u32, volumetric: bool) -> Volume {
    if radius == 0 {
        return volume.clone();
    }

    let footprint = round_footprint(radius, volumetric);
    let (nz, ny, nx) = volume.dim();
    let mut neighbourhood = Vec::with_capacity(footprint.len());

    let mut out = Volume::zeros(volume.raw_dim());
    Zip::indexed(&mut out).for_each(|(z, y, x), value| {
        neighbourhood.clear();
        for &(dz, dy, dx) in &footprint {
            let zi = nearest_index(z as isize + dz, nz);
            let yi = nearest_index(y as isize + dy, ny);
            let xi = nearest_index(x as isize + dx, nx);
            neighbourhood.push(volume[[zi, yi, xi]]);
        }
        let mid = neighbourhood.len() / 2;
        let (_, median, _) = neighbourhood.select_nth_unstable_by(mid, f32::total_cmp);
        *value = *median;
    });
    out
}

/// Normalized 1D gaussian kernel truncated at four standard deviations
#[must_use]
pub fn gaussian_kernel(sigma: f32) -> Array1<f32> {
    let radius = (4.0 * sigma + 0.5) as isize;
    let denom = 2.0 * f64::from(sigma) * f64::from(sigma);

    let weights: Vec<f64> = (-radius..=radius)
        .map(|i| (-((i * i) as f64) / denom).exp())
        .collect();
    let total: f64 = weights.iter().sum();

    weights.into_iter().map(|w| (w / total) as f32).collect()
}

/// Separable gaussian filter with mirrored boundaries.
///
/// `sigma <= 0` returns the input unchanged.
#[must_use]
pub fn gaussian_filter(volume: &Volume, sigma: f32, volumetric: bool) -> Volume {
    if sigma.is_nan() || sigma <= 0.0 {
        return volume.clone();
    }

    let kernel = gaussian_kernel(sigma);
    let axes: &[usize] = if volumetric { &[0, 1, 2] } else { &[1, 2] };

    let mut current = volume.clone();
    for &axis in axes {
        current = correlate_axis(&current, &kernel, axis);
    }
    current
}

fn correlate_axis(input: &Volume, kernel: &Array1<f32>, axis: usize) -> Volume {
    let radius = (kernel.len() / 2) as isize;
    let len = input.len_of(Axis(axis));
    let mut out = Volume::zeros(input.raw_dim());

    for (lane_in, mut lane_out) in input
        .lanes(Axis(axis))
        .into_iter()
        .zip(out.lanes_mut(Axis(axis)))
    {
        for (i, out_value) in lane_out.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for (k, &w) in kernel.iter().enumerate() {
                let src = reflect_index(i as isize + k as isize - radius, len);
                acc += f64::from(w) * f64::from(lane_in[src]);
            }
            *out_value = acc as f32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_round_footprint_sizes() {
        assert_eq!(round_footprint(0, false).len(), 1);
        // skimage.morphology.disk(1) has 5 elements, disk(2) has 13
        assert_eq!(round_footprint(1, false).len(), 5);
        assert_eq!(round_footprint(2, false).len(), 13);
        // ball(1) has 7 elements
        assert_eq!(round_footprint(1, true).len(), 7);
        assert!(round_footprint(2, false).iter().all(|&(dz, _, _)| dz == 0));
    }

    #[test]
    fn test_median_removes_impulse() {
        let mut volume = Array3::<f32>::zeros((1, 5, 5));
        volume[[0, 2, 2]] = 100.0;

        let filtered = median_filter(&volume, 1, false);
        assert!(filtered.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_median_keeps_edges_of_large_regions() {
        let volume = Array3::from_shape_fn((1, 6, 6), |(_, _, x)| if x < 3 { 1.0 } else { 5.0 });
        let filtered = median_filter(&volume, 1, false);
        assert_eq!(filtered, volume);
    }

    #[test]
    fn test_median_zero_radius_is_identity() {
        let volume = Array3::from_shape_fn((2, 3, 3), |(z, y, x)| (z * 9 + y * 3 + x) as f32);
        assert_eq!(median_filter(&volume, 0, true), volume);
    }

    #[test]
    fn test_gaussian_kernel_normalized() {
        let kernel = gaussian_kernel(1.5);
        // radius = int(4 * 1.5 + 0.5) = 6
        assert_eq!(kernel.len(), 13);
        assert!((kernel.sum() - 1.0).abs() < 1e-5);
        assert_eq!(kernel[6], kernel.iter().copied().fold(f32::MIN, f32::max));
    }

    #[test]
    fn test_gaussian_preserves_constant_and_mass() {
        let constant = Array3::from_elem((1, 8, 8), 3.0f32);
        let filtered = gaussian_filter(&constant, 2.0, false);
        assert!(filtered.iter().all(|&v| (v - 3.0).abs() < 1e-4));

        let mut impulse = Array3::<f32>::zeros((1, 21, 21));
        impulse[[0, 10, 10]] = 1.0;
        let blurred = gaussian_filter(&impulse, 1.0, false);
        assert!((blurred.sum() - 1.0).abs() < 1e-4);
        assert!(blurred[[0, 10, 10]] < 1.0);
        assert!(blurred[[0, 10, 11]] > 0.0);
        assert!((blurred[[0, 10, 11]] - blurred[[0, 11, 10]]).abs() < 1e-6);
    }

    #[test]
    fn test_gaussian_2d_does_not_mix_planes() {
        let mut volume = Array3::<f32>::zeros((2, 5, 5));
        volume[[0, 2, 2]] = 1.0;

        let flat = gaussian_filter(&volume, 1.0, false);
        assert!(flat.index_axis(Axis(0), 1).iter().all(|&v| v == 0.0));

        let deep = gaussian_filter(&volume, 1.0, true);
        assert!(deep[[1, 2, 2]] > 0.0);
    }

    #[test]
    fn test_gaussian_zero_sigma_is_identity() {
        let volume = Array3::from_shape_fn((1, 4, 4), |(_, y, x)| (y * 4 + x) as f32);
        assert_eq!(gaussian_filter(&volume, 0.0, false), volume);
    }
}
