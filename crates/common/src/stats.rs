//! Percentile statistics over intensity data
//!
//! Percentiles use linear interpolation between the two closest ranks, the
//! same convention numpy uses by default. NaN values are ignored.

/// Compute a single percentile (`q` in 0..=100).
///
/// Returns `None` when there are no finite-comparable values.
pub fn percentile<'a, I>(values: I, q: f64) -> Option<f32>
where
    I: IntoIterator<Item = &'a f32>,
{
    percentiles(values, &[q]).map(|p| p[0])
}

/// Compute several percentiles with a single sort
pub fn percentiles<'a, I>(values: I, qs: &[f64]) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a f32>,
{
    let mut sorted: Vec<f32> = values.into_iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable_by(f32::total_cmp);

    Some(qs.iter().map(|&q| interpolate(&sorted, q)).collect())
}

fn interpolate(sorted: &[f32], q: f64) -> f32 {
    let last = sorted.len() - 1;
    let rank = q.clamp(0.0, 100.0) / 100.0 * last as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;

    if lo == hi {
        return sorted[lo];
    }

    let frac = rank - lo as f64;
    let (a, b) = (f64::from(sorted[lo]), f64::from(sorted[hi]));
    (a + (b - a) * frac) as f32
}
