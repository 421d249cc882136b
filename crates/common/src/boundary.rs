//! Out-of-bounds index handling for neighbourhood filters

/// Mirror an index into `0..len`, repeating the edge sample (`d c b a | a b c d`)
#[inline]
#[must_use]
pub fn reflect_index(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let m = index.rem_euclid(period);
    if m < len {
        m as usize
    } else {
        (period - 1 - m) as usize
    }
}

/// Clamp an index into `0..len` (`a a a a | a b c d`)
#[inline]
#[must_use]
pub fn nearest_index(index: isize, len: usize) -> usize {
    index.clamp(0, len as isize - 1) as usize
}
