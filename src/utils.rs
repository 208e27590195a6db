//! Utilities module.

use num_traits::Float;

/// Fast floating point minimum.  This function matches the semantics of
///
/// ```no_compile
/// if x < y { x } else { y }
/// ```
///
/// which has efficient instruction sequences on many platforms (1 instruction on x86).  For most
/// values, it matches the semantics of `x.min(y)`; the special cases are:
///
/// ```text
/// min(-0.0, +0.0); +0.0
/// min(+0.0, -0.0): -0.0
/// min( NaN,  1.0):  1.0
/// min( 1.0,  NaN):  NaN
/// ```
#[inline(always)]
pub fn fast_min<T: Float>(x: T, y: T) -> T {
    if x < y {
        x
    } else {
        y
    }
}

/// Rounds `value` up to the next multiple of `block`.
#[inline]
pub fn round_up(value: usize, block: usize) -> usize {
    debug_assert!(block > 0);
    value.div_ceil(block) * block
}

/// Returns the lane with the smallest value among the lanes set in `bits`.
/// Ties resolve to the lowest lane index.
#[inline]
pub fn select_min<T: Float>(bits: u32, value: impl Fn(usize) -> T) -> Option<usize> {
    let mut best: Option<(usize, T)> = None;
    let mut remaining = bits;
    while remaining != 0 {
        let lane = remaining.trailing_zeros() as usize;
        remaining &= remaining - 1;
        let candidate = value(lane);
        best = match best {
            Some((_, t)) if fast_min(candidate, t) == t => best,
            _ => Some((lane, candidate)),
        };
    }
    best.map(|(lane, _)| lane)
}
