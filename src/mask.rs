//! Lane validity masks for ray packets.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Maximum number of lanes a [`LaneMask`] can track.
pub const MAX_LANES: usize = 16;

/// A bit-set over the `W` lanes of a ray packet. Bit `k` set means lane `k` is active.
///
/// Bits above lane `W - 1` are always clear.
///
/// # Examples
/// ```
/// use tessgrid::LaneMask;
///
/// let mask = LaneMask::<4>::single(0) | LaneMask::single(2);
/// assert!(mask.test(0) && !mask.test(1) && mask.test(2));
/// assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 2]);
/// assert_eq!((!mask).bits(), 0b1010);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneMask<const W: usize> {
    bits: u16,
}

impl<const W: usize> LaneMask<W> {
    const FULL: u16 = {
        assert!(W > 0 && W <= MAX_LANES, "lane count out of range");
        ((1u32 << W) - 1) as u16
    };

    /// A mask with no active lane.
    pub const fn none() -> Self {
        LaneMask { bits: 0 }
    }

    /// A mask with every lane active.
    pub const fn all() -> Self {
        LaneMask { bits: Self::FULL }
    }

    /// A mask with only lane `k` active.
    pub fn single(k: usize) -> Self {
        debug_assert!(k < W, "lane {k} out of range for width {W}");
        Self::from_bits(1 << k)
    }

    /// Builds a mask from raw bits, dropping bits above lane `W - 1`.
    pub const fn from_bits(bits: u16) -> Self {
        LaneMask {
            bits: bits & Self::FULL,
        }
    }

    /// Builds a mask by asking `f` about every lane.
    pub fn from_fn(mut f: impl FnMut(usize) -> bool) -> Self {
        let mut mask = Self::none();
        for k in 0..W {
            if f(k) {
                mask.set(k);
            }
        }
        mask
    }

    /// Raw bits of the mask.
    pub const fn bits(self) -> u16 {
        self.bits
    }

    /// Returns true if lane `k` is active.
    pub fn test(self, k: usize) -> bool {
        k < W && self.bits & (1 << k) != 0
    }

    /// Activates lane `k`.
    pub fn set(&mut self, k: usize) {
        debug_assert!(k < W);
        self.bits |= (1 << k) & Self::FULL;
    }

    /// Deactivates lane `k`.
    pub fn clear(&mut self, k: usize) {
        self.bits &= !(1 << k);
    }

    /// Returns true if at least one lane is active.
    pub const fn any(self) -> bool {
        self.bits != 0
    }

    /// Returns true if no lane is active.
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Returns true if every lane is active.
    pub const fn is_full(self) -> bool {
        self.bits == Self::FULL
    }

    /// Number of active lanes.
    pub const fn count(self) -> u32 {
        self.bits.count_ones()
    }

    /// Iterates over the active lane indices in ascending order.
    pub fn iter(self) -> Lanes {
        Lanes { bits: self.bits }
    }
}

/// Iterator over the active lanes of a [`LaneMask`].
#[derive(Debug, Clone)]
pub struct Lanes {
    bits: u16,
}

impl Iterator for Lanes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.bits == 0 {
            return None;
        }
        let lane = self.bits.trailing_zeros() as usize;
        self.bits &= self.bits - 1;
        Some(lane)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.bits.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Lanes {}

impl<const W: usize> IntoIterator for LaneMask<W> {
    type Item = usize;
    type IntoIter = Lanes;

    fn into_iter(self) -> Lanes {
        self.iter()
    }
}

impl<const W: usize> BitAnd for LaneMask<W> {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        LaneMask {
            bits: self.bits & rhs.bits,
        }
    }
}

impl<const W: usize> BitOr for LaneMask<W> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        LaneMask {
            bits: self.bits | rhs.bits,
        }
    }
}

impl<const W: usize> BitAndAssign for LaneMask<W> {
    fn bitand_assign(&mut self, rhs: Self) {
        self.bits &= rhs.bits;
    }
}

impl<const W: usize> BitOrAssign for LaneMask<W> {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl<const W: usize> Not for LaneMask<W> {
    type Output = Self;

    fn not(self) -> Self {
        Self::from_bits(!self.bits)
    }
}

impl<const W: usize> fmt::Debug for LaneMask<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LaneMask<{}>({:0width$b})", W, self.bits, width = W)
    }
}
