//! Read access to a tessellated grid stored in the cache pool.

use std::sync::atomic::{AtomicU32, Ordering};

/// Plane holding the x coordinates.
pub const PLANE_X: usize = 0;
/// Plane holding the y coordinates.
pub const PLANE_Y: usize = 1;
/// Plane holding the z coordinates.
pub const PLANE_Z: usize = 2;
/// Plane holding the packed uv of every sample.
pub const PLANE_UV: usize = 3;

/// Location of a tessellated grid inside the cache pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSlot {
    /// First slot of the x plane.
    pub offset: usize,
    /// Distance between two consecutive planes.
    pub dim_offset: usize,
    /// Row stride inside a plane, the horizontal grid resolution.
    pub line_offset: usize,
}

/// A borrowed view of one grid in the pool, addressed as `(plane, sample index)`.
#[derive(Clone, Copy)]
pub struct GridPlanes<'a> {
    pool: &'a [AtomicU32],
    slot: GridSlot,
}

impl<'a> GridPlanes<'a> {
    pub(crate) fn new(pool: &'a [AtomicU32], slot: GridSlot) -> Self {
        GridPlanes { pool, slot }
    }

    #[inline(always)]
    pub fn line_offset(&self) -> usize {
        self.slot.line_offset
    }

    /// Raw bits of sample `i` of `plane`.
    #[inline(always)]
    pub fn bits(&self, plane: usize, i: usize) -> u32 {
        self.pool[self.slot.offset + plane * self.slot.dim_offset + i].load(Ordering::Relaxed)
    }

    /// Sample `i` of `plane` as a float.
    #[inline(always)]
    pub fn get(&self, plane: usize, i: usize) -> f32 {
        f32::from_bits(self.bits(plane, i))
    }
}
