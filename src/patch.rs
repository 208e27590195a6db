//! Subdivision patches, their tessellation into regular grids and the grid blocks the
//! intersector works on.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use nalgebra::Point3;

use crate::error::{Error, Result};
use crate::utils::round_up;

/// Number of float planes a tessellated grid occupies: x, y, z and packed uv.
pub const GRID_PLANES: usize = 4;

/// Smallest grid side that holds one 3x3 block.
pub const MIN_GRID_RES: usize = 3;

const UV_SCALE: f32 = 65535.0;

/// Packs a surface parameter pair into two 16-bit fixed-point fields.
///
/// Values outside `[0, 1]` are clamped.
///
/// # Examples
/// ```
/// use tessgrid::patch::{decode_uv, encode_uv};
///
/// let (u, v) = decode_uv(encode_uv(0.25, 1.0));
/// assert!((u - 0.25).abs() <= 1.0 / 65535.0);
/// assert_eq!(v, 1.0);
/// ```
#[inline]
pub fn encode_uv(u: f32, v: f32) -> u32 {
    let quantize = |x: f32| (x.clamp(0.0, 1.0) * UV_SCALE).round() as u32;
    quantize(u) | (quantize(v) << 16)
}

/// Unpacks the two 16-bit fields written by [`encode_uv`].
#[inline]
pub fn decode_uv(bits: u32) -> (f32, f32) {
    let u = (bits & 0xffff) as f32 / UV_SCALE;
    let v = (bits >> 16) as f32 / UV_SCALE;
    (u, v)
}

/// A parametric surface that can be sampled over `[0, 1]²`.
///
/// Implemented for closures, so any `Fn(f32, f32) -> Point3<f32>` can act as a patch.
pub trait PatchEval: Send + Sync {
    /// The surface point at parameter `(u, v)`.
    fn eval(&self, u: f32, v: f32) -> Point3<f32>;
}

impl<F> PatchEval for F
where
    F: Fn(f32, f32) -> Point3<f32> + Send + Sync,
{
    fn eval(&self, u: f32, v: f32) -> Point3<f32> {
        self(u, v)
    }
}

/// A bilinear quad spanned by four corner points.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BilinearPatch {
    pub p00: Point3<f32>,
    pub p10: Point3<f32>,
    pub p01: Point3<f32>,
    pub p11: Point3<f32>,
}

impl BilinearPatch {
    /// Creates a patch from its corners; `pUV` is the point at parameter `(U, V)`.
    pub fn new(p00: Point3<f32>, p10: Point3<f32>, p01: Point3<f32>, p11: Point3<f32>) -> Self {
        BilinearPatch { p00, p10, p01, p11 }
    }

    /// The unit square `[0, 1]²` lifted to height `z`.
    pub fn unit_square(z: f32) -> Self {
        BilinearPatch::new(
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(0.0, 1.0, z),
            Point3::new(1.0, 1.0, z),
        )
    }
}

impl PatchEval for BilinearPatch {
    fn eval(&self, u: f32, v: f32) -> Point3<f32> {
        let bottom = self.p00.coords.lerp(&self.p10.coords, u);
        let top = self.p01.coords.lerp(&self.p11.coords, u);
        Point3::from(bottom.lerp(&top, v))
    }
}

static NEXT_PATCH_ID: AtomicU64 = AtomicU64::new(0);

/// A subdivision patch together with the resolution of its tessellation grid.
///
/// The grid itself is not stored here: it is produced on demand into the
/// [`TessellationCache`](crate::cache::TessellationCache) the first time a ray needs
/// it. Every patch carries a process-unique id that keys its cache entry.
pub struct SubdivPatch {
    id: u64,
    geom_id: u32,
    prim_id: u32,
    grid_u_res: usize,
    grid_v_res: usize,
    surface: Arc<dyn PatchEval>,
}

impl fmt::Debug for SubdivPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubdivPatch")
            .field("id", &self.id)
            .field("geom_id", &self.geom_id)
            .field("prim_id", &self.prim_id)
            .field("grid_u_res", &self.grid_u_res)
            .field("grid_v_res", &self.grid_v_res)
            .finish()
    }
}

impl SubdivPatch {
    /// Creates a patch tessellated into `grid_u_res × grid_v_res` samples.
    ///
    /// Fails with [`Error::GridTooSmall`] if either side is below 3.
    pub fn new(
        geom_id: u32,
        prim_id: u32,
        grid_u_res: usize,
        grid_v_res: usize,
        surface: impl PatchEval + 'static,
    ) -> Result<Self> {
        if grid_u_res < MIN_GRID_RES || grid_v_res < MIN_GRID_RES {
            return Err(Error::GridTooSmall {
                u_res: grid_u_res,
                v_res: grid_v_res,
            });
        }
        Ok(SubdivPatch {
            id: NEXT_PATCH_ID.fetch_add(1, Ordering::Relaxed),
            geom_id,
            prim_id,
            grid_u_res,
            grid_v_res,
            surface: Arc::new(surface),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn geom_id(&self) -> u32 {
        self.geom_id
    }

    pub fn prim_id(&self) -> u32 {
        self.prim_id
    }

    pub fn grid_u_res(&self) -> usize {
        self.grid_u_res
    }

    pub fn grid_v_res(&self) -> usize {
        self.grid_v_res
    }

    /// Distance between two planes of the tessellated grid: the sample count rounded
    /// up to `simd_block`.
    pub fn plane_stride(&self, simd_block: usize) -> usize {
        round_up(self.grid_u_res * self.grid_v_res, simd_block)
    }

    /// Number of cache slots the tessellated grid occupies.
    pub fn footprint(&self, simd_block: usize) -> usize {
        GRID_PLANES * self.plane_stride(simd_block)
    }

    /// The 3x3 block whose top-left sample is at column `u`, row `v`.
    pub fn block(self: &Arc<Self>, u: usize, v: usize) -> Result<GridBlock> {
        if u + MIN_GRID_RES > self.grid_u_res || v + MIN_GRID_RES > self.grid_v_res {
            return Err(Error::BlockOutOfBounds {
                u,
                v,
                u_res: self.grid_u_res,
                v_res: self.grid_v_res,
            });
        }
        Ok(GridBlock {
            patch: Arc::clone(self),
            u,
            v,
        })
    }

    /// A set of blocks covering every quad of the grid at least once.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use tessgrid::patch::{BilinearPatch, SubdivPatch};
    ///
    /// let patch = Arc::new(SubdivPatch::new(0, 0, 6, 3, BilinearPatch::unit_square(0.0)).unwrap());
    /// let origins: Vec<_> = patch.blocks().iter().map(|b| (b.u(), b.v())).collect();
    /// assert_eq!(origins, vec![(0, 0), (2, 0), (3, 0)]);
    /// ```
    pub fn blocks(self: &Arc<Self>) -> Vec<GridBlock> {
        let us = block_origins(self.grid_u_res);
        let vs = block_origins(self.grid_v_res);
        let mut blocks = Vec::with_capacity(us.len() * vs.len());
        for &v in &vs {
            for &u in &us {
                blocks.push(GridBlock {
                    patch: Arc::clone(self),
                    u,
                    v,
                });
            }
        }
        blocks
    }

    /// Evaluates the surface at every grid sample and writes x, y, z and the packed
    /// uv into four planes of `plane_stride` slots each.
    pub(crate) fn tessellate(&self, dst: &[AtomicU32], plane_stride: usize) {
        debug_assert!(dst.len() >= GRID_PLANES * plane_stride);
        let u_steps = (self.grid_u_res - 1) as f32;
        let v_steps = (self.grid_v_res - 1) as f32;
        for row in 0..self.grid_v_res {
            let v = row as f32 / v_steps;
            for col in 0..self.grid_u_res {
                let u = col as f32 / u_steps;
                let p = self.surface.eval(u, v);
                let i = row * self.grid_u_res + col;
                dst[i].store(p.x.to_bits(), Ordering::Relaxed);
                dst[plane_stride + i].store(p.y.to_bits(), Ordering::Relaxed);
                dst[2 * plane_stride + i].store(p.z.to_bits(), Ordering::Relaxed);
                dst[3 * plane_stride + i].store(encode_uv(u, v), Ordering::Relaxed);
            }
        }
    }
}

/// Block origins along one grid side: every second sample, with the last block
/// shifted back so it ends on the border.
fn block_origins(res: usize) -> Vec<usize> {
    let last = res - MIN_GRID_RES;
    let mut origins: Vec<usize> = (0..=last).step_by(2).collect();
    if origins.last() != Some(&last) {
        origins.push(last);
    }
    origins
}

/// A validated reference to the 3x3 sub-grid of a patch starting at column `u`, row
/// `v`. This is the primitive handed to the grid intersector.
#[derive(Debug, Clone)]
pub struct GridBlock {
    patch: Arc<SubdivPatch>,
    u: usize,
    v: usize,
}

impl GridBlock {
    pub fn patch(&self) -> &SubdivPatch {
        &self.patch
    }

    pub fn u(&self) -> usize {
        self.u
    }

    pub fn v(&self) -> usize {
        self.v
    }

    /// Index of the block's top-left sample inside a grid plane.
    #[inline]
    pub fn offset(&self) -> usize {
        self.v * self.patch.grid_u_res + self.u
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use float_eq::assert_float_eq;
    use nalgebra::Point3;
    use proptest::prelude::*;

    use crate::error::Error;
    use crate::patch::{decode_uv, encode_uv, BilinearPatch, PatchEval, SubdivPatch};

    #[test]
    fn tiny_grids_are_refused() {
        let result = SubdivPatch::new(0, 0, 2, 5, BilinearPatch::unit_square(0.0));
        assert!(matches!(result, Err(Error::GridTooSmall { u_res: 2, v_res: 5 })));
    }

    #[test]
    fn block_bounds_are_checked() {
        let patch = Arc::new(SubdivPatch::new(0, 0, 4, 3, BilinearPatch::unit_square(0.0)).unwrap());
        assert!(patch.block(1, 0).is_ok());
        assert!(matches!(patch.block(2, 0), Err(Error::BlockOutOfBounds { .. })));
        assert!(patch.block(0, 1).is_err());
        assert_eq!(patch.block(1, 0).unwrap().offset(), 1);
    }

    #[test]
    fn blocks_cover_every_quad() {
        for (u_res, v_res) in [(3, 3), (4, 7), (9, 5), (10, 10)] {
            let patch = Arc::new(SubdivPatch::new(0, 0, u_res, v_res, BilinearPatch::unit_square(0.0)).unwrap());
            let blocks = patch.blocks();
            for row in 0..v_res - 1 {
                for col in 0..u_res - 1 {
                    let covered = blocks
                        .iter()
                        .any(|b| (b.u()..b.u() + 2).contains(&col) && (b.v()..b.v() + 2).contains(&row));
                    assert!(covered, "quad ({col}, {row}) of {u_res}x{v_res} not covered");
                }
            }
        }
    }

    #[test]
    fn footprint_rounds_planes_to_block() {
        let patch = SubdivPatch::new(0, 0, 3, 3, BilinearPatch::unit_square(0.0)).unwrap();
        assert_eq!(patch.plane_stride(8), 16);
        assert_eq!(patch.footprint(8), 64);
        assert_eq!(patch.footprint(1), 36);
    }

    #[test]
    fn patch_ids_are_unique() {
        let a = SubdivPatch::new(0, 0, 3, 3, BilinearPatch::unit_square(0.0)).unwrap();
        let b = SubdivPatch::new(0, 0, 3, 3, BilinearPatch::unit_square(0.0)).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn closures_are_patches() {
        let dome = |u: f32, v: f32| Point3::new(u, v, u * v);
        assert_eq!(dome.eval(0.5, 0.5), Point3::new(0.5, 0.5, 0.25));
    }

    #[test]
    fn tessellation_writes_four_planes() {
        let surface = BilinearPatch::new(
            Point3::new(0.0, 0.0, 1.0),
            Point3::new(4.0, 0.0, 1.0),
            Point3::new(0.0, 2.0, 1.0),
            Point3::new(4.0, 2.0, 1.0),
        );
        let patch = SubdivPatch::new(0, 0, 3, 3, surface).unwrap();
        let stride = patch.plane_stride(4);
        let pool: Vec<AtomicU32> = (0..4 * stride).map(|_| AtomicU32::new(0)).collect();
        patch.tessellate(&pool, stride);

        let read = |i: usize| f32::from_bits(pool[i].load(Ordering::Relaxed));
        // Sample (col 2, row 1).
        let i = 3 + 2;
        assert_eq!(read(i), 4.0);
        assert_eq!(read(stride + i), 1.0);
        assert_eq!(read(2 * stride + i), 1.0);
        let (u, v) = decode_uv(pool[3 * stride + i].load(Ordering::Relaxed));
        assert_eq!(u, 1.0);
        assert_float_eq!(v, 0.5, abs <= 1.0 / 65535.0);
    }

    proptest! {
        // Packing loses at most one quantization step.
        #[test]
        fn test_uv_codec_precision(u in 0.0f32..=1.0, v in 0.0f32..=1.0) {
            let (du, dv) = decode_uv(encode_uv(u, v));
            assert_float_eq!(du, u, abs <= 1.0 / 65535.0);
            assert_float_eq!(dv, v, abs <= 1.0 / 65535.0);
        }

        // Corners of the parameter domain map to the patch corners.
        #[test]
        fn test_bilinear_corners(x in -10.0f32..10.0, y in -10.0f32..10.0, z in -10.0f32..10.0) {
            let p = BilinearPatch::new(
                Point3::new(x, y, z),
                Point3::new(x + 1.0, y, z),
                Point3::new(x, y + 1.0, z),
                Point3::new(x + 1.0, y + 1.0, z + 1.0),
            );
            prop_assert_eq!(p.eval(0.0, 0.0), p.p00);
            prop_assert_eq!(p.eval(1.0, 1.0), p.p11);
        }
    }
}
