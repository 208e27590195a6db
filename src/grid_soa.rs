//! Ray intersection with cached subdivision grids stored as planes of floats.
//!
//! A [`GridBlock`] names a 3x3 neighbourhood of grid samples, i.e. 2x2 quads or eight
//! triangles. The loaders below gather those triangles into SIMD lanes straight from
//! the cache planes:
//!
//! - [`Gather3x3`] fills eight lanes of an `f32x8` with the whole block.
//! - [`Gather2x3`] fills four lanes of an `f32x4` with one row of quads. The block
//!   then takes two passes, the second one a row further down.
//!
//! Both decompose every quad along the same diagonal, so neighbouring triangles
//! share their edges exactly.

use wide::{f32x4, f32x8};

use crate::cache::{CacheLock, GridPlanes, GridSlot, Lookup, TessellationCache, PLANE_UV, PLANE_X, PLANE_Y, PLANE_Z};
use crate::error::Result;
use crate::mask::LaneMask;
use crate::patch::{decode_uv, GridBlock, SubdivPatch};
use crate::pluecker::{intersect_triangles, occluded_triangles, HitTarget, LaneRef, TriangleM};
use crate::ray::{Ray, RayK};
use crate::scene::{FilterSet, Geometry, PacketFilterSlot, Scene};
use crate::simd::{SimdFloat, Vec3v};

/// Per-ray state of a traversal step.
///
/// Locks the tessellation cache on first use and keeps the lock until it is dropped,
/// so grid data stays valid across every block the ray visits. Use one at a time per
/// thread: resolving a patch into a full pool waits for every other lock to go away.
pub struct Precalculations<'a> {
    cache: &'a TessellationCache,
    lock: Option<CacheLock<'a>>,
    grid: Option<(u64, GridSlot)>,
}

impl<'a> Precalculations<'a> {
    pub fn new(scene: &'a Scene) -> Self {
        Precalculations {
            cache: scene.cache(),
            lock: None,
            grid: None,
        }
    }

    /// Returns true while the cache lock is held.
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// The grid of `patch`, tessellated into the cache if needed.
    pub fn planes(&mut self, patch: &SubdivPatch) -> Result<GridPlanes<'_>> {
        let slot = self.resolve(patch)?;
        Ok(self.cache.planes(slot))
    }

    fn resolve(&mut self, patch: &SubdivPatch) -> Result<GridSlot> {
        if let (Some(_), Some((id, slot))) = (&self.lock, self.grid) {
            if id == patch.id() {
                return Ok(slot);
            }
        }

        loop {
            let lock = self.lock.get_or_insert_with(|| self.cache.lock());
            match lock.get_or_build(patch)? {
                Lookup::Ready(slot) => {
                    self.grid = Some((patch.id(), slot));
                    return Ok(slot);
                }
                Lookup::Full => {
                    let epoch = lock.epoch();
                    self.lock = None;
                    self.grid = None;
                    self.cache.reset(epoch);
                }
            }
        }
    }
}

/// Gathers triangles of a 3x3 grid block into SIMD lanes.
pub trait GridLoader {
    type Float: SimdFloat;

    /// `(row, column)` of the three corners of every lane's triangle, relative to the
    /// gather base.
    const TRIANGLES: &'static [[(usize, usize); 3]];

    /// Reads corner `corner` of every lane's triangle from `plane`.
    #[inline(always)]
    fn corner(grid: &GridPlanes<'_>, plane: usize, base: usize, corner: usize) -> Self::Float {
        let line = grid.line_offset();
        Self::Float::from_fn(|lane| {
            let (row, col) = Self::TRIANGLES[lane][corner];
            grid.get(plane, base + row * line + col)
        })
    }

    /// Vertex positions of the lane triangles whose top-left sample is `base`.
    #[inline(always)]
    fn gather(grid: &GridPlanes<'_>, base: usize) -> TriangleM<Self::Float> {
        let vertex = |corner| {
            Vec3v::new(
                Self::corner(grid, PLANE_X, base, corner),
                Self::corner(grid, PLANE_Y, base, corner),
                Self::corner(grid, PLANE_Z, base, corner),
            )
        };
        TriangleM {
            v0: vertex(0),
            v1: vertex(1),
            v2: vertex(2),
        }
    }

    /// Decoded surface uv of the three corners of every lane's triangle.
    #[inline(always)]
    fn gather_uv(grid: &GridPlanes<'_>, base: usize) -> [(Self::Float, Self::Float); 3] {
        let line = grid.line_offset();
        std::array::from_fn(|corner| {
            let decoded = |lane: usize| {
                let (row, col) = Self::TRIANGLES[lane][corner];
                decode_uv(grid.bits(PLANE_UV, base + row * line + col))
            };
            (
                Self::Float::from_fn(|lane| decoded(lane).0),
                Self::Float::from_fn(|lane| decoded(lane).1),
            )
        })
    }
}

const STRIP: [[(usize, usize); 3]; 4] = [
    [(0, 0), (0, 1), (1, 0)],
    [(1, 0), (0, 1), (1, 1)],
    [(0, 1), (0, 2), (1, 1)],
    [(1, 1), (0, 2), (1, 2)],
];

const BLOCK: [[(usize, usize); 3]; 8] = [
    STRIP[0],
    STRIP[1],
    STRIP[2],
    STRIP[3],
    [(1, 0), (1, 1), (2, 0)],
    [(2, 0), (1, 1), (2, 1)],
    [(1, 1), (1, 2), (2, 1)],
    [(2, 1), (1, 2), (2, 2)],
];

/// One row of two quads: 2 rows × 3 columns of samples, four triangles.
#[derive(Debug, Clone, Copy)]
pub struct Gather2x3;

impl GridLoader for Gather2x3 {
    type Float = f32x4;
    const TRIANGLES: &'static [[(usize, usize); 3]] = &STRIP;
}

/// The whole block: 3 rows × 3 columns of samples, eight triangles.
#[derive(Debug, Clone, Copy)]
pub struct Gather3x3;

impl GridLoader for Gather3x3 {
    type Float = f32x8;
    const TRIANGLES: &'static [[(usize, usize); 3]] = &BLOCK;
}

/// How a block is split into SIMD passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridPath {
    /// One 8-wide pass over the whole block.
    Wide,
    /// Two 4-wide passes, one per row of quads.
    Narrow,
}

impl GridPath {
    /// The path matching the SIMD width the crate was compiled for.
    pub const fn native() -> GridPath {
        if cfg!(target_feature = "avx") {
            GridPath::Wide
        } else {
            GridPath::Narrow
        }
    }
}

/// Blends the decoded corner uvs with the barycentric weights in `u` and `v`.
#[inline(always)]
fn blend_uv<V: SimdFloat>(uv: &[(V, V); 3], u: &mut V, v: &mut V) {
    let w = V::splat(1.0) - *u - *v;
    let [(u0, v0), (u1, v1), (u2, v2)] = *uv;
    let blended_u = *u * u1 + *v * u2 + w * u0;
    let blended_v = *u * v1 + *v * v2 + w * v0;
    *u = blended_u;
    *v = blended_v;
}

fn intersect_pass<L, R>(ray: &mut R, grid: &GridPlanes<'_>, base: usize, geometry: &Geometry, prim_id: u32) -> bool
where
    L: GridLoader,
    R: HitTarget + ?Sized,
{
    let tri = L::gather(grid, base);
    let uv = L::gather_uv(grid, base);
    intersect_triangles(ray, &tri, geometry, prim_id, |u, v| blend_uv(&uv, u, v))
}

fn occluded_pass<L, R>(ray: &mut R, grid: &GridPlanes<'_>, base: usize, geometry: &Geometry, prim_id: u32) -> bool
where
    L: GridLoader,
    R: HitTarget + ?Sized,
{
    let tri = L::gather(grid, base);
    let uv = L::gather_uv(grid, base);
    occluded_triangles(ray, &tri, geometry, prim_id, |u, v| blend_uv(&uv, u, v))
}

fn intersect_block<R: HitTarget + ?Sized>(
    path: GridPath,
    pre: &mut Precalculations<'_>,
    ray: &mut R,
    block: &GridBlock,
    scene: &Scene,
) -> Result<bool> {
    let patch = block.patch();
    let geometry = scene.geometry(patch.geom_id())?;
    let prim_id = patch.prim_id();
    let grid = pre.planes(patch)?;
    let base = block.offset();
    let hit = match path {
        GridPath::Wide => intersect_pass::<Gather3x3, R>(ray, &grid, base, geometry, prim_id),
        GridPath::Narrow => {
            // The lower row may still hold a closer hit once the upper one committed.
            let upper = intersect_pass::<Gather2x3, R>(ray, &grid, base, geometry, prim_id);
            let lower =
                intersect_pass::<Gather2x3, R>(ray, &grid, base + grid.line_offset(), geometry, prim_id);
            upper | lower
        }
    };
    Ok(hit)
}

fn occluded_block<R: HitTarget + ?Sized>(
    path: GridPath,
    pre: &mut Precalculations<'_>,
    ray: &mut R,
    block: &GridBlock,
    scene: &Scene,
) -> Result<bool> {
    let patch = block.patch();
    let geometry = scene.geometry(patch.geom_id())?;
    let prim_id = patch.prim_id();
    let grid = pre.planes(patch)?;
    let base = block.offset();
    let occluded = match path {
        GridPath::Wide => occluded_pass::<Gather3x3, R>(ray, &grid, base, geometry, prim_id),
        GridPath::Narrow => {
            occluded_pass::<Gather2x3, R>(ray, &grid, base, geometry, prim_id)
                || occluded_pass::<Gather2x3, R>(ray, &grid, base + grid.line_offset(), geometry, prim_id)
        }
    };
    Ok(occluded)
}

/// Entry points for rays against [`GridBlock`]s.
#[derive(Debug, Clone, Copy)]
pub struct GridSoaIntersector;

impl GridSoaIntersector {
    /// Intersects `ray` with the eight triangles of `block`, committing the nearest
    /// hit that passes the geometry's intersection filter.
    ///
    /// Fails if the patch grid does not fit the cache pool, or if the patch refers to
    /// a geometry that is not attached to `scene`.
    pub fn intersect(pre: &mut Precalculations<'_>, ray: &mut Ray, block: &GridBlock, scene: &Scene) -> Result<()> {
        Self::intersect_with(GridPath::native(), pre, ray, block, scene)
    }

    /// Returns true if any triangle of `block` occludes `ray`.
    pub fn occluded(pre: &mut Precalculations<'_>, ray: &mut Ray, block: &GridBlock, scene: &Scene) -> Result<bool> {
        Self::occluded_with(GridPath::native(), pre, ray, block, scene)
    }

    /// [`GridSoaIntersector::intersect`] with an explicit SIMD path.
    pub fn intersect_with(
        path: GridPath,
        pre: &mut Precalculations<'_>,
        ray: &mut Ray,
        block: &GridBlock,
        scene: &Scene,
    ) -> Result<()> {
        intersect_block(path, pre, ray, block, scene).map(|_| ())
    }

    /// [`GridSoaIntersector::occluded`] with an explicit SIMD path.
    pub fn occluded_with(
        path: GridPath,
        pre: &mut Precalculations<'_>,
        ray: &mut Ray,
        block: &GridBlock,
        scene: &Scene,
    ) -> Result<bool> {
        occluded_block(path, pre, ray, block, scene)
    }

    /// Intersects the active lanes of a packet with `block`, one lane at a time.
    ///
    /// Returns the lanes that committed a new hit.
    pub fn intersect_packet<const W: usize>(
        valid: LaneMask<W>,
        pre: &mut Precalculations<'_>,
        rays: &mut RayK<W>,
        block: &GridBlock,
        scene: &Scene,
    ) -> Result<LaneMask<W>>
    where
        FilterSet: PacketFilterSlot<W>,
    {
        let mut hits = LaneMask::none();
        for k in valid {
            if intersect_block(GridPath::native(), pre, &mut LaneRef::new(rays, k), block, scene)? {
                hits.set(k);
            }
        }
        Ok(hits)
    }

    /// Returns the active lanes of a packet occluded by `block`.
    pub fn occluded_packet<const W: usize>(
        valid: LaneMask<W>,
        pre: &mut Precalculations<'_>,
        rays: &mut RayK<W>,
        block: &GridBlock,
        scene: &Scene,
    ) -> Result<LaneMask<W>>
    where
        FilterSet: PacketFilterSlot<W>,
    {
        let mut occluded = LaneMask::none();
        for k in valid {
            if occluded_block(GridPath::native(), pre, &mut LaneRef::new(rays, k), block, scene)? {
                occluded.set(k);
            }
        }
        Ok(occluded)
    }

    /// Intersects every ray with every block, in parallel over the rays.
    #[cfg(feature = "rayon")]
    pub fn intersect_stream(rays: &mut [Ray], blocks: &[GridBlock], scene: &Scene) -> Result<()> {
        use rayon::prelude::*;

        rays.par_iter_mut().try_for_each(|ray| {
            let mut pre = Precalculations::new(scene);
            for block in blocks {
                Self::intersect(&mut pre, ray, block, scene)?;
            }
            Ok(())
        })
    }
}


#[cfg(all(feature = "bench", test))]
mod bench {
    use std::sync::Arc;

    use nalgebra::{Point3, Vector3};

    use crate::cache::{CacheConfig, TessellationCache, PLANE_Z};
    use crate::grid_soa::{GridPath, GridSoaIntersector, Precalculations};
    use crate::ray::Ray;
    use crate::scene::{Geometry, Scene};

    fn bench_path(b: &mut ::test::Bencher, path: GridPath) {
        let mut scene = Scene::with_cache(Arc::new(TessellationCache::new(CacheConfig::default())));
        let geom_id = scene.attach(Geometry::new());
        let wave = |u: f32, v: f32| Point3::new(8.0 * u, 8.0 * v, 2.0 + (u * 6.0).sin() * (v * 6.0).cos());
        let patch = scene.create_patch(geom_id, 0, 17, 17, wave).unwrap();
        let blocks = patch.blocks();
        let mut pre = Precalculations::new(&scene);

        b.iter(|| {
            let mut ray = Ray::new(Point3::new(3.3, 4.1, -1.0), Vector3::new(0.01, -0.02, 1.0));
            for block in &blocks {
                GridSoaIntersector::intersect_with(path, &mut pre, &mut ray, block, &scene).unwrap();
            }
            ray
        });
    }

    #[bench]
    fn bench_intersect_wide(b: &mut ::test::Bencher) {
        bench_path(b, GridPath::Wide);
    }

    #[bench]
    fn bench_intersect_narrow(b: &mut ::test::Bencher) {
        bench_path(b, GridPath::Narrow);
    }
}
