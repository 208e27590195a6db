//! Plücker-coordinate ray/triangle tests and the hit epilogs that route their
//! candidates through the filter protocol.
//!
//! The test works on vertices translated into the ray origin. Each edge contributes
//! one signed volume with the ray direction; a hit requires all three to share the
//! sign of the triangle normal. Edges shared by two triangles produce the same
//! volume with opposite sign, so a ray can never slip between two neighbours.

use nalgebra::{Point3, Vector3};

use crate::filter::{
    run_intersection_filter, run_intersection_filter1, run_intersection_filter_lane, run_occlusion_filter,
    run_occlusion_filter1, run_occlusion_filter_lane,
};
use crate::mask::LaneMask;
use crate::ray::{Hit, HitK, Ray, RayK};
use crate::scene::{FilterSet, Geometry, PacketFilterSlot};
use crate::simd::{SimdFloat, Vec3v};
use crate::utils::select_min;

/// `M` triangles, one per lane of `V`.
#[derive(Debug, Clone, Copy)]
pub struct TriangleM<V> {
    pub v0: Vec3v<V>,
    pub v1: Vec3v<V>,
    pub v2: Vec3v<V>,
}

/// Geometric hits of one ray against a [`TriangleM`].
#[derive(Debug, Clone, Copy)]
pub struct PlueckerHit<V> {
    /// One bit per lane that was hit inside `[tnear, tfar]`.
    pub valid: u32,
    /// Barycentric weight of `v1`, or the remapped surface `u`.
    pub u: V,
    /// Barycentric weight of `v2`, or the remapped surface `v`.
    pub v: V,
    pub t: V,
    /// Unnormalized geometric normal.
    pub ng: Vec3v<V>,
}

impl<V: SimdFloat> PlueckerHit<V> {
    /// The candidate of lane `i`.
    #[inline]
    pub fn hit(&self, i: usize, geom_id: u32, prim_id: u32) -> Hit {
        Hit::new(self.u.lane(i), self.v.lane(i), self.t.lane(i), self.ng.lane(i), geom_id, prim_id)
    }
}

/// Tests one ray against `M` triangles at once.
#[inline(always)]
pub fn pluecker<V: SimdFloat>(
    origin: &Point3<f32>,
    direction: &Vector3<f32>,
    tnear: f32,
    tfar: f32,
    tri: &TriangleM<V>,
) -> PlueckerHit<V> {
    let org = Vec3v::splat_point(origin);
    let dir = Vec3v::splat_vector(direction);
    let zero = V::splat(0.0);

    let v0 = tri.v0 - org;
    let v1 = tri.v1 - org;
    let v2 = tri.v2 - org;

    let e0 = v2 - v0;
    let e1 = v0 - v1;
    let e2 = v1 - v2;

    let ng = e1.cross(e0);
    let ng = ng + ng;
    let den = ng.dot(dir);
    let abs_den = den.abs();
    let sgn_den = den & V::splat(-0.0);

    let u = (v2 + v0).cross(e0).dot(dir) ^ sgn_den;
    let v = (v0 + v1).cross(e1).dot(dir) ^ sgn_den;
    let w = (v1 + v2).cross(e2).dot(dir) ^ sgn_den;
    let mut valid = u.ge_bits(zero) & v.ge_bits(zero) & w.ge_bits(zero);
    if valid == 0 {
        return PlueckerHit {
            valid,
            u,
            v,
            t: zero,
            ng,
        };
    }

    let t = v0.dot(ng) ^ sgn_den;
    valid &= t.ge_bits(abs_den * V::splat(tnear));
    valid &= (abs_den * V::splat(tfar)).ge_bits(t);
    valid &= abs_den.gt_bits(zero);

    PlueckerHit {
        valid,
        u: u / abs_den,
        v: v / abs_den,
        t: t / abs_den,
        ng,
    }
}

#[inline(always)]
fn flip_sign(x: f32, sign: u32) -> f32 {
    f32::from_bits(x.to_bits() ^ sign)
}

/// Scalar form of [`pluecker`] for a single triangle.
///
/// Returns the candidate `(u, v, t, ng)` if the ray hits inside `[tnear, tfar]`.
pub fn pluecker1(
    origin: &Point3<f32>,
    direction: &Vector3<f32>,
    tnear: f32,
    tfar: f32,
    p0: &Point3<f32>,
    p1: &Point3<f32>,
    p2: &Point3<f32>,
) -> Option<(f32, f32, f32, Vector3<f32>)> {
    let v0 = p0 - origin;
    let v1 = p1 - origin;
    let v2 = p2 - origin;

    let e0 = v2 - v0;
    let e1 = v0 - v1;
    let e2 = v1 - v2;

    let ng = e1.cross(&e0);
    let ng = ng + ng;
    let den = ng.dot(direction);
    let abs_den = den.abs();
    let sgn_den = den.to_bits() & 0x8000_0000;

    let u = flip_sign((v2 + v0).cross(&e0).dot(direction), sgn_den);
    let v = flip_sign((v0 + v1).cross(&e1).dot(direction), sgn_den);
    let w = flip_sign((v1 + v2).cross(&e2).dot(direction), sgn_den);
    if !(u >= 0.0 && v >= 0.0 && w >= 0.0) {
        return None;
    }

    let t = flip_sign(v0.dot(&ng), sgn_den);
    if !(t >= abs_den * tnear && abs_den * tfar >= t && abs_den > 0.0) {
        return None;
    }
    Some((u / abs_den, v / abs_den, t / abs_den, ng))
}

/// Something a triangle epilog can commit hits to: a single ray, or one lane of a
/// packet.
pub trait HitTarget {
    fn origin(&self) -> Point3<f32>;
    fn direction(&self) -> Vector3<f32>;
    fn tnear(&self) -> f32;
    fn tfar(&self) -> f32;
    fn mask(&self) -> u32;

    /// Writes `hit` without consulting any filter.
    fn commit(&mut self, hit: &Hit);

    /// Runs the intersection filter matching this target's width; `None` if the
    /// geometry has none.
    fn intersection_filter(&mut self, geometry: &Geometry, hit: &Hit) -> Option<bool>;

    /// Runs the occlusion filter matching this target's width; `None` if the
    /// geometry has none.
    fn occlusion_filter(&mut self, geometry: &Geometry, hit: &Hit) -> Option<bool>;
}

impl HitTarget for Ray {
    fn origin(&self) -> Point3<f32> {
        self.origin
    }

    fn direction(&self) -> Vector3<f32> {
        self.direction
    }

    fn tnear(&self) -> f32 {
        self.tnear
    }

    fn tfar(&self) -> f32 {
        self.tfar
    }

    fn mask(&self) -> u32 {
        self.mask
    }

    fn commit(&mut self, hit: &Hit) {
        Ray::commit(self, hit);
    }

    fn intersection_filter(&mut self, geometry: &Geometry, hit: &Hit) -> Option<bool> {
        geometry
            .has_intersection_filter1()
            .then(|| run_intersection_filter1(geometry, self, hit))
    }

    fn occlusion_filter(&mut self, geometry: &Geometry, hit: &Hit) -> Option<bool> {
        geometry
            .has_occlusion_filter1()
            .then(|| run_occlusion_filter1(geometry, self, hit))
    }
}

/// Lane `k` of a ray packet, seen as a single ray.
///
/// Filters run through the width-`W` callbacks using the single-lane variants.
#[derive(Debug)]
pub struct LaneRef<'r, const W: usize> {
    pub ray: &'r mut RayK<W>,
    pub k: usize,
}

impl<'r, const W: usize> LaneRef<'r, W> {
    pub fn new(ray: &'r mut RayK<W>, k: usize) -> Self {
        debug_assert!(k < W);
        LaneRef { ray, k }
    }
}

impl<const W: usize> HitTarget for LaneRef<'_, W>
where
    FilterSet: PacketFilterSlot<W>,
{
    fn origin(&self) -> Point3<f32> {
        Point3::from(self.ray.org.get(self.k))
    }

    fn direction(&self) -> Vector3<f32> {
        self.ray.dir.get(self.k)
    }

    fn tnear(&self) -> f32 {
        self.ray.tnear[self.k]
    }

    fn tfar(&self) -> f32 {
        self.ray.tfar[self.k]
    }

    fn mask(&self) -> u32 {
        self.ray.mask[self.k]
    }

    fn commit(&mut self, hit: &Hit) {
        self.ray.set_hit_lane(self.k, hit);
    }

    fn intersection_filter(&mut self, geometry: &Geometry, hit: &Hit) -> Option<bool> {
        geometry
            .has_intersection_filter::<W>()
            .then(|| run_intersection_filter_lane(geometry, self.ray, self.k, hit))
    }

    fn occlusion_filter(&mut self, geometry: &Geometry, hit: &Hit) -> Option<bool> {
        geometry
            .has_occlusion_filter::<W>()
            .then(|| run_occlusion_filter_lane(geometry, self.ray, self.k, hit))
    }
}

/// Intersects `ray` with `M` triangles of one primitive and commits the nearest
/// accepted hit.
///
/// `remap` may rewrite the barycentric `u`/`v` of all lanes before any candidate is
/// handed to a filter. Candidates are tried nearest first; a candidate rejected by the
/// filter is dropped and the next nearest is tried. Returns true if a hit was
/// committed.
pub fn intersect_triangles<V, R>(
    ray: &mut R,
    tri: &TriangleM<V>,
    geometry: &Geometry,
    prim_id: u32,
    remap: impl FnOnce(&mut V, &mut V),
) -> bool
where
    V: SimdFloat,
    R: HitTarget + ?Sized,
{
    let mut hit = pluecker(&ray.origin(), &ray.direction(), ray.tnear(), ray.tfar(), tri);
    if hit.valid == 0 {
        return false;
    }

    if !geometry.visible_to(ray.mask()) {
        return false;
    }

    remap(&mut hit.u, &mut hit.v);

    let mut valid = hit.valid;
    while let Some(i) = select_min(valid, |i| hit.t.lane(i)) {
        let candidate = hit.hit(i, geometry.id(), prim_id);
        match ray.intersection_filter(geometry, &candidate) {
            None => {
                ray.commit(&candidate);
                return true;
            }
            Some(true) => return true,
            Some(false) => valid &= !(1 << i),
        }
    }
    false
}

/// Tests whether any of `M` triangles of one primitive occludes `ray`.
///
/// Candidates are offered to the occlusion filter in lane order until one is
/// accepted.
pub fn occluded_triangles<V, R>(
    ray: &mut R,
    tri: &TriangleM<V>,
    geometry: &Geometry,
    prim_id: u32,
    remap: impl FnOnce(&mut V, &mut V),
) -> bool
where
    V: SimdFloat,
    R: HitTarget + ?Sized,
{
    let mut hit = pluecker(&ray.origin(), &ray.direction(), ray.tnear(), ray.tfar(), tri);
    if hit.valid == 0 {
        return false;
    }

    if !geometry.visible_to(ray.mask()) {
        return false;
    }

    remap(&mut hit.u, &mut hit.v);

    let mut valid = hit.valid;
    while valid != 0 {
        let i = valid.trailing_zeros() as usize;
        valid &= valid - 1;
        match ray.occlusion_filter(geometry, &hit.hit(i, geometry.id(), prim_id)) {
            None | Some(true) => return true,
            Some(false) => {}
        }
    }
    false
}

/// Geometric candidates of every active lane of `rays` against one triangle.
fn packet_candidates<const W: usize>(
    valid: LaneMask<W>,
    rays: &RayK<W>,
    geometry: &Geometry,
    triangle: [&Point3<f32>; 3],
    prim_id: u32,
) -> (LaneMask<W>, HitK<W>) {
    let [p0, p1, p2] = triangle;
    let mut hits = HitK::from_fn(|_| Hit::new(0.0, 0.0, 0.0, Vector3::zeros(), geometry.id(), prim_id));
    let mut mask = LaneMask::none();
    for k in valid {
        if !geometry.visible_to(rays.mask[k]) {
            continue;
        }
        let origin = Point3::from(rays.org.get(k));
        let direction = rays.dir.get(k);
        if let Some((u, v, t, ng)) = pluecker1(&origin, &direction, rays.tnear[k], rays.tfar[k], p0, p1, p2) {
            hits.set_lane(k, &Hit::new(u, v, t, ng, geometry.id(), prim_id));
            mask.set(k);
        }
    }
    (mask, hits)
}

/// Intersects the active lanes of a packet with one triangle.
///
/// Returns the lanes whose hit was accepted and committed.
pub fn intersect_packet_triangle<const W: usize>(
    valid: LaneMask<W>,
    rays: &mut RayK<W>,
    triangle: [&Point3<f32>; 3],
    geometry: &Geometry,
    prim_id: u32,
) -> LaneMask<W>
where
    FilterSet: PacketFilterSlot<W>,
{
    let (hit_mask, hits) = packet_candidates(valid, rays, geometry, triangle, prim_id);
    if hit_mask.is_empty() {
        return hit_mask;
    }
    if geometry.has_intersection_filter::<W>() {
        return run_intersection_filter(hit_mask, geometry, rays, &hits);
    }
    rays.store_hit(hit_mask, &hits);
    hit_mask
}

/// Tests the active lanes of a packet for occlusion by one triangle.
///
/// Returns the occluded lanes.
pub fn occluded_packet_triangle<const W: usize>(
    valid: LaneMask<W>,
    rays: &mut RayK<W>,
    triangle: [&Point3<f32>; 3],
    geometry: &Geometry,
    prim_id: u32,
) -> LaneMask<W>
where
    FilterSet: PacketFilterSlot<W>,
{
    let (hit_mask, hits) = packet_candidates(valid, rays, geometry, triangle, prim_id);
    if hit_mask.any() && geometry.has_occlusion_filter::<W>() {
        return run_occlusion_filter(hit_mask, geometry, rays, &hits);
    }
    hit_mask
}
