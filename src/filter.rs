//! The filter invocation protocol.
//!
//! Every candidate hit that passed a geometric test is routed through one of the
//! functions below before it may update a ray. The sequence is always the same:
//!
//! 1. snapshot the hit fields the ray holds now,
//! 2. write the candidate into the ray,
//! 3. run the user callback of the geometry,
//! 4. lanes whose `geom_id` now equals [`INVALID_ID`] were rejected and get their
//!    snapshot back; the other lanes keep the candidate.
//!
//! A callback that does not touch `geom_id` accepts the hit. If the geometry has no
//! callback for the requested width, nothing is invoked and the candidate is
//! accepted; callers normally check `has_*_filter*` first and commit directly.
//!
//! Occlusion variants expose the full candidate to the callback, but afterwards only
//! `tfar` and `geom_id` may differ from the state before the call: `u`, `v`, `ng`
//! and `prim_id` are put back on every active lane.

use crate::mask::LaneMask;
use crate::ray::{store_masked, Hit, HitK, Ray, RayK, Vec3K};
use crate::scene::{FilterSet, Geometry, PacketFilterSlot};
use crate::INVALID_ID;

/// Saved hit fields of a packet, restored lane-wise on rejection.
struct HitSnapshot<const W: usize> {
    u: [f32; W],
    v: [f32; W],
    tfar: [f32; W],
    ng: Vec3K<W>,
    geom_id: [u32; W],
    prim_id: [u32; W],
}

impl<const W: usize> HitSnapshot<W> {
    #[inline(always)]
    fn take(ray: &RayK<W>) -> Self {
        HitSnapshot {
            u: ray.u,
            v: ray.v,
            tfar: ray.tfar,
            ng: ray.ng,
            geom_id: ray.geom_id,
            prim_id: ray.prim_id,
        }
    }

    /// Puts back every hit field on the lanes in `mask`.
    #[inline(always)]
    fn restore(&self, mask: LaneMask<W>, ray: &mut RayK<W>) {
        self.restore_attributes(mask, ray);
        self.restore_distance(mask, ray);
    }

    /// Puts back `u`, `v`, `ng` and `prim_id`.
    #[inline(always)]
    fn restore_attributes(&self, mask: LaneMask<W>, ray: &mut RayK<W>) {
        store_masked(mask, &mut ray.u, &self.u);
        store_masked(mask, &mut ray.v, &self.v);
        ray.ng.store_masked(mask, &self.ng);
        store_masked(mask, &mut ray.prim_id, &self.prim_id);
    }

    /// Puts back `tfar` and `geom_id`.
    #[inline(always)]
    fn restore_distance(&self, mask: LaneMask<W>, ray: &mut RayK<W>) {
        store_masked(mask, &mut ray.tfar, &self.tfar);
        store_masked(mask, &mut ray.geom_id, &self.geom_id);
    }
}

/// The lanes of `valid` the callback left with a valid `geom_id`.
#[inline(always)]
fn accepted_lanes<const W: usize>(valid: LaneMask<W>, ray: &RayK<W>) -> LaneMask<W> {
    valid & LaneMask::from_fn(|k| ray.geom_id[k] != INVALID_ID)
}

/// Runs the single-ray intersection filter of `geometry` on `hit`.
///
/// Returns true if the hit was accepted; it is then committed to `ray`. On rejection
/// `ray` is left exactly as it was before the call.
///
/// # Examples
/// ```
/// use tessgrid::filter::run_intersection_filter1;
/// use tessgrid::ray::{Hit, Ray};
/// use tessgrid::scene::Geometry;
/// use tessgrid::INVALID_ID;
/// use nalgebra::{Point3, Vector3};
///
/// let mut geometry = Geometry::new();
/// geometry.set_intersection_filter1(|ray| {
///     if ray.u > 0.5 {
///         ray.geom_id = INVALID_ID;
///     }
/// });
///
/// let mut ray = Ray::new(Point3::origin(), Vector3::z());
/// let before = ray;
/// let rejected = Hit::new(0.9, 0.0, 2.0, Vector3::z(), 0, 0);
/// assert!(!run_intersection_filter1(&geometry, &mut ray, &rejected));
/// assert_eq!(ray, before);
///
/// let accepted = Hit::new(0.1, 0.0, 2.0, Vector3::z(), 0, 0);
/// assert!(run_intersection_filter1(&geometry, &mut ray, &accepted));
/// assert_eq!(ray.tfar, 2.0);
/// ```
pub fn run_intersection_filter1(geometry: &Geometry, ray: &mut Ray, hit: &Hit) -> bool {
    let saved = ray.hit_fields();
    ray.commit(hit);

    if let Some(filter) = geometry.intersection_filters().single() {
        filter(ray);
    }

    if ray.geom_id == INVALID_ID {
        ray.commit(&saved);
        return false;
    }
    true
}

/// Runs the single-ray occlusion filter of `geometry` on `hit`.
///
/// Returns true if the hit was accepted. Only `tfar` and `geom_id` of `ray` can
/// change, and only on acceptance.
pub fn run_occlusion_filter1(geometry: &Geometry, ray: &mut Ray, hit: &Hit) -> bool {
    let saved = ray.hit_fields();
    ray.commit(hit);

    if let Some(filter) = geometry.occlusion_filters().single() {
        filter(ray);
    }

    let passed = ray.geom_id != INVALID_ID;
    ray.u = saved.u;
    ray.v = saved.v;
    ray.ng = saved.ng;
    ray.prim_id = saved.prim_id;
    if !passed {
        ray.tfar = saved.t;
        ray.geom_id = saved.geom_id;
    }
    passed
}

/// Runs the width-`W` intersection filter of `geometry` on the lanes in `valid`.
///
/// The candidates of `hit` are written into the active lanes of `ray`. Lanes rejected
/// by the callback get their previous hit fields back; the returned mask holds the
/// lanes whose candidate was accepted and committed. Inactive lanes are never written.
pub fn run_intersection_filter<const W: usize>(
    valid: LaneMask<W>,
    geometry: &Geometry,
    ray: &mut RayK<W>,
    hit: &HitK<W>,
) -> LaneMask<W>
where
    FilterSet: PacketFilterSlot<W>,
{
    let saved = HitSnapshot::take(ray);
    ray.store_hit(valid, hit);

    if let Some(filter) = PacketFilterSlot::<W>::packet(geometry.intersection_filters()) {
        filter.invoke(valid, ray);
    }

    // Rejected lanes and anything the callback wrote outside `valid` roll back.
    let passed = accepted_lanes(valid, ray);
    saved.restore(!passed, ray);
    passed
}

/// Runs the width-`W` occlusion filter of `geometry` on the lanes in `valid`.
///
/// Returns the lanes whose candidate was accepted. Only `tfar` and `geom_id` of the
/// accepted lanes change.
pub fn run_occlusion_filter<const W: usize>(
    valid: LaneMask<W>,
    geometry: &Geometry,
    ray: &mut RayK<W>,
    hit: &HitK<W>,
) -> LaneMask<W>
where
    FilterSet: PacketFilterSlot<W>,
{
    let saved = HitSnapshot::take(ray);
    ray.store_hit(valid, hit);

    if let Some(filter) = PacketFilterSlot::<W>::packet(geometry.occlusion_filters()) {
        filter.invoke(valid, ray);
    }

    let passed = accepted_lanes(valid, ray);
    saved.restore_attributes(LaneMask::all(), ray);
    saved.restore_distance(!passed, ray);
    passed
}

/// Runs the width-`W` intersection filter of `geometry` for lane `k` alone.
///
/// Behaves like [`run_intersection_filter`] with `valid = {k}` and a candidate
/// present only in lane `k`.
pub fn run_intersection_filter_lane<const W: usize>(
    geometry: &Geometry,
    ray: &mut RayK<W>,
    k: usize,
    hit: &Hit,
) -> bool
where
    FilterSet: PacketFilterSlot<W>,
{
    let saved = HitSnapshot::take(ray);
    ray.set_hit_lane(k, hit);

    let lane = LaneMask::single(k);
    if let Some(filter) = PacketFilterSlot::<W>::packet(geometry.intersection_filters()) {
        filter.invoke(lane, ray);
    }

    let passed = accepted_lanes(lane, ray);
    saved.restore(!passed, ray);
    passed.test(k)
}

/// Runs the width-`W` occlusion filter of `geometry` for lane `k` alone.
pub fn run_occlusion_filter_lane<const W: usize>(
    geometry: &Geometry,
    ray: &mut RayK<W>,
    k: usize,
    hit: &Hit,
) -> bool
where
    FilterSet: PacketFilterSlot<W>,
{
    let saved = HitSnapshot::take(ray);
    ray.set_hit_lane(k, hit);

    let lane = LaneMask::single(k);
    if let Some(filter) = PacketFilterSlot::<W>::packet(geometry.occlusion_filters()) {
        filter.invoke(lane, ray);
    }

    let passed = accepted_lanes(lane, ray);
    saved.restore_attributes(LaneMask::all(), ray);
    saved.restore_distance(!passed, ray);
    passed.test(k)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
    use std::sync::Arc;

    use nalgebra::{Point3, Vector3};
    use proptest::prelude::*;

    use crate::filter::*;
    use crate::mask::LaneMask;
    use crate::ray::{Hit, HitK, Ray, Ray16, Ray4, Ray8, RayK};
    use crate::scene::{Geometry, PacketFilter};
    use crate::testbase::{bit_equal, candidate_hits, reject_lanes_filter, seeded_packet};
    use crate::INVALID_ID;

    fn candidate() -> Hit {
        Hit::new(0.25, 0.5, 3.0, Vector3::new(0.0, 0.0, -2.0), 4, 11)
    }

    fn ray_with_previous_hit() -> Ray {
        let mut ray = Ray::new(Point3::origin(), Vector3::z());
        ray.commit(&Hit::new(0.75, 0.125, 8.0, Vector3::x(), 1, 2));
        ray
    }

    #[test]
    fn single_rejection_restores_everything() {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter1(|ray| {
            // Scribble over the hit before rejecting it.
            ray.u = -1.0;
            ray.ng = Vector3::y();
            ray.geom_id = INVALID_ID;
        });
        let mut ray = ray_with_previous_hit();
        let before = ray;
        assert!(!run_intersection_filter1(&geometry, &mut ray, &candidate()));
        assert!(bit_equal(&ray, &before));
    }

    #[test]
    fn single_acceptance_commits_candidate() {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter1(|_| {});
        let mut ray = ray_with_previous_hit();
        assert!(run_intersection_filter1(&geometry, &mut ray, &candidate()));
        assert_eq!(ray.hit(), Some(candidate()));
    }

    #[test]
    fn single_filter_may_modify_the_hit() {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter1(|ray| ray.u = 0.0);
        let mut ray = ray_with_previous_hit();
        assert!(run_intersection_filter1(&geometry, &mut ray, &candidate()));
        assert_eq!(ray.u, 0.0);
        assert_eq!(ray.tfar, 3.0);
    }

    #[test]
    fn missing_callback_accepts() {
        let geometry = Geometry::new();
        let mut ray = ray_with_previous_hit();
        assert!(run_intersection_filter1(&geometry, &mut ray, &candidate()));
        assert_eq!(ray.prim_id, 11);
    }

    #[test]
    fn single_occlusion_only_changes_tfar_and_geom_id() {
        let seen_prim = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&seen_prim);
        let mut geometry = Geometry::new();
        geometry.set_occlusion_filter1(move |ray| {
            seen.store(ray.prim_id as usize, Ordering::SeqCst);
        });
        let mut ray = ray_with_previous_hit();
        let before = ray;
        assert!(run_occlusion_filter1(&geometry, &mut ray, &candidate()));
        // The callback saw the candidate.
        assert_eq!(seen_prim.load(Ordering::SeqCst), 11);
        assert_eq!(ray.tfar, 3.0);
        assert_eq!(ray.geom_id, 4);
        assert_eq!((ray.u, ray.v, ray.ng, ray.prim_id), (before.u, before.v, before.ng, before.prim_id));
    }

    #[test]
    fn single_occlusion_rejection_restores() {
        let mut geometry = Geometry::new();
        geometry.set_occlusion_filter1(|ray| ray.geom_id = INVALID_ID);
        let mut ray = ray_with_previous_hit();
        let before = ray;
        assert!(!run_occlusion_filter1(&geometry, &mut ray, &candidate()));
        assert!(bit_equal(&ray, &before));
    }

    #[test]
    /// Width 4, mask {0, 2}: lane 0 is closer but rejected, lane 2 accepted.
    fn packet4_scenario_reject_lane0_accept_lane2() {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<4>(reject_lanes_filter(0b0001));
        let mut rays = seeded_packet::<4>(7);
        rays.tfar = [10.0; 4];
        let before = rays;
        let mut hits = candidate_hits::<4>(9);
        hits.t = [1.0, 2.0, 3.0, 4.0];

        let valid = LaneMask::from_bits(0b0101);
        let passed = run_intersection_filter(valid, &geometry, &mut rays, &hits);

        assert_eq!(passed, LaneMask::single(2));
        for k in [0, 1, 3] {
            assert_eq!(rays.lane(k), before.lane(k), "lane {k} changed");
        }
        assert_eq!(rays.hit_lane(2), hits.lane(2));
    }

    #[test]
    fn legacy_convention_narrowing_does_not_leak() {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<8>(PacketFilter::legacy(|valid, _rays| {
            *valid = LaneMask::none();
        }));
        let mut rays = seeded_packet::<8>(3);
        let hits = candidate_hits::<8>(5);
        let valid = LaneMask::from_bits(0b1100_0011);
        let passed = run_intersection_filter(valid, &geometry, &mut rays, &hits);
        assert_eq!(passed, valid);
    }

    #[test]
    fn native_convention_sees_active_mask() {
        let seen = Arc::new(AtomicU16::new(0));
        let seen_in_filter = Arc::clone(&seen);
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<16>(PacketFilter::native(move |valid, _rays| {
            seen_in_filter.store(valid.bits(), Ordering::SeqCst);
        }));
        let mut rays = Ray16::default();
        let hits = candidate_hits::<16>(1);
        let valid = LaneMask::from_bits(0x8421);
        run_intersection_filter(valid, &geometry, &mut rays, &hits);
        assert_eq!(seen.load(Ordering::SeqCst), 0x8421);
    }

    #[test]
    fn packet_occlusion_never_writes_attributes() {
        let mut geometry = Geometry::new();
        geometry.set_occlusion_filter::<8>(reject_lanes_filter(0b0000_0010));
        let mut rays = seeded_packet::<8>(12);
        let before = rays;
        let hits = candidate_hits::<8>(13);
        let valid = LaneMask::from_bits(0b0000_0111);
        let passed = run_occlusion_filter(valid, &geometry, &mut rays, &hits);

        assert_eq!(passed, LaneMask::from_bits(0b0000_0101));
        assert!(bit_equal(&rays.u, &before.u));
        assert!(bit_equal(&rays.v, &before.v));
        assert!(bit_equal(&rays.ng, &before.ng));
        assert!(bit_equal(&rays.prim_id, &before.prim_id));
        for k in passed {
            assert_eq!(rays.tfar[k], hits.t[k]);
            assert_eq!(rays.geom_id[k], hits.geom_id[k]);
        }
        assert_eq!(rays.lane(1), before.lane(1));
    }

    #[test]
    fn lane_occlusion_never_writes_attributes() {
        let mut geometry = Geometry::new();
        geometry.set_occlusion_filter::<4>(PacketFilter::native(|_, _| {}));
        let mut rays = seeded_packet::<4>(21);
        let before = rays;
        let hit = candidate();
        assert!(run_occlusion_filter_lane(&geometry, &mut rays, 3, &hit));
        assert_eq!(rays.tfar[3], hit.t);
        assert_eq!(rays.geom_id[3], hit.geom_id);
        assert!(bit_equal(&rays.u, &before.u));
        assert!(bit_equal(&rays.ng, &before.ng));
        assert!(bit_equal(&rays.prim_id, &before.prim_id));
    }

    fn lane_matches_batch<const W: usize>(seed: u64, k: usize, reject: u16)
    where
        FilterSet: PacketFilterSlot<W>,
    {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<W>(reject_lanes_filter(reject));
        geometry.set_occlusion_filter::<W>(reject_lanes_filter(reject));

        let rays = seeded_packet::<W>(seed);
        let hits = candidate_hits::<W>(seed.wrapping_add(1));
        let hit = hits.lane(k);

        let mut batch = rays;
        let batch_passed = run_intersection_filter(LaneMask::single(k), &geometry, &mut batch, &hits);
        let mut lane = rays;
        let lane_passed = run_intersection_filter_lane(&geometry, &mut lane, k, &hit);
        assert_eq!(batch_passed.test(k), lane_passed);
        assert!(bit_equal(&batch, &lane));

        let mut batch = rays;
        let batch_passed = run_occlusion_filter(LaneMask::single(k), &geometry, &mut batch, &hits);
        let mut lane = rays;
        let lane_passed = run_occlusion_filter_lane(&geometry, &mut lane, k, &hit);
        assert_eq!(batch_passed.test(k), lane_passed);
        assert!(bit_equal(&batch, &lane));
    }

    fn rejected_lanes_unchanged<const W: usize>(seed: u64, valid: u16, reject: u16)
    where
        FilterSet: PacketFilterSlot<W>,
    {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<W>(reject_lanes_filter(reject));
        let mut rays: RayK<W> = seeded_packet(seed);
        let before = rays;
        let hits: HitK<W> = candidate_hits(seed ^ 0xabcd);
        let valid = LaneMask::<W>::from_bits(valid);
        let passed = run_intersection_filter(valid, &geometry, &mut rays, &hits);

        assert_eq!(passed, valid & !LaneMask::from_bits(reject));
        for k in 0..W {
            if passed.test(k) {
                assert_eq!(rays.hit_lane(k), hits.lane(k));
            } else {
                assert!(bit_equal(&rays.lane(k), &before.lane(k)), "lane {k} changed");
            }
        }
    }

    proptest! {
        // Single-lane invocation equals the batch invocation with a one-lane mask.
        #[test]
        fn test_lane_variant_matches_batch(seed: u64, k in 0usize..16, reject: u16) {
            lane_matches_batch::<4>(seed, k % 4, reject);
            lane_matches_batch::<8>(seed, k % 8, reject);
            lane_matches_batch::<16>(seed, k, reject);
        }

        // Rejected and inactive lanes keep their state bit for bit, accepted lanes
        // hold exactly the candidate.
        #[test]
        fn test_batch_commit_and_rollback(seed: u64, valid: u16, reject: u16) {
            rejected_lanes_unchanged::<4>(seed, valid, reject);
            rejected_lanes_unchanged::<8>(seed, valid, reject);
            rejected_lanes_unchanged::<16>(seed, valid, reject);
        }
    }

    #[test]
    fn packet_without_callback_accepts_all_active() {
        let geometry = Geometry::new();
        let mut rays = Ray4::default();
        let hits = candidate_hits::<4>(2);
        let valid = LaneMask::from_bits(0b0110);
        assert_eq!(run_intersection_filter(valid, &geometry, &mut rays, &hits), valid);
        assert_eq!(rays.hit_mask(), valid);
    }

    /// A callback that ignores the mask and writes to every lane of the packet.
    fn scribble_everywhere<const W: usize>() -> PacketFilter<W> {
        PacketFilter::native(|_valid, rays| {
            for k in 0..W {
                rays.u[k] = -1.0;
                rays.ng.set(k, &Vector3::y());
                if rays.tfar[k] > 5.0 {
                    rays.geom_id[k] = INVALID_ID;
                }
            }
        })
    }

    fn writes_outside_mask_roll_back<const W: usize>(seed: u64, valid: u16)
    where
        FilterSet: PacketFilterSlot<W>,
    {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<W>(scribble_everywhere());
        geometry.set_occlusion_filter::<W>(scribble_everywhere());
        let mut rays: RayK<W> = seeded_packet(seed);
        rays.tfar = [8.0; W];
        let mut hits: HitK<W> = candidate_hits(seed.wrapping_add(1));
        hits.t = [2.0; W];
        let valid = LaneMask::<W>::from_bits(valid);

        let mut batch = rays;
        let passed = run_intersection_filter(valid, &geometry, &mut batch, &hits);
        assert_eq!(passed, valid);
        let mut batch_occluded = rays;
        assert_eq!(run_occlusion_filter(valid, &geometry, &mut batch_occluded, &hits), valid);
        for k in !valid {
            assert!(bit_equal(&batch.lane(k), &rays.lane(k)), "lane {k} changed");
            assert!(bit_equal(&batch_occluded.lane(k), &rays.lane(k)), "lane {k} changed");
        }

        for k in valid {
            let mut lane = rays;
            assert!(run_intersection_filter_lane(&geometry, &mut lane, k, &hits.lane(k)));
            let mut lane_occluded = rays;
            assert!(run_occlusion_filter_lane(&geometry, &mut lane_occluded, k, &hits.lane(k)));
            for other in (0..W).filter(|&other| other != k) {
                assert!(bit_equal(&lane.lane(other), &rays.lane(other)), "lane {other} changed");
                assert!(bit_equal(&lane_occluded.lane(other), &rays.lane(other)));
            }
        }
    }

    #[test]
    fn writes_to_inactive_lanes_are_rolled_back() {
        writes_outside_mask_roll_back::<4>(31, 0b0001);
        writes_outside_mask_roll_back::<8>(32, 0b1010_0101);
        writes_outside_mask_roll_back::<16>(33, 0x00f0);
    }

    #[test]
    fn lane_rejection_restores_lane() {
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<8>(reject_lanes_filter(0xff));
        let mut rays = Ray8::default();
        let before = rays;
        assert!(!run_intersection_filter_lane(&geometry, &mut rays, 4, &candidate()));
        assert!(bit_equal(&rays, &before));
    }
}
