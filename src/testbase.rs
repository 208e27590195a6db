//! Common utilities shared by unit tests.
#![cfg(test)]

use nalgebra::{Point3, Vector3};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mask::LaneMask;
use crate::ray::{Hit, HitK, Ray, RayK, Vec3K};
use crate::scene::PacketFilter;
use crate::INVALID_ID;

/// A vector represented as a tuple
pub type TupleVec = (f32, f32, f32);

/// Generate a `TupleVec` for [`proptest::strategy::Strategy`] from -10e10 to 10e10
/// A small enough range to prevent most fp32 errors from breaking certain tests
pub fn tuplevec_small_strategy() -> impl Strategy<Value = TupleVec> {
    (
        -10e10_f32..10e10_f32,
        -10e10_f32..10e10_f32,
        -10e10_f32..10e10_f32,
    )
}

/// Convert a `TupleVec` to a [`Point3`].
pub fn tuple_to_point(tpl: &TupleVec) -> Point3<f32> {
    Point3::new(tpl.0, tpl.1, tpl.2)
}

/// Convert a `TupleVec` to a [`Vector3`].
pub fn tuple_to_vector(tpl: &TupleVec) -> Vector3<f32> {
    Vector3::new(tpl.0, tpl.1, tpl.2)
}

/// Raw bit patterns of every scalar in a ray record, in field order.
pub trait BitPattern {
    fn push_bits(&self, out: &mut Vec<u32>);
}

impl BitPattern for f32 {
    fn push_bits(&self, out: &mut Vec<u32>) {
        out.push(self.to_bits());
    }
}

impl BitPattern for u32 {
    fn push_bits(&self, out: &mut Vec<u32>) {
        out.push(*self);
    }
}

impl<T: BitPattern, const N: usize> BitPattern for [T; N] {
    fn push_bits(&self, out: &mut Vec<u32>) {
        self.iter().for_each(|x| x.push_bits(out));
    }
}

impl BitPattern for Vector3<f32> {
    fn push_bits(&self, out: &mut Vec<u32>) {
        self.iter().for_each(|x| x.push_bits(out));
    }
}

impl<const W: usize> BitPattern for Vec3K<W> {
    fn push_bits(&self, out: &mut Vec<u32>) {
        [self.x, self.y, self.z].push_bits(out);
    }
}

impl BitPattern for Ray {
    fn push_bits(&self, out: &mut Vec<u32>) {
        self.origin.coords.push_bits(out);
        self.direction.push_bits(out);
        [self.tnear, self.tfar, self.u, self.v].push_bits(out);
        self.ng.push_bits(out);
        [self.mask, self.geom_id, self.prim_id].push_bits(out);
    }
}

impl<const W: usize> BitPattern for RayK<W> {
    fn push_bits(&self, out: &mut Vec<u32>) {
        self.org.push_bits(out);
        self.dir.push_bits(out);
        [self.tnear, self.tfar, self.u, self.v].push_bits(out);
        self.ng.push_bits(out);
        [self.mask, self.geom_id, self.prim_id].push_bits(out);
    }
}

/// Returns true if `a` and `b` hold the same bits, telling apart `-0.0` from `0.0`
/// and NaNs with different payloads.
pub fn bit_equal<T: BitPattern>(a: &T, b: &T) -> bool {
    let (mut bits_a, mut bits_b) = (Vec::new(), Vec::new());
    a.push_bits(&mut bits_a);
    b.push_bits(&mut bits_b);
    bits_a == bits_b
}

fn random_vector(rng: &mut StdRng, range: f32) -> Vector3<f32> {
    Vector3::new(
        rng.random_range(-range..range),
        rng.random_range(-range..range),
        rng.random_range(-range..range),
    )
}

fn random_hit(rng: &mut StdRng) -> Hit {
    Hit::new(
        rng.random_range(0.0..1.0),
        rng.random_range(0.0..1.0),
        rng.random_range(0.1..100.0),
        random_vector(rng, 1.0),
        rng.random_range(0..8),
        rng.random_range(0..1000),
    )
}

/// A deterministic packet of `W` random rays. About half of the lanes already hold
/// a hit.
pub fn seeded_packet<const W: usize>(seed: u64) -> RayK<W> {
    let mut rng = StdRng::seed_from_u64(seed);
    RayK::from_fn(|_| {
        let origin = Point3::from(random_vector(&mut rng, 10.0));
        let mut ray = Ray::new(origin, random_vector(&mut rng, 1.0)).with_mask(rng.random());
        if rng.random_bool(0.5) {
            ray.commit(&random_hit(&mut rng));
        }
        ray
    })
}

/// Deterministic random candidates for every lane, all with a valid geometry id.
pub fn candidate_hits<const W: usize>(seed: u64) -> HitK<W> {
    let mut rng = StdRng::seed_from_u64(seed);
    HitK::from_fn(|_| random_hit(&mut rng))
}

/// A native packet filter rejecting the active lanes whose bit is set in `reject`.
pub fn reject_lanes_filter<const W: usize>(reject: u16) -> PacketFilter<W> {
    PacketFilter::native(move |valid, rays| {
        for k in valid & LaneMask::from_bits(reject) {
            rays.geom_id[k] = INVALID_ID;
        }
    })
}

#[cfg(test)]
mod tests {
    use nalgebra::{Point3, Vector3};

    use crate::ray::Ray;
    use crate::testbase::bit_equal;

    #[test]
    fn bit_equal_tells_nan_payloads_apart() {
        let quiet = f32::from_bits(0x7fc0_0000);
        let payload = f32::from_bits(0x7fc0_0001);
        assert!(bit_equal(&quiet, &quiet));
        assert!(!bit_equal(&quiet, &payload));
        assert!(!bit_equal(&0.0f32, &-0.0f32));

        let ray = Ray::new(Point3::origin(), Vector3::z());
        let mut other = ray;
        other.u = payload;
        let mut same = ray;
        same.u = payload;
        assert!(bit_equal(&other, &same));
        assert!(!bit_equal(&ray, &other));
    }
}
