//! Thin lane abstraction over the `wide` float vectors used by the grid kernels.
//!
//! The triangle test is written once against [`SimdFloat`] and instantiated for
//! `f32x4` (one 2x3 strip, four triangles) and `f32x8` (one 3x3 block, eight
//! triangles).

use std::ops::{Add, BitAnd, BitXor, Div, Mul, Sub};

use nalgebra::{Point3, Vector3};
use wide::*;

/// The operations the intersection kernels need from a float vector.
pub trait SimdFloat:
    Copy
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + BitAnd<Output = Self>
    + BitXor<Output = Self>
{
    /// Number of lanes.
    const LANES: usize;

    fn splat(value: f32) -> Self;

    fn from_fn(f: impl FnMut(usize) -> f32) -> Self;

    fn lane(self, i: usize) -> f32;

    fn abs(self) -> Self;

    /// Lanes where `self >= rhs`, one bit per lane.
    fn ge_bits(self, rhs: Self) -> u32;

    /// Lanes where `self > rhs`, one bit per lane.
    fn gt_bits(self, rhs: Self) -> u32;
}

macro_rules! impl_simd_float {
    ($ty:ident, $lanes:literal) => {
        impl SimdFloat for $ty {
            const LANES: usize = $lanes;

            #[inline(always)]
            fn splat(value: f32) -> Self {
                $ty::splat(value)
            }

            #[inline(always)]
            fn from_fn(f: impl FnMut(usize) -> f32) -> Self {
                $ty::new(std::array::from_fn(f))
            }

            #[inline(always)]
            fn lane(self, i: usize) -> f32 {
                self.to_array()[i]
            }

            #[inline(always)]
            fn abs(self) -> Self {
                $ty::abs(self)
            }

            #[inline(always)]
            fn ge_bits(self, rhs: Self) -> u32 {
                self.cmp_ge(rhs).move_mask() as u32
            }

            #[inline(always)]
            fn gt_bits(self, rhs: Self) -> u32 {
                self.cmp_gt(rhs).move_mask() as u32
            }
        }
    };
}

impl_simd_float!(f32x4, 4);
impl_simd_float!(f32x8, 8);

/// A 3D vector with one `V` per coordinate.
#[derive(Debug, Clone, Copy)]
pub struct Vec3v<V> {
    pub x: V,
    pub y: V,
    pub z: V,
}

impl<V: SimdFloat> Vec3v<V> {
    #[inline(always)]
    pub fn new(x: V, y: V, z: V) -> Self {
        Vec3v { x, y, z }
    }

    /// Broadcasts a point into every lane.
    #[inline(always)]
    pub fn splat_point(p: &Point3<f32>) -> Self {
        Vec3v::new(V::splat(p.x), V::splat(p.y), V::splat(p.z))
    }

    /// Broadcasts a vector into every lane.
    #[inline(always)]
    pub fn splat_vector(d: &Vector3<f32>) -> Self {
        Vec3v::new(V::splat(d.x), V::splat(d.y), V::splat(d.z))
    }

    #[inline(always)]
    pub fn dot(self, rhs: Self) -> V {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    #[inline(always)]
    pub fn cross(self, rhs: Self) -> Self {
        Vec3v::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    /// Lane `i` as a [`Vector3`].
    #[inline(always)]
    pub fn lane(&self, i: usize) -> Vector3<f32> {
        Vector3::new(self.x.lane(i), self.y.lane(i), self.z.lane(i))
    }
}

impl<V: SimdFloat> Add for Vec3v<V> {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Vec3v::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl<V: SimdFloat> Sub for Vec3v<V> {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Vec3v::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[cfg(test)]
mod tests {
    use crate::simd::{SimdFloat, Vec3v};
    use nalgebra::Vector3;
    use wide::{f32x4, f32x8};

    #[test]
    fn compare_bits_follow_lane_order() {
        let a = <f32x4 as SimdFloat>::from_fn(|i| i as f32);
        let b = <f32x4 as SimdFloat>::splat(2.0);
        assert_eq!(a.ge_bits(b), 0b1100);
        assert_eq!(a.gt_bits(b), 0b1000);
    }

    #[test]
    fn sign_bit_xor_flips() {
        let x = <f32x4 as SimdFloat>::from_fn(|i| i as f32 + 1.0);
        let sign = <f32x4 as SimdFloat>::splat(-0.0);
        let flipped = x ^ sign;
        assert_eq!(SimdFloat::lane(flipped, 2), -3.0);
        assert_eq!(SimdFloat::lane(flipped & sign, 0).to_bits(), (-0.0f32).to_bits());
        assert_eq!(SimdFloat::lane(SimdFloat::abs(flipped), 3), 4.0);
    }

    #[test]
    fn cross_matches_nalgebra() {
        let a = Vector3::new(1.0, 2.0, 3.0);
        let b = Vector3::new(-4.0, 0.5, 2.0);
        let va = Vec3v::<f32x8>::splat_vector(&a);
        let vb = Vec3v::<f32x8>::splat_vector(&b);
        assert_eq!(va.cross(vb).lane(5), a.cross(&b));
        assert_eq!(SimdFloat::lane(va.dot(vb), 0), a.dot(&b));
    }
}
