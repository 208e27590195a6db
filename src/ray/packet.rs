//! Structure-of-arrays ray packets of width 4, 8 and 16.

use nalgebra::{Point3, Vector3};

use super::{Hit, Ray};
use crate::mask::LaneMask;
use crate::INVALID_ID;

/// Copies `src[k]` into `dst[k]` for every lane `k` active in `mask`.
#[inline(always)]
pub fn store_masked<T: Copy, const W: usize>(mask: LaneMask<W>, dst: &mut [T; W], src: &[T; W]) {
    for k in mask {
        dst[k] = src[k];
    }
}

/// Three per-lane coordinate arrays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3K<const W: usize> {
    pub x: [f32; W],
    pub y: [f32; W],
    pub z: [f32; W],
}

impl<const W: usize> Vec3K<W> {
    /// All lanes set to `(x, y, z)`.
    pub fn splat(x: f32, y: f32, z: f32) -> Self {
        Vec3K {
            x: [x; W],
            y: [y; W],
            z: [z; W],
        }
    }

    /// Lane `k` as a vector.
    pub fn get(&self, k: usize) -> Vector3<f32> {
        Vector3::new(self.x[k], self.y[k], self.z[k])
    }

    /// Writes lane `k`.
    pub fn set(&mut self, k: usize, value: &Vector3<f32>) {
        self.x[k] = value.x;
        self.y[k] = value.y;
        self.z[k] = value.z;
    }

    /// Copies the lanes of `src` that are active in `mask`.
    pub fn store_masked(&mut self, mask: LaneMask<W>, src: &Self) {
        store_masked(mask, &mut self.x, &src.x);
        store_masked(mask, &mut self.y, &src.y);
        store_masked(mask, &mut self.z, &src.z);
    }
}

/// A packet of `W` rays laid out as one array per attribute.
///
/// # Examples
/// ```
/// use tessgrid::ray::{Ray, Ray4};
/// use nalgebra::{Point3, Vector3};
///
/// let packet = Ray4::from_fn(|k| {
///     Ray::new(Point3::new(k as f32, 0.0, 0.0), Vector3::new(0.0, 0.0, 1.0))
/// });
/// assert_eq!(packet.lane(2).origin, Point3::new(2.0, 0.0, 0.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayK<const W: usize> {
    /// Ray origins.
    pub org: Vec3K<W>,
    /// Ray directions.
    pub dir: Vec3K<W>,
    /// Start of the valid distance range per lane.
    pub tnear: [f32; W],
    /// End of the valid distance range per lane.
    pub tfar: [f32; W],
    /// Visibility masks.
    pub mask: [u32; W],
    /// Hit `u` coordinates.
    pub u: [f32; W],
    /// Hit `v` coordinates.
    pub v: [f32; W],
    /// Unnormalized geometric normals.
    pub ng: Vec3K<W>,
    /// Hit geometry ids.
    pub geom_id: [u32; W],
    /// Hit primitive ids.
    pub prim_id: [u32; W],
}

/// A packet of 4 rays.
pub type Ray4 = RayK<4>;
/// A packet of 8 rays.
pub type Ray8 = RayK<8>;
/// A packet of 16 rays.
pub type Ray16 = RayK<16>;

impl<const W: usize> Default for RayK<W> {
    fn default() -> Self {
        RayK {
            org: Vec3K::splat(0.0, 0.0, 0.0),
            dir: Vec3K::splat(0.0, 0.0, 0.0),
            tnear: [0.0; W],
            tfar: [f32::INFINITY; W],
            mask: [u32::MAX; W],
            u: [0.0; W],
            v: [0.0; W],
            ng: Vec3K::splat(0.0, 0.0, 0.0),
            geom_id: [INVALID_ID; W],
            prim_id: [INVALID_ID; W],
        }
    }
}

impl<const W: usize> RayK<W> {
    /// Builds a packet from one [`Ray`] per lane.
    pub fn from_fn(mut f: impl FnMut(usize) -> Ray) -> Self {
        let mut packet = Self::default();
        for k in 0..W {
            packet.set_lane(k, &f(k));
        }
        packet
    }

    /// Extracts lane `k` as a single [`Ray`].
    pub fn lane(&self, k: usize) -> Ray {
        Ray {
            origin: Point3::from(self.org.get(k)),
            direction: self.dir.get(k),
            tnear: self.tnear[k],
            tfar: self.tfar[k],
            mask: self.mask[k],
            u: self.u[k],
            v: self.v[k],
            ng: self.ng.get(k),
            geom_id: self.geom_id[k],
            prim_id: self.prim_id[k],
        }
    }

    /// Overwrites lane `k` with `ray`.
    pub fn set_lane(&mut self, k: usize, ray: &Ray) {
        self.org.set(k, &ray.origin.coords);
        self.dir.set(k, &ray.direction);
        self.tnear[k] = ray.tnear;
        self.mask[k] = ray.mask;
        self.set_hit_lane(k, &ray.hit_fields());
    }

    /// The hit fields of lane `k`; `t` carries the lane's `tfar`.
    pub fn hit_lane(&self, k: usize) -> Hit {
        Hit::new(
            self.u[k],
            self.v[k],
            self.tfar[k],
            self.ng.get(k),
            self.geom_id[k],
            self.prim_id[k],
        )
    }

    /// Overwrites the hit fields of lane `k`.
    #[inline]
    pub(crate) fn set_hit_lane(&mut self, k: usize, hit: &Hit) {
        self.u[k] = hit.u;
        self.v[k] = hit.v;
        self.tfar[k] = hit.t;
        self.ng.set(k, &hit.ng);
        self.geom_id[k] = hit.geom_id;
        self.prim_id[k] = hit.prim_id;
    }

    /// Lanes with a committed hit.
    pub fn hit_mask(&self) -> LaneMask<W> {
        LaneMask::from_fn(|k| self.geom_id[k] != INVALID_ID)
    }

    /// Writes the lanes of `hit` active in `mask` into the hit fields.
    #[inline]
    pub(crate) fn store_hit(&mut self, mask: LaneMask<W>, hit: &HitK<W>) {
        store_masked(mask, &mut self.u, &hit.u);
        store_masked(mask, &mut self.v, &hit.v);
        store_masked(mask, &mut self.tfar, &hit.t);
        self.ng.store_masked(mask, &hit.ng);
        store_masked(mask, &mut self.geom_id, &hit.geom_id);
        store_masked(mask, &mut self.prim_id, &hit.prim_id);
    }
}

/// Per-lane hit candidates for a [`RayK`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitK<const W: usize> {
    pub u: [f32; W],
    pub v: [f32; W],
    pub t: [f32; W],
    pub ng: Vec3K<W>,
    pub geom_id: [u32; W],
    pub prim_id: [u32; W],
}

impl<const W: usize> HitK<W> {
    /// Every lane set to `hit`.
    pub fn splat(hit: &Hit) -> Self {
        HitK {
            u: [hit.u; W],
            v: [hit.v; W],
            t: [hit.t; W],
            ng: Vec3K::splat(hit.ng.x, hit.ng.y, hit.ng.z),
            geom_id: [hit.geom_id; W],
            prim_id: [hit.prim_id; W],
        }
    }

    /// Builds the candidates lane by lane.
    pub fn from_fn(mut f: impl FnMut(usize) -> Hit) -> Self {
        let mut hits = Self::splat(&Hit::new(
            0.0,
            0.0,
            f32::INFINITY,
            Vector3::zeros(),
            INVALID_ID,
            INVALID_ID,
        ));
        for k in 0..W {
            hits.set_lane(k, &f(k));
        }
        hits
    }

    /// Lane `k` as a [`Hit`].
    pub fn lane(&self, k: usize) -> Hit {
        Hit::new(
            self.u[k],
            self.v[k],
            self.t[k],
            self.ng.get(k),
            self.geom_id[k],
            self.prim_id[k],
        )
    }

    /// Overwrites lane `k`.
    pub fn set_lane(&mut self, k: usize, hit: &Hit) {
        self.u[k] = hit.u;
        self.v[k] = hit.v;
        self.t[k] = hit.t;
        self.ng.set(k, &hit.ng);
        self.geom_id[k] = hit.geom_id;
        self.prim_id[k] = hit.prim_id;
    }
}
