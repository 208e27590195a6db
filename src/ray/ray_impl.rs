//! This module defines the single [`Ray`] record and the [`Hit`] candidate tuple.

use nalgebra::{Point3, Vector3};

use crate::INVALID_ID;

/// A ray together with the nearest hit accepted so far.
///
/// The hit fields (`tfar`, `u`, `v`, `ng`, `geom_id`, `prim_id`) are only ever written
/// through the filter protocol or a hit commit; a rejected candidate leaves them
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ray {
    /// The ray origin.
    pub origin: Point3<f32>,

    /// The ray direction. Distances are measured in multiples of its length.
    pub direction: Vector3<f32>,

    /// Start of the valid distance range.
    pub tnear: f32,

    /// End of the valid distance range. Shrinks to the distance of the nearest hit.
    pub tfar: f32,

    /// Visibility mask, tested against [`Geometry::mask`](crate::scene::Geometry::mask).
    pub mask: u32,

    /// Barycentric or surface `u` coordinate of the hit.
    pub u: f32,

    /// Barycentric or surface `v` coordinate of the hit.
    pub v: f32,

    /// Unnormalized geometric normal of the hit.
    pub ng: Vector3<f32>,

    /// Geometry id of the hit, [`INVALID_ID`] if nothing was hit.
    pub geom_id: u32,

    /// Primitive id of the hit, [`INVALID_ID`] if nothing was hit.
    pub prim_id: u32,
}

/// A hit candidate produced by a geometric test, not yet validated by a filter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Hit {
    /// U coordinate of the intersection.
    pub u: f32,

    /// V coordinate of the intersection.
    pub v: f32,

    /// Distance from the ray origin to the intersection point.
    pub t: f32,

    /// Geometric normal at the intersection.
    pub ng: Vector3<f32>,

    /// Id of the hit geometry.
    pub geom_id: u32,

    /// Id of the hit primitive.
    pub prim_id: u32,
}

impl Hit {
    /// Constructs a [`Hit`].
    pub fn new(u: f32, v: f32, t: f32, ng: Vector3<f32>, geom_id: u32, prim_id: u32) -> Hit {
        Hit {
            u,
            v,
            t,
            ng,
            geom_id,
            prim_id,
        }
    }
}

impl Ray {
    /// Creates a new [`Ray`] from an `origin` and a `direction`, with the distance
    /// range `[0, +inf]` and no hit. The direction is not normalized.
    ///
    /// # Examples
    /// ```
    /// use tessgrid::ray::Ray;
    /// use tessgrid::INVALID_ID;
    /// use nalgebra::{Point3, Vector3};
    ///
    /// let origin = Point3::new(0.0, 0.0, 0.0);
    /// let direction = Vector3::new(0.0, 0.0, 2.0);
    /// let ray = Ray::new(origin, direction);
    ///
    /// assert_eq!(ray.direction, direction);
    /// assert_eq!(ray.tfar, f32::INFINITY);
    /// assert_eq!(ray.geom_id, INVALID_ID);
    /// ```
    pub fn new(origin: Point3<f32>, direction: Vector3<f32>) -> Ray {
        Ray {
            origin,
            direction,
            tnear: 0.0,
            tfar: f32::INFINITY,
            mask: u32::MAX,
            u: 0.0,
            v: 0.0,
            ng: Vector3::zeros(),
            geom_id: INVALID_ID,
            prim_id: INVALID_ID,
        }
    }

    /// Returns the ray with the distance range `[tnear, tfar]`.
    pub fn with_range(mut self, tnear: f32, tfar: f32) -> Ray {
        self.tnear = tnear;
        self.tfar = tfar;
        self
    }

    /// Returns the ray with the given visibility mask.
    pub fn with_mask(mut self, mask: u32) -> Ray {
        self.mask = mask;
        self
    }

    /// Returns the point at distance `t` along the ray.
    pub fn point_at(&self, t: f32) -> Point3<f32> {
        self.origin + self.direction * t
    }

    /// Returns true if a hit has been committed.
    pub fn has_hit(&self) -> bool {
        self.geom_id != INVALID_ID
    }

    /// The committed hit, if any.
    pub fn hit(&self) -> Option<Hit> {
        self.has_hit().then(|| self.hit_fields())
    }

    /// All hit fields as a [`Hit`], regardless of whether anything was hit.
    pub(crate) fn hit_fields(&self) -> Hit {
        Hit::new(self.u, self.v, self.tfar, self.ng, self.geom_id, self.prim_id)
    }

    /// Overwrites the hit fields with `hit`.
    #[inline]
    pub(crate) fn commit(&mut self, hit: &Hit) {
        self.u = hit.u;
        self.v = hit.v;
        self.tfar = hit.t;
        self.ng = hit.ng;
        self.geom_id = hit.geom_id;
        self.prim_id = hit.prim_id;
    }
}

#[cfg(test)]
mod tests {
    use crate::ray::{Hit, Ray};
    use crate::testbase::{tuple_to_point, tuple_to_vector, tuplevec_small_strategy};
    use crate::INVALID_ID;
    use nalgebra::{Point3, Vector3};
    use proptest::prelude::*;

    #[test]
    fn fresh_ray_has_no_hit() {
        let ray = Ray::new(Point3::origin(), Vector3::new(1.0, 0.0, 0.0));
        assert!(!ray.has_hit());
        assert_eq!(ray.hit(), None);
        assert_eq!(ray.prim_id, INVALID_ID);
        assert_eq!(ray.mask, u32::MAX);
    }

    #[test]
    fn commit_writes_all_hit_fields() {
        let mut ray = Ray::new(Point3::origin(), Vector3::new(1.0, 0.0, 0.0));
        let hit = Hit::new(0.25, 0.5, 3.0, Vector3::new(0.0, 0.0, 1.0), 2, 7);
        ray.commit(&hit);
        assert_eq!(ray.hit(), Some(hit));
        assert_eq!(ray.origin, Point3::origin());
    }

    proptest! {
        // The range builder does not touch origin or direction.
        #[test]
        fn test_with_range_keeps_geometry(o in tuplevec_small_strategy(),
                                          d in tuplevec_small_strategy(),
                                          tnear in 0.0f32..1.0,
                                          tfar in 1.0f32..100.0) {
            let ray = Ray::new(tuple_to_point(&o), tuple_to_vector(&d)).with_range(tnear, tfar);
            prop_assert_eq!(ray.origin, tuple_to_point(&o));
            prop_assert_eq!(ray.direction, tuple_to_vector(&d));
            prop_assert_eq!((ray.tnear, ray.tfar), (tnear, tfar));
        }
    }
}
