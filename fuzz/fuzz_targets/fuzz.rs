#![no_main]
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use nalgebra::{Point3, Vector3};
use ordered_float::NotNan;
use tessgrid::grid_soa::{GridPath, GridSoaIntersector, Precalculations};
use tessgrid::mask::LaneMask;
use tessgrid::ray::{Ray, Ray4};
use tessgrid::scene::{Geometry, PacketFilter, Scene};
use tessgrid::{CacheConfig, TessellationCache, INVALID_ID};

type Float = f32;
const LIMIT: Float = 1_000.0;

fuzz_target!(|workload: Workload| {
    workload.fuzz();
});

#[derive(Arbitrary)]
struct ArbitraryPoint {
    coordinates: [NotNan<Float>; 3],
}

impl ArbitraryPoint {
    fn point(&self) -> Point3<Float> {
        let [x, y, z] = self.coordinates.map(|f| f.into_inner().clamp(-LIMIT, LIMIT));
        Point3::new(x, y, z)
    }
}

#[derive(Arbitrary)]
struct ArbitraryRay {
    origin: ArbitraryPoint,
    destination: ArbitraryPoint,
}

impl Debug for ArbitraryRay {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Debug::fmt(&self.ray(), f)
    }
}

impl ArbitraryRay {
    fn ray(&self) -> Ray {
        let mut direction = self.destination.point() - self.origin.point();
        // Ensure no degenerate direction.
        if direction.magnitude() < 1e-3 {
            direction = Vector3::new(0.0, 0.0, 1.0);
        }
        Ray::new(self.origin.point(), direction)
    }
}

/// Four corners of a bilinear patch plus its grid resolution.
#[derive(Arbitrary)]
struct ArbitraryPatch {
    corners: [ArbitraryPoint; 4],
    u_res: u8,
    v_res: u8,
}

impl Debug for ArbitraryPatch {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let corners: Vec<_> = self.corners.iter().map(ArbitraryPoint::point).collect();
        f.debug_struct("ArbitraryPatch")
            .field("corners", &corners)
            .field("u_res", &self.u_res)
            .field("v_res", &self.v_res)
            .finish()
    }
}

#[derive(Debug, Arbitrary)]
struct Workload {
    patch: ArbitraryPatch,
    rays: [ArbitraryRay; 4],
    reject: u16,
}

impl Workload {
    fn fuzz(self) {
        let mut scene = Scene::with_cache(Arc::new(TessellationCache::new(
            CacheConfig::default().with_capacity(1 << 14),
        )));
        let reject = self.reject;
        let mut geometry = Geometry::new();
        geometry.set_intersection_filter::<4>(PacketFilter::native(move |valid, rays| {
            for k in valid & LaneMask::from_bits(reject) {
                rays.geom_id[k] = INVALID_ID;
            }
        }));
        let geom_id = scene.attach(geometry);

        let [p00, p10, p01, p11] = self.patch.corners.each_ref().map(ArbitraryPoint::point);
        let surface = tessgrid::patch::BilinearPatch::new(p00, p10, p01, p11);
        let u_res = 3 + (self.patch.u_res % 14) as usize;
        let v_res = 3 + (self.patch.v_res % 14) as usize;
        let patch = scene.create_patch(geom_id, 0, u_res, v_res, surface).unwrap();
        let blocks = patch.blocks();

        let rays = self.rays.each_ref().map(ArbitraryRay::ray);
        let mut pre = Precalculations::new(&scene);

        // Both SIMD paths agree on the nearest distance.
        for ray in &rays {
            let mut wide = *ray;
            let mut narrow = *ray;
            for block in &blocks {
                GridSoaIntersector::intersect_with(GridPath::Wide, &mut pre, &mut wide, block, &scene).unwrap();
                GridSoaIntersector::intersect_with(GridPath::Narrow, &mut pre, &mut narrow, block, &scene).unwrap();
            }
            assert_eq!(wide.tfar.to_bits(), narrow.tfar.to_bits());
        }

        // Rejected lanes never see their state change.
        let mut packet = Ray4::from_fn(|k| rays[k]);
        let before = packet;
        for block in &blocks {
            GridSoaIntersector::intersect_packet(LaneMask::all(), &mut pre, &mut packet, block, &scene).unwrap();
        }
        for k in LaneMask::<4>::from_bits(reject) {
            assert_eq!(format!("{:?}", packet.lane(k)), format!("{:?}", before.lane(k)));
        }
    }
}
