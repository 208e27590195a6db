#![cfg_attr(feature = "bench", feature(test))]
//! Ray intersection kernels for cached subdivision-surface grids, with a filter
//! protocol that lets user code accept, reject or modify candidate hits.
//!
//! ## About
//!
//! A subdivision patch is tessellated on demand into a regular grid of samples. The
//! samples live in a shared, lazily populated [`TessellationCache`] and are read back
//! in SOA form (one plane per attribute) so that a row strip of the grid can be
//! gathered into SIMD lanes and tested against a ray in one go.
//!
//! Every candidate hit found by a geometric test goes through the filter protocol in
//! [`filter`] before it is committed to the ray: the ray's previous best hit is
//! snapshotted, the candidate is written, the user callback registered on the
//! [`Geometry`] runs, and if the callback rejected the hit by writing [`INVALID_ID`]
//! into `geom_id`, the snapshot is restored bit for bit. The protocol exists for
//! single rays and for packets of 4, 8 and 16 rays held as lanes.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tessgrid::grid_soa::{GridSoaIntersector, Precalculations};
//! use tessgrid::patch::{BilinearPatch, SubdivPatch};
//! use tessgrid::ray::Ray;
//! use tessgrid::scene::{Geometry, Scene};
//! use nalgebra::{Point3, Vector3};
//!
//! let mut scene = Scene::new();
//! let geom_id = scene.attach(Geometry::new());
//!
//! // A flat 3x3 grid in the plane z = 5.
//! let surface = BilinearPatch::new(
//!     Point3::new(0.0, 0.0, 5.0),
//!     Point3::new(2.0, 0.0, 5.0),
//!     Point3::new(0.0, 2.0, 5.0),
//!     Point3::new(2.0, 2.0, 5.0),
//! );
//! let patch = Arc::new(SubdivPatch::new(geom_id, 0, 3, 3, surface).unwrap());
//! let block = patch.block(0, 0).unwrap();
//!
//! let mut ray = Ray::new(Point3::new(0.25, 0.5, 0.0), Vector3::new(0.0, 0.0, 1.0));
//! {
//!     let mut pre = Precalculations::new(&scene);
//!     GridSoaIntersector::intersect(&mut pre, &mut ray, &block, &scene).unwrap();
//! }
//!
//! assert_eq!(ray.tfar, 5.0);
//! assert_eq!(ray.geom_id, geom_id);
//! ```
//!
//! ## Features
//!
//! - `rayon` (default **enabled**) - adds a parallel ray-stream entry point
//! - `serde` (default **disabled**) - adds `Serialize` and `Deserialize` implementations for some types
//! - `bench` (default **disabled**) - nightly-only micro benchmarks
//!

#[cfg(all(feature = "bench", test))]
extern crate test;

/// Id value marking "no hit" in `geom_id`/`prim_id`. A filter callback rejects a
/// candidate hit by writing it into `geom_id`.
pub const INVALID_ID: u32 = u32::MAX;

pub mod cache;
pub mod error;
pub mod filter;
pub mod grid_soa;
pub mod mask;
pub mod patch;
pub mod pluecker;
pub mod ray;
pub mod scene;
pub mod simd;
mod utils;

#[cfg(test)]
mod testbase;

pub use cache::{CacheConfig, TessellationCache};
pub use error::{Error, Result};
pub use mask::LaneMask;
pub use scene::{Geometry, Scene};
