//! Geometry records with their filter callback slots, and the [`Scene`] that owns them.

use std::fmt;
use std::sync::Arc;

use log::warn;

use crate::cache::TessellationCache;
use crate::error::{Error, Result};
use crate::mask::LaneMask;
use crate::patch::{PatchEval, SubdivPatch};
use crate::ray::{Ray, RayK};

/// Filter callback for single rays. Rejects the hit by writing
/// [`INVALID_ID`](crate::INVALID_ID) into `ray.geom_id`.
pub type RayFilter = Arc<dyn Fn(&mut Ray) + Send + Sync>;

/// Native packet callback: receives the active lanes by value.
pub type NativePacketFn<const W: usize> = dyn Fn(LaneMask<W>, &mut RayK<W>) + Send + Sync;

/// Legacy packet callback: receives a mutable copy of the active lanes that it may
/// narrow for its own bookkeeping. The copy is discarded afterwards.
pub type LegacyPacketFn<const W: usize> = dyn Fn(&mut LaneMask<W>, &mut RayK<W>) + Send + Sync;

/// A packet filter callback tagged with its calling convention.
pub enum PacketFilter<const W: usize> {
    Native(Arc<NativePacketFn<W>>),
    Legacy(Arc<LegacyPacketFn<W>>),
}

impl<const W: usize> PacketFilter<W> {
    /// Wraps a callback using the native convention.
    pub fn native(f: impl Fn(LaneMask<W>, &mut RayK<W>) + Send + Sync + 'static) -> Self {
        PacketFilter::Native(Arc::new(f))
    }

    /// Wraps a callback using the legacy convention.
    pub fn legacy(f: impl Fn(&mut LaneMask<W>, &mut RayK<W>) + Send + Sync + 'static) -> Self {
        PacketFilter::Legacy(Arc::new(f))
    }

    /// Returns true for the native convention.
    pub fn is_native(&self) -> bool {
        matches!(self, PacketFilter::Native(_))
    }

    /// Calls the callback with the convention it was registered with.
    #[inline]
    pub(crate) fn invoke(&self, valid: LaneMask<W>, ray: &mut RayK<W>) {
        match self {
            PacketFilter::Native(f) => f(valid, ray),
            PacketFilter::Legacy(f) => {
                let mut valid_temp = valid;
                f(&mut valid_temp, ray);
            }
        }
    }
}

impl<const W: usize> Clone for PacketFilter<W> {
    fn clone(&self) -> Self {
        match self {
            PacketFilter::Native(f) => PacketFilter::Native(Arc::clone(f)),
            PacketFilter::Legacy(f) => PacketFilter::Legacy(Arc::clone(f)),
        }
    }
}

impl<const W: usize> fmt::Debug for PacketFilter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let convention = if self.is_native() { "Native" } else { "Legacy" };
        write!(f, "PacketFilter<{W}>::{convention}")
    }
}

/// The callback slots of one event type (intersection or occlusion).
#[derive(Clone, Default)]
pub struct FilterSet {
    single: Option<RayFilter>,
    packet4: Option<PacketFilter<4>>,
    packet8: Option<PacketFilter<8>>,
    packet16: Option<PacketFilter<16>>,
}

impl FilterSet {
    /// The single-ray callback.
    pub fn single(&self) -> Option<&RayFilter> {
        self.single.as_ref()
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSet")
            .field("single", &self.single.is_some())
            .field("packet4", &self.packet4)
            .field("packet8", &self.packet8)
            .field("packet16", &self.packet16)
            .finish()
    }
}

/// Access to the packet slot of width `W` in a [`FilterSet`].
///
/// Only the widths 4, 8 and 16 have slots.
pub trait PacketFilterSlot<const W: usize> {
    fn packet(&self) -> Option<&PacketFilter<W>>;
    fn set_packet(&mut self, filter: Option<PacketFilter<W>>);
}

macro_rules! packet_slot {
    ($width:literal, $field:ident) => {
        impl PacketFilterSlot<$width> for FilterSet {
            #[inline(always)]
            fn packet(&self) -> Option<&PacketFilter<$width>> {
                self.$field.as_ref()
            }

            fn set_packet(&mut self, filter: Option<PacketFilter<$width>>) {
                self.$field = filter;
            }
        }
    };
}

packet_slot!(4, packet4);
packet_slot!(8, packet8);
packet_slot!(16, packet16);

/// A geometry record: id, visibility mask and filter callbacks.
///
/// Immutable while rays are traced against it.
///
/// # Examples
/// ```
/// use tessgrid::scene::{Geometry, PacketFilter};
/// use tessgrid::INVALID_ID;
///
/// let mut geometry = Geometry::new();
/// // Reject every hit further away than 10.
/// geometry.set_intersection_filter1(|ray| {
///     if ray.tfar > 10.0 {
///         ray.geom_id = INVALID_ID;
///     }
/// });
/// geometry.set_intersection_filter::<4>(PacketFilter::native(|_valid, _rays| {}));
///
/// assert!(geometry.has_intersection_filter1());
/// assert!(geometry.has_intersection_filter::<4>());
/// assert!(!geometry.has_intersection_filter::<8>());
/// ```
#[derive(Clone, Debug)]
pub struct Geometry {
    id: u32,
    mask: u32,
    intersection: FilterSet,
    occlusion: FilterSet,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry::new()
    }
}

impl Geometry {
    /// A geometry visible to every ray, without filters. The id is assigned by
    /// [`Scene::attach`].
    pub fn new() -> Geometry {
        Geometry {
            id: crate::INVALID_ID,
            mask: u32::MAX,
            intersection: FilterSet::default(),
            occlusion: FilterSet::default(),
        }
    }

    /// Returns the geometry with the given visibility mask.
    pub fn with_mask(mut self, mask: u32) -> Geometry {
        self.mask = mask;
        self
    }

    /// The id this geometry was attached under.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The visibility mask. Rays whose mask shares no bit with it ignore the geometry.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Returns true if a ray with `ray_mask` can see this geometry.
    #[inline]
    pub fn visible_to(&self, ray_mask: u32) -> bool {
        self.mask & ray_mask != 0
    }

    /// Registers the single-ray intersection filter.
    pub fn set_intersection_filter1(&mut self, f: impl Fn(&mut Ray) + Send + Sync + 'static) {
        self.intersection.single = Some(Arc::new(f));
    }

    /// Registers the single-ray occlusion filter.
    pub fn set_occlusion_filter1(&mut self, f: impl Fn(&mut Ray) + Send + Sync + 'static) {
        self.occlusion.single = Some(Arc::new(f));
    }

    /// Registers the intersection filter for packets of width `W`.
    pub fn set_intersection_filter<const W: usize>(&mut self, filter: PacketFilter<W>)
    where
        FilterSet: PacketFilterSlot<W>,
    {
        PacketFilterSlot::<W>::set_packet(&mut self.intersection, Some(filter));
    }

    /// Registers the occlusion filter for packets of width `W`.
    pub fn set_occlusion_filter<const W: usize>(&mut self, filter: PacketFilter<W>)
    where
        FilterSet: PacketFilterSlot<W>,
    {
        PacketFilterSlot::<W>::set_packet(&mut self.occlusion, Some(filter));
    }

    /// Removes every registered filter.
    pub fn clear_filters(&mut self) {
        self.intersection = FilterSet::default();
        self.occlusion = FilterSet::default();
    }

    /// The intersection filter slots.
    pub fn intersection_filters(&self) -> &FilterSet {
        &self.intersection
    }

    /// The occlusion filter slots.
    pub fn occlusion_filters(&self) -> &FilterSet {
        &self.occlusion
    }

    pub fn has_intersection_filter1(&self) -> bool {
        self.intersection.single.is_some()
    }

    pub fn has_occlusion_filter1(&self) -> bool {
        self.occlusion.single.is_some()
    }

    pub fn has_intersection_filter<const W: usize>(&self) -> bool
    where
        FilterSet: PacketFilterSlot<W>,
    {
        PacketFilterSlot::<W>::packet(&self.intersection).is_some()
    }

    pub fn has_occlusion_filter<const W: usize>(&self) -> bool
    where
        FilterSet: PacketFilterSlot<W>,
    {
        PacketFilterSlot::<W>::packet(&self.occlusion).is_some()
    }
}

/// Owns the geometries of a scene and the handle to the tessellation cache that
/// backs its subdivision patches.
pub struct Scene {
    geometries: Vec<Geometry>,
    cache: Arc<TessellationCache>,
}

impl Default for Scene {
    fn default() -> Self {
        Scene::new()
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("geometries", &self.geometries)
            .field("cache_capacity", &self.cache.capacity())
            .finish()
    }
}

impl Scene {
    /// An empty scene using the process-wide tessellation cache.
    pub fn new() -> Scene {
        Scene::with_cache(Arc::clone(TessellationCache::global()))
    }

    /// An empty scene using a dedicated tessellation cache.
    pub fn with_cache(cache: Arc<TessellationCache>) -> Scene {
        Scene {
            geometries: Vec::new(),
            cache,
        }
    }

    /// Adds `geometry` and returns its id.
    pub fn attach(&mut self, mut geometry: Geometry) -> u32 {
        let id = self.geometries.len() as u32;
        geometry.id = id;
        self.geometries.push(geometry);
        id
    }

    /// The geometry with id `geom_id`.
    pub fn get(&self, geom_id: u32) -> Option<&Geometry> {
        self.geometries.get(geom_id as usize)
    }

    /// Mutable access to the geometry with id `geom_id`.
    pub fn get_mut(&mut self, geom_id: u32) -> Option<&mut Geometry> {
        self.geometries.get_mut(geom_id as usize)
    }

    /// The geometry a primitive refers to.
    #[inline]
    pub(crate) fn geometry(&self, geom_id: u32) -> Result<&Geometry> {
        self.get(geom_id).ok_or(Error::UnknownGeometry { geom_id })
    }

    /// Number of attached geometries.
    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    /// Returns true if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// The tessellation cache backing this scene.
    pub fn cache(&self) -> &Arc<TessellationCache> {
        &self.cache
    }

    /// Creates a subdivision patch for an attached geometry, checking that its grid
    /// fits this scene's cache.
    pub fn create_patch(
        &self,
        geom_id: u32,
        prim_id: u32,
        grid_u_res: usize,
        grid_v_res: usize,
        eval: impl PatchEval + 'static,
    ) -> Result<Arc<SubdivPatch>> {
        self.geometry(geom_id)?;
        let patch = SubdivPatch::new(geom_id, prim_id, grid_u_res, grid_v_res, eval)?;
        let required = patch.footprint(self.cache.config().simd_block);
        if required > self.cache.capacity() {
            warn!(
                "patch {}/{} needs {} cache slots, pool holds {}",
                geom_id,
                prim_id,
                required,
                self.cache.capacity()
            );
            return Err(Error::PatchTooLarge {
                required,
                capacity: self.cache.capacity(),
            });
        }
        Ok(Arc::new(patch))
    }
}
