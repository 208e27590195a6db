//! The shared tessellation cache.
//!
//! Tessellated grids live in one fixed pool of `f32` slots. A grid is allocated by
//! bumping a cursor and populated exactly once by whichever thread asks for it
//! first; every other thread asking for the same patch waits for that build.
//!
//! Readers hold a [`CacheLock`] for as long as they dereference grid data. When the
//! pool runs full, the whole pool is recycled at once: the requester releases its
//! lock, [`TessellationCache::reset`] waits until no other lock is held, then empties
//! the index and starts a new epoch. A pending reset holds back fresh locks, so a
//! steady stream of readers cannot postpone it forever.

mod config;
mod grid;

pub use self::config::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_SIMD_BLOCK};
pub use self::grid::{GridPlanes, GridSlot, PLANE_UV, PLANE_X, PLANE_Y, PLANE_Z};

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use log::{debug, trace};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::error::{Error, Result};
use crate::patch::SubdivPatch;

static GLOBAL: OnceLock<Arc<TessellationCache>> = OnceLock::new();

thread_local! {
    /// Cache locks held by the current thread.
    static HELD: Cell<usize> = const { Cell::new(0) };
}

struct CacheEntry {
    offset: usize,
    ready: OnceLock<()>,
}

struct Index {
    epoch: u64,
    next: usize,
    entries: HashMap<u64, Arc<CacheEntry>>,
}

/// A point-in-time view of the cache bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of whole-pool resets so far.
    pub epoch: u64,
    /// Slots handed out in the current epoch.
    pub used: usize,
    /// Pool size in slots.
    pub capacity: usize,
    /// Grids allocated in the current epoch.
    pub entries: usize,
    /// Outstanding [`CacheLock`]s.
    pub holders: usize,
}

/// Result of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The grid is populated and stays valid while the lock is held.
    Ready(GridSlot),
    /// The grid is not cached and the pool has no room left in this epoch.
    Full,
}

/// A fixed pool of tessellated grids shared by every thread tracing a scene.
pub struct TessellationCache {
    config: CacheConfig,
    pool: Box<[AtomicU32]>,
    index: Mutex<Index>,
    gate: RwLock<()>,
    holders: AtomicUsize,
}

impl fmt::Debug for TessellationCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TessellationCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TessellationCache {
    /// Allocates a cache with a pool of `config.capacity` slots.
    pub fn new(config: CacheConfig) -> TessellationCache {
        let config = config.with_simd_block(config.simd_block);
        TessellationCache {
            config,
            pool: (0..config.capacity).map(|_| AtomicU32::new(0)).collect(),
            index: Mutex::new(Index {
                epoch: 0,
                next: 0,
                entries: HashMap::new(),
            }),
            gate: RwLock::new(()),
            holders: AtomicUsize::new(0),
        }
    }

    /// The process-wide cache, created with [`CacheConfig::default`] unless
    /// [`TessellationCache::init_global`] ran first.
    pub fn global() -> &'static Arc<TessellationCache> {
        GLOBAL.get_or_init(|| Arc::new(TessellationCache::new(CacheConfig::default())))
    }

    /// Creates the process-wide cache with `config`.
    ///
    /// Fails with [`Error::GlobalCacheInitialized`] if it already exists.
    pub fn init_global(config: CacheConfig) -> Result<()> {
        GLOBAL
            .set(Arc::new(TessellationCache::new(config)))
            .map_err(|_| Error::GlobalCacheInitialized)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Pool size in slots.
    pub fn capacity(&self) -> usize {
        self.pool.len()
    }

    /// Takes a shared lock. Grid data obtained through the lock stays valid until the
    /// lock is dropped.
    ///
    /// Blocks while a pool reset is pending, unless the calling thread already holds
    /// a lock: that lock keeps the reset waiting, so a second one is granted at once.
    /// A thread must not request a pool reset while it still holds a lock of its own.
    pub fn lock(&self) -> CacheLock<'_> {
        let guard = if HELD.with(Cell::get) > 0 {
            self.gate.read_recursive()
        } else {
            self.gate.read()
        };
        HELD.with(|held| held.set(held.get() + 1));
        self.holders.fetch_add(1, Ordering::AcqRel);
        let epoch = self.index.lock().epoch;
        CacheLock {
            cache: self,
            epoch,
            _guard: guard,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.lock();
        CacheStats {
            epoch: index.epoch,
            used: index.next,
            capacity: self.capacity(),
            entries: index.entries.len(),
            holders: self.holders.load(Ordering::Acquire),
        }
    }

    /// Empties the pool if it is still in `seen_epoch`. Blocks until every
    /// outstanding [`CacheLock`] is released; returns false if another thread reset
    /// the pool first.
    pub(crate) fn reset(&self, seen_epoch: u64) -> bool {
        let _exclusive = self.gate.write();
        let mut index = self.index.lock();
        if index.epoch != seen_epoch {
            return false;
        }
        let evicted = index.entries.len();
        index.entries.clear();
        index.next = 0;
        index.epoch += 1;
        debug!(
            "tessellation cache reset: epoch {}, {} grids evicted",
            index.epoch, evicted
        );
        true
    }

    /// View of the grid stored at `slot`.
    pub(crate) fn planes(&self, slot: GridSlot) -> GridPlanes<'_> {
        GridPlanes::new(&self.pool, slot)
    }
}

/// A shared lock on a [`TessellationCache`]. Released when dropped.
pub struct CacheLock<'a> {
    cache: &'a TessellationCache,
    epoch: u64,
    _guard: RwLockReadGuard<'a, ()>,
}

impl fmt::Debug for CacheLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLock").field("epoch", &self.epoch).finish()
    }
}

impl<'a> CacheLock<'a> {
    /// The pool epoch this lock observes. It cannot change while the lock is held.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Looks up the grid of `patch`, allocating and tessellating it on first use.
    ///
    /// Fails with [`Error::PatchTooLarge`] if the grid cannot fit even an empty pool.
    pub fn get_or_build(&self, patch: &SubdivPatch) -> Result<Lookup> {
        let cache = self.cache;
        let dim_offset = patch.plane_stride(cache.config.simd_block);
        let required = patch.footprint(cache.config.simd_block);
        if required > cache.capacity() {
            return Err(Error::PatchTooLarge {
                required,
                capacity: cache.capacity(),
            });
        }

        let entry = {
            let mut index = cache.index.lock();
            match index.entries.get(&patch.id()) {
                Some(entry) => Arc::clone(entry),
                None => {
                    if index.next + required > cache.capacity() {
                        return Ok(Lookup::Full);
                    }
                    let entry = Arc::new(CacheEntry {
                        offset: index.next,
                        ready: OnceLock::new(),
                    });
                    index.next += required;
                    index.entries.insert(patch.id(), Arc::clone(&entry));
                    trace!(
                        "allocated grid of patch {} at slot {} ({} slots)",
                        patch.id(),
                        entry.offset,
                        required
                    );
                    entry
                }
            }
        };

        entry.ready.get_or_init(|| {
            let dst = &cache.pool[entry.offset..entry.offset + required];
            patch.tessellate(dst, dim_offset);
            trace!(
                "tessellated patch {} into a {}x{} grid",
                patch.id(),
                patch.grid_u_res(),
                patch.grid_v_res()
            );
        });

        Ok(Lookup::Ready(GridSlot {
            offset: entry.offset,
            dim_offset,
            line_offset: patch.grid_u_res(),
        }))
    }

    /// View of a grid returned by [`CacheLock::get_or_build`] on this lock.
    pub fn planes(&self, slot: GridSlot) -> GridPlanes<'_> {
        self.cache.planes(slot)
    }
}

impl Drop for CacheLock<'_> {
    fn drop(&mut self) {
        self.cache.holders.fetch_sub(1, Ordering::AcqRel);
        HELD.with(|held| held.set(held.get() - 1));
    }
}
