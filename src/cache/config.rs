//! Sizing of the tessellation cache.

/// Default pool size in `f32` slots (16 MiB).
pub const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

/// Default plane alignment in samples, the width of the widest grid loader.
pub const DEFAULT_SIMD_BLOCK: usize = 8;

/// Configuration of a [`TessellationCache`](super::TessellationCache).
///
/// # Examples
/// ```
/// use tessgrid::CacheConfig;
///
/// let config = CacheConfig::default().with_capacity(1 << 16).with_simd_block(4);
/// assert_eq!(config.capacity, 65536);
/// assert_eq!(config.simd_block, 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheConfig {
    /// Number of `f32` slots in the shared pool.
    pub capacity: usize,

    /// Every grid plane is padded to a multiple of this many samples.
    pub simd_block: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: DEFAULT_CAPACITY,
            simd_block: DEFAULT_SIMD_BLOCK,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the plane alignment. Zero is treated as one.
    pub fn with_simd_block(mut self, simd_block: usize) -> Self {
        self.simd_block = simd_block.max(1);
        self
    }
}
