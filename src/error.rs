//! Error type shared by the cache and patch modules.

use thiserror::Error;

/// Errors raised while addressing or caching tessellated grids.
///
/// Filter rejection is not an error; it is reported through acceptance masks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The grid of a patch needs more slots than the whole cache pool holds.
    #[error("patch grid needs {required} cache slots but the pool only holds {capacity}")]
    PatchTooLarge { required: usize, capacity: usize },

    /// The grid resolution cannot hold a single 3x3 block of samples.
    #[error("grid resolution {u_res}x{v_res} is smaller than one 3x3 block")]
    GridTooSmall { u_res: usize, v_res: usize },

    /// A block reference reaches outside of its patch grid.
    #[error("3x3 block at ({u}, {v}) does not fit a {u_res}x{v_res} grid")]
    BlockOutOfBounds {
        u: usize,
        v: usize,
        u_res: usize,
        v_res: usize,
    },

    /// A patch refers to a geometry id that is not attached to the scene.
    #[error("geometry {geom_id} is not attached to the scene")]
    UnknownGeometry { geom_id: u32 },

    /// The process-wide cache was already created.
    #[error("the global tessellation cache is already initialized")]
    GlobalCacheInitialized,
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
