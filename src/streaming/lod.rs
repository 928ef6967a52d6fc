//! Level selection for paged tiles
//!
//! Each tile's image forms a pyramid: level 0 is `base_texture_size` texels
//! wide and every further level halves it. Sources wider than the base size
//! would sit at negative levels; those are never paged in and are clamped
//! to level 0 instead. The same level drives the tile's geometry stride.

/// Highest pyramid level for a base size (the level where the image is 1 texel)
pub fn max_texture_level(base_texture_size: u32) -> u32 {
    base_texture_size.max(1).ilog2()
}

/// Pyramid level of a source image of width `source_size`.
///
/// Negative when the source is wider than `base_texture_size`.
pub fn source_level(source_size: u32, base_texture_size: u32) -> i32 {
    if source_size <= base_texture_size {
        return 0;
    }
    let (source, base) = (source_size as f64, base_texture_size.max(1) as f64);
    -((source / base).log2().ceil() as i32)
}

/// Image dimensions at `level` for a source of `source` (width, height)
///
/// # Arguments
/// * `source` - Source image size in texels
/// * `base_texture_size` - Texel size of level 0
/// * `level` - Requested pyramid level
///
/// # Returns
/// `min(base >> level, source)` per axis, at least one texel
pub fn level_size(source: (u32, u32), base_texture_size: u32, level: u32) -> (u32, u32) {
    let cap = base_texture_size.checked_shr(level).unwrap_or(0).max(1);
    (source.0.min(cap).max(1), source.1.min(cap).max(1))
}

/// Level wanted at `distance` from the viewer
///
/// # Arguments
/// * `distance` - Distance from the viewer to the tile
/// * `enabling_range` - Distance within which level 0 is used; 0 disables the pyramid
/// * `max_level` - Coarsest level available
///
/// # Returns
/// 0 within the enabling range, then one level per doubling of distance.
/// With the pyramid disabled every tile stays at level 0.
pub fn desired_level(distance: f32, enabling_range: f32, max_level: u32) -> u32 {
    if enabling_range <= 0.0 {
        return 0;
    }
    if distance <= enabling_range {
        return 0;
    }
    let level = (distance / enabling_range).log2().floor() as u32 + 1;
    level.min(max_level)
}

/// Geometry stride (in samples) used to mesh a tile at `level`
pub fn geometry_stride(level: u32, max_geometry_level: u32) -> usize {
    1 << level.min(max_geometry_level).min(16)
}

/// What to do with a resident tile whose level differs from the wanted one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelChange {
    Keep,
    /// Downsample the resident data in memory
    Coarsen(u32),
    /// Load a finer level from storage
    Refine(u32),
}

/// Apply the aggressiveness and lazyness thresholds
///
/// # Arguments
/// * `current` - Level of the resident data
/// * `desired` - Level wanted this frame
/// * `aggressiveness` - Minimum difference before any swap
/// * `lazyness` - Minimum difference before a finer level is loaded
pub fn decide_level(current: u32, desired: u32, aggressiveness: u32, lazyness: u32) -> LevelChange {
    let swap = aggressiveness.max(1);
    if desired > current && desired - current >= swap {
        LevelChange::Coarsen(desired)
    } else if current > desired && current - desired >= lazyness.max(swap) {
        LevelChange::Refine(desired)
    } else {
        LevelChange::Keep
    }
}
