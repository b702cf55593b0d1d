use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of the atlas texture, in texels.
pub const DEFAULT_ATLAS_SIZE: u32 = 4096;
/// Smallest tile the quad tree hands out.
pub const DEFAULT_MIN_TILE_SIZE: u32 = 64;
/// Largest tile a single light face may receive.
pub const DEFAULT_MAX_TILE_SIZE: u32 = 1024;

/// Reason why a set of atlas options was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    #[error("{field} must be a non-zero power of two, got {value}")]
    NotPowerOfTwo { field: &'static str, value: u32 },
    #[error("min tile size {min} is larger than max tile size {max}")]
    InvertedTileBounds { min: u32, max: u32 },
    #[error("max tile size {tile} does not fit in an atlas of size {atlas}")]
    TileLargerThanAtlas { tile: u32, atlas: u32 },
    #[error("demand thresholds must satisfy 0 <= low ({low}) <= high ({high})")]
    DemandThresholds { low: f32, high: f32 },
    #[error("priority change threshold must be non-negative, got {0}")]
    NegativeChangeThreshold(f32),
}

/// Configuration of a shadow atlas.
///
/// Missing fields take their default when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowAtlasOptions {
    /// Side length of the square atlas texture.
    pub atlas_size: u32,
    pub min_tile_size: u32,
    pub max_tile_size: u32,
    /// Demand ratios below this select the low demand priority band.
    pub low_demand_ratio: f32,
    /// Demand ratios at or above this select the high demand priority band.
    pub high_demand_ratio: f32,
    /// Relative priority change of an allocated light that forces a rebuild.
    pub priority_change_threshold: f32,
    /// Allow lights that fail to allocate to evict lower priority lights.
    pub eviction: bool,
    /// Number of instance batches the GPU instance buffer has room for.
    pub max_batches_per_frame: u32,
}

impl Default for ShadowAtlasOptions {
    fn default() -> Self {
        Self {
            atlas_size: DEFAULT_ATLAS_SIZE,
            min_tile_size: DEFAULT_MIN_TILE_SIZE,
            max_tile_size: DEFAULT_MAX_TILE_SIZE,
            low_demand_ratio: 0.01,
            high_demand_ratio: 0.025,
            priority_change_threshold: 0.2,
            eviction: true,
            max_batches_per_frame: 256,
        }
    }
}

impl ShadowAtlasOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        for (field, value) in [
            ("atlas_size", self.atlas_size),
            ("min_tile_size", self.min_tile_size),
            ("max_tile_size", self.max_tile_size),
        ] {
            if !value.is_power_of_two() {
                return Err(OptionsError::NotPowerOfTwo { field, value });
            }
        }
        if self.min_tile_size > self.max_tile_size {
            return Err(OptionsError::InvertedTileBounds {
                min: self.min_tile_size,
                max: self.max_tile_size,
            });
        }
        if self.max_tile_size > self.atlas_size {
            return Err(OptionsError::TileLargerThanAtlas {
                tile: self.max_tile_size,
                atlas: self.atlas_size,
            });
        }
        if !(0.0 <= self.low_demand_ratio && self.low_demand_ratio <= self.high_demand_ratio) {
            return Err(OptionsError::DemandThresholds {
                low: self.low_demand_ratio,
                high: self.high_demand_ratio,
            });
        }
        if !(self.priority_change_threshold >= 0.0) {
            return Err(OptionsError::NegativeChangeThreshold(self.priority_change_threshold));
        }
        Ok(())
    }

    /// Number of minimum-sized tiles the atlas can hold.
    pub fn tile_capacity(&self) -> u64 {
        let per_side = (self.atlas_size / self.min_tile_size) as u64;
        per_side * per_side
    }

    /// Number of size steps between the min and max tile sizes.
    pub fn tile_size_levels(&self) -> u32 {
        self.max_tile_size.trailing_zeros() - self.min_tile_size.trailing_zeros()
    }
}
