//! Light importance scores and their mapping onto tile sizes.
//!
//! Raw scores grow with intensity and range and shrink with distance from
//! the camera. They are then remapped into a band chosen from how full the
//! atlas would be if every visible face got a minimum-size tile: the fuller
//! it is, the lower the band, which in turn selects smaller tiles.

use glam::Vec3;
use penumbra_types::{LightKind, ShadowLight};

use crate::ShadowAtlasOptions;

/// Highest raw score before the kind factor is applied.
pub const MAX_RAW_PRIORITY: f32 = 100.0;

/// Point lights cost six tiles, so they are scored lower.
pub const POINT_PRIORITY_FACTOR: f32 = 0.6;
/// Spot lights need more angular precision, so they are scored higher.
pub const SPOT_PRIORITY_FACTOR: f32 = 1.2;

pub fn kind_factor(kind: LightKind) -> f32 {
    match kind {
        LightKind::Point => POINT_PRIORITY_FACTOR,
        LightKind::Spot => SPOT_PRIORITY_FACTOR,
        LightKind::Directional | LightKind::Projector => 1.0,
    }
}

/// Score of a light before normalization.
pub fn raw_priority(light: &ShadowLight, camera_location: Vec3) -> f32 {
    let distance = light.position().distance(camera_location);
    raw_priority_from_parts(light.kind, light.intensity, light.range, distance)
}

pub fn raw_priority_from_parts(kind: LightKind, intensity: f32, range: f32, distance: f32) -> f32 {
    let strength = (intensity / 100.0) * (range / 50.0);
    let falloff = (distance / 50.0).max(0.1);
    let score = (strength / falloff * 10.0).clamp(0.0, MAX_RAW_PRIORITY);

    score * kind_factor(kind)
}

/// Closed range normalized priorities are mapped into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityBand {
    pub min: f32,
    pub max: f32,
}

impl PriorityBand {
    /// Few faces compete for space, allow large tiles.
    pub const LOW_DEMAND: Self = Self { min: 60.0, max: 100.0 };
    pub const MEDIUM_DEMAND: Self = Self { min: 40.0, max: 80.0 };
    /// Many faces compete for space, force smaller tiles so more lights fit.
    pub const HIGH_DEMAND: Self = Self { min: 20.0, max: 60.0 };

    pub fn midpoint(self) -> f32 {
        (self.min + self.max) * 0.5
    }

    pub fn for_demand(ratio: f32, options: &ShadowAtlasOptions) -> Self {
        if ratio < options.low_demand_ratio {
            Self::LOW_DEMAND
        } else if ratio < options.high_demand_ratio {
            Self::MEDIUM_DEMAND
        } else {
            Self::HIGH_DEMAND
        }
    }
}

/// Visible faces divided by the number of minimum-size tiles the atlas holds.
pub fn demand_ratio(visible_faces: usize, options: &ShadowAtlasOptions) -> f32 {
    visible_faces as f32 / options.tile_capacity() as f32
}

/// Linear remap of one frame's raw scores into a [`PriorityBand`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityNormalizer {
    band: PriorityBand,
    raw_min: f32,
    raw_max: f32,
}

impl PriorityNormalizer {
    pub fn new(band: PriorityBand, raw_scores: &[f32]) -> Self {
        let (raw_min, raw_max) = raw_scores
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &raw| {
                (min.min(raw), max.max(raw))
            });

        Self { band, raw_min, raw_max }
    }

    pub fn band(&self) -> PriorityBand {
        self.band
    }

    pub fn normalize(&self, raw: f32) -> f32 {
        let span = self.raw_max - self.raw_min;
        if !(span > 0.0) {
            return self.band.midpoint();
        }

        let t = ((raw - self.raw_min) / span).clamp(0.0, 1.0);
        self.band.min + t * (self.band.max - self.band.min)
    }
}

/// Tile size a light face with the given normalized priority asks for.
///
/// Priorities map linearly onto the power-of-two steps between the min and
/// max tile size.
pub fn tile_size_for_priority(priority: f32, options: &ShadowAtlasOptions) -> u32 {
    let levels = options.tile_size_levels();
    let level = (priority / MAX_RAW_PRIORITY * levels as f32).round().clamp(0.0, levels as f32) as u32;

    options.min_tile_size << level
}
