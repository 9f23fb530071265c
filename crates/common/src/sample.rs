use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Height written by a device for a column with no valid terrain.
pub const INVALID_HEIGHT: f32 = -1.0;

/// Filters applied on the device while sampling terrain columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleFilter {
    /// Columns steeper than this (degrees from horizontal) are invalid.
    pub max_slope_deg: f32,
    /// Columns higher than this are invalid.
    pub max_height: f32,
    /// Sample the raw heightfield, without affector flattening.
    pub ignore_affectors: bool,
    /// Columns on an affector strip are invalid.
    pub avoid_affectors: bool,
}

impl Default for SampleFilter {
    fn default() -> Self {
        Self {
            max_slope_deg: 90.0,
            max_height: f32::INFINITY,
            ignore_affectors: false,
            avoid_affectors: false,
        }
    }
}

impl SampleFilter {
    /// Filter used when scattering foliage: slope and height limited, runways avoided.
    pub fn foliage(max_slope_deg: f32, max_height: f32) -> Self {
        Self {
            max_slope_deg,
            max_height,
            ignore_affectors: false,
            avoid_affectors: true,
        }
    }
}

/// One sampled column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightSample {
    /// Input position with `y` replaced by the terrain height (or the sentinel).
    pub position: Vec3,
}

impl HeightSample {
    pub fn is_valid(&self) -> bool {
        self.position.y >= 0.0
    }

    pub fn height(&self) -> Option<f32> {
        self.is_valid().then_some(self.position.y)
    }
}
