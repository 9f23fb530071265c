use serde::{Deserialize, Serialize};

/// Global terrain parameters shared by every device backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainSettings {
    /// Edge length of the whole terrain (the quadtree root).
    pub size: f32,
    /// Maximum terrain height.
    pub height: f32,
    /// Triangles entirely below this height are emitted as degenerate.
    pub sea_level: f32,
    pub noise_layers: u32,
    pub base_frequency: f64,
    pub frequency_decay: f64,
    pub amplitude_decay: f64,
    pub seed: u32,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            size: 131_072.0,
            height: 3000.0,
            sea_level: 0.0,
            noise_layers: 20,
            base_frequency: 0.000_05,
            frequency_decay: 1.35,
            amplitude_decay: 0.65,
            seed: 0,
        }
    }
}
