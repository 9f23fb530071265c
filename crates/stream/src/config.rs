use std::path::Path;

use serde::{Deserialize, Serialize};
use terrastream_common::{LayoutError, TerrainSettings, TileLayout};

/// Errors from loading or validating a pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("{field} must be positive")]
    NotPositive { field: &'static str },
    #[error("lod_levels must not be negative, got {0}")]
    NegativeLodLevels(i32),
}

/// Order in which queued tile requests are handed to free workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrder {
    /// Stack discipline: the most recently enqueued request goes first.
    #[default]
    NewestFirst,
    /// Queue discipline: the oldest request goes first.
    OldestFirst,
}

/// What happens to the children of a chunk that collapses back to coarse LOD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrunePolicy {
    /// Hide the children and keep their geometry for when the viewpoint returns.
    #[default]
    Retain,
    /// Destroy the collapsed subtree, cancelling any queued requests.
    Immediate,
}

/// Tile mesh sizing and LOD range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSettings {
    /// Vertices per tile edge. Must be odd.
    pub resolution: u32,
    /// Deepest level that owns geometry; coarser levels are forced scaffold.
    pub lod_levels: i32,
    /// Edge length of the finest tiles.
    pub min_chunk_size: f32,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            resolution: 33,
            lod_levels: 6,
            min_chunk_size: 512.0,
        }
    }
}

impl MeshSettings {
    pub fn layout(&self) -> Result<TileLayout, LayoutError> {
        TileLayout::new(self.resolution)
    }
}

/// Worker pool, bake batch and queue policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub worker_count: usize,
    pub bake_batch_size: usize,
    /// Threads in the bounded pool used to bake one batch.
    pub bake_threads: usize,
    pub dispatch_order: DispatchOrder,
    pub prune: PrunePolicy,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            worker_count: 5,
            bake_batch_size: 16,
            bake_threads: 2,
            dispatch_order: DispatchOrder::default(),
            prune: PrunePolicy::default(),
        }
    }
}

/// Runway placement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub seed: u64,
    /// Number of airports to attempt.
    pub runway_count: u32,
    /// Heading resolution; every second heading is tried.
    pub orientation_samples: u32,
    /// Airports are placed uniformly inside a circle of this radius.
    pub spread_radius: f32,
    pub runway_length: f32,
    pub runway_width: f32,
    /// Maximum deviation of the runway gradient from horizontal, in degrees.
    pub max_slope_deg: f32,
    /// Maximum mean absolute distance between the terrain and the straight profile.
    pub max_mean_deviation: f32,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            runway_count: 4,
            orientation_samples: 16,
            spread_radius: 40_000.0,
            runway_length: 250.0,
            runway_width: 10.0,
            max_slope_deg: 5.0,
            max_mean_deviation: 1.0,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mesh: MeshSettings,
    pub terrain: TerrainSettings,
    pub stream: StreamSettings,
    pub features: FeatureSettings,
}

impl PipelineConfig {
    /// Load a configuration from a `.yaml`, `.yml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&text)?,
            Some("json") => serde_json::from_str(&text)?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ));
            }
        };
        config.validate()?;
        tracing::debug!(path = %path.display(), "pipeline config loaded");
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mesh.layout()?;
        let positive = [
            ("mesh.min_chunk_size", self.mesh.min_chunk_size > 0.0),
            ("terrain.size", self.terrain.size > 0.0),
            ("stream.worker_count", self.stream.worker_count > 0),
            ("stream.bake_batch_size", self.stream.bake_batch_size > 0),
            ("stream.bake_threads", self.stream.bake_threads > 0),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, ok)| !ok) {
            return Err(ConfigError::NotPositive { field: *field });
        }
        if self.mesh.lod_levels < 0 {
            return Err(ConfigError::NegativeLodLevels(self.mesh.lod_levels));
        }
        Ok(())
    }

    /// Depth of the quadtree root: enough halvings of the terrain size to reach
    /// the finest chunk size.
    pub fn root_depth(&self) -> i32 {
        let nodes = (self.terrain.size / self.mesh.min_chunk_size).ceil().max(1.0);
        nodes.log2().floor() as i32
    }
}
