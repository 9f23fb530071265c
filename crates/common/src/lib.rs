//! Shared types for the terrastream pipeline.
//!
//! Everything here is a plain value crossing the boundary between the streaming core
//! and a compute device: tile descriptors, read-back buffers, affector records,
//! point-sampling filters and the terrain parameters every backend shares.

mod affector;
mod sample;
mod settings;
mod tile;

pub use affector::Affector;
pub use sample::{HeightSample, INVALID_HEIGHT, SampleFilter};
pub use settings::TerrainSettings;
pub use tile::{LayoutError, MAX_RESOLUTION, RawTileMesh, TileDescriptor, TileLayout};

pub fn crate_info() -> &'static str {
    "terrastream-common v0.1.0"
}
