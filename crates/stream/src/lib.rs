//! Streaming: quadtree terrain LOD, bounded tile generation, collision baking.
//!
//! # Invariants
//! - A chunk is fragmented iff it has exactly four live children.
//! - At most `worker_count` tile jobs are in flight; a busy worker never accepts a job.
//! - A chunk becomes ready only after its mesh and any required collider have arrived.
//! - A parent keeps drawing its own tile until all four children are ready.
//! - Only the thread driving [`TerrainPipeline::update`] mutates the chunk tree.
//!
//! # Workaround
//! Bake completion is delivered over a channel and picked up by the next
//! frame update, so a batch started in one frame is observed no earlier than
//! the following one. The frame loop polls; nothing here blocks on the device.

mod baker;
mod balancer;
mod budget;
mod chunk;
mod collider;
mod config;
mod features;
mod mesh;
mod pipeline;
mod sampler;
mod worker;

pub use baker::{BakeRequest, BakedTile, CollisionBaker};
pub use balancer::{LoadBalancer, SampleHandle, SampleRequest, SampleResult};
pub use budget::{FrameBudget, FrameStats};
pub use chunk::{Chunk, ChunkId, ChunkTree};
pub use collider::{Aabb, TerrainCollider};
pub use config::{
    ConfigError, DispatchOrder, FeatureSettings, MeshSettings, PipelineConfig, PrunePolicy,
    StreamSettings,
};
pub use features::{Rejection, evaluate_profile, plan_runways};
pub use mesh::TileMesh;
pub use pipeline::{PipelineError, TerrainPipeline};
pub use sampler::PointSampler;
pub use worker::{CompletedTile, ComputeWorker, TileJob, WorkerEvent, WorkerPool, WorkerState};

pub fn crate_info() -> &'static str {
    "terrastream-stream v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("stream"));
    }
}
