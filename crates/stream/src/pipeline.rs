use std::time::Instant;

use glam::{IVec2, Vec2, Vec3};
use terrastream_common::{Affector, SampleFilter, TileDescriptor};
use terrastream_device::{ComputeDevice, DeviceError};

use crate::baker::{BakeRequest, CollisionBaker};
use crate::balancer::{LoadBalancer, SampleHandle};
use crate::budget::FrameStats;
use crate::chunk::ChunkTree;
use crate::config::{ConfigError, PipelineConfig};
use crate::features::plan_runways;
use crate::sampler::PointSampler;
use crate::worker::{WorkerEvent, WorkerPool};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("failed to build bake thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("pipeline already started")]
    AlreadyStarted,
    #[error("affectors must be installed before the pipeline starts")]
    AffectorsAfterStart,
    #[error("pipeline has not been started")]
    NotStarted,
}

/// Owns the chunk tree and every service that feeds it, and advances them
/// once per frame.
///
/// Lifecycle: [`TerrainPipeline::new`], optionally
/// [`TerrainPipeline::load_features`] or [`TerrainPipeline::install_affectors`],
/// then [`TerrainPipeline::start`] and one [`TerrainPipeline::update`] per frame.
pub struct TerrainPipeline<D: ComputeDevice> {
    config: PipelineConfig,
    device: D,
    pool: WorkerPool<D::TileBuffers>,
    balancer: LoadBalancer,
    baker: CollisionBaker,
    tree: Option<ChunkTree>,
    affectors: Vec<Affector>,
    affectors_installed: bool,
    last_cell: Option<IVec2>,
    frame: u64,
}

impl<D: ComputeDevice> TerrainPipeline<D> {
    pub fn new(config: PipelineConfig, device: D) -> Result<Self, PipelineError> {
        config.validate()?;
        let layout = config.mesh.layout().map_err(ConfigError::from)?;
        let pool = WorkerPool::new(&device, layout, config.stream.worker_count)?;
        let baker = CollisionBaker::new(config.stream.bake_batch_size, config.stream.bake_threads)?;
        tracing::info!(
            backend = device.name(),
            workers = config.stream.worker_count,
            resolution = layout.resolution(),
            order = ?config.stream.dispatch_order,
            "terrain pipeline created"
        );
        Ok(Self {
            balancer: LoadBalancer::new(config.stream.dispatch_order),
            config,
            device,
            pool,
            baker,
            tree: None,
            affectors: Vec::new(),
            affectors_installed: false,
            last_cell: None,
            frame: 0,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn sampler(&self) -> PointSampler<'_, D> {
        PointSampler::new(&self.device)
    }

    pub fn affectors(&self) -> &[Affector] {
        &self.affectors
    }

    pub fn is_started(&self) -> bool {
        self.tree.is_some()
    }

    pub fn tree(&self) -> Option<&ChunkTree> {
        self.tree.as_ref()
    }

    /// Upload the feature affector set. Only allowed before [`TerrainPipeline::start`].
    pub fn install_affectors(&mut self, affectors: Vec<Affector>) -> Result<(), PipelineError> {
        if self.is_started() {
            return Err(PipelineError::AffectorsAfterStart);
        }
        self.device.upload_affectors(&affectors)?;
        tracing::info!(count = affectors.len(), slots = self.device.affector_slots(), "affectors installed");
        self.affectors = affectors;
        self.affectors_installed = true;
        Ok(())
    }

    /// Plan runways against the raw terrain and install them as affectors.
    /// Returns the number placed.
    pub fn load_features(&mut self) -> Result<usize, PipelineError> {
        if self.is_started() {
            return Err(PipelineError::AffectorsAfterStart);
        }
        let runways = plan_runways(&self.sampler(), &self.config.features)?;
        let placed = runways.len();
        self.install_affectors(runways)?;
        Ok(placed)
    }

    /// Build the root chunk and run the first LOD walk for `viewpoint`.
    pub fn start(&mut self, viewpoint: Vec3) -> Result<(), PipelineError> {
        if self.is_started() {
            return Err(PipelineError::AlreadyStarted);
        }
        if !self.affectors_installed {
            self.install_affectors(Vec::new())?;
        }
        let root = TileDescriptor::new(Vec3::ZERO, self.config.terrain.size, self.config.root_depth());
        let mut tree = ChunkTree::new(
            root,
            self.config.mesh.lod_levels,
            self.config.stream.prune,
            &mut self.balancer,
        );
        tree.update_lod(viewpoint, &mut self.balancer);
        tracing::info!(
            root_depth = root.depth,
            size = root.size,
            chunks = tree.len(),
            queued = self.balancer.backlog_len(),
            "terrain pipeline started"
        );
        self.last_cell = Some(self.viewpoint_cell(viewpoint));
        self.tree = Some(tree);
        Ok(())
    }

    fn viewpoint_cell(&self, viewpoint: Vec3) -> IVec2 {
        (Vec2::new(viewpoint.x, viewpoint.z) / self.config.mesh.min_chunk_size)
            .round()
            .as_ivec2()
    }

    /// Advance one frame: LOD walk if needed, collect readbacks, dispatch,
    /// service one sample request, and move bake batches along.
    pub fn update(&mut self, viewpoint: Vec3) -> Result<FrameStats, PipelineError> {
        let started = Instant::now();
        let _span = tracing::info_span!("pipeline_update", frame = self.frame).entered();
        let cell = self.viewpoint_cell(viewpoint);
        let Some(tree) = self.tree.as_mut() else {
            return Err(PipelineError::NotStarted);
        };

        let walked = self.last_cell != Some(cell) || tree.walk_requested();
        if walked {
            tree.update_lod(viewpoint, &mut self.balancer);
            self.last_cell = Some(cell);
        }

        let mut completed = 0;
        for event in self.pool.poll(&self.device) {
            match event {
                WorkerEvent::Completed(done) => {
                    if !tree.contains(done.chunk) {
                        tracing::debug!(chunk = %done.chunk, "discarding tile for destroyed chunk");
                        continue;
                    }
                    completed += 1;
                    let needs_collider = tree.needs_collider(done.mesh.tile.depth);
                    self.baker.bake(BakeRequest {
                        chunk: done.chunk,
                        mesh: done.mesh,
                        needs_collider,
                    });
                }
                WorkerEvent::Failed { chunk, error } => {
                    tracing::error!(chunk = %chunk, %error, "tile readback failed");
                    tree.retry_tile(chunk, &mut self.balancer);
                }
            }
        }

        let dispatched = self.balancer.dispatch_tiles(&mut self.pool, &self.device, tree);
        let samples_serviced =
            usize::from(self.balancer.service_samples(&PointSampler::new(&self.device)));

        let mut baked = 0;
        for tile in self.baker.update() {
            if tree.assign_ready(tile) {
                baked += 1;
            }
        }

        let stats = FrameStats {
            walked,
            dispatched,
            completed,
            baked,
            samples_serviced,
            backlog: self.balancer.backlog_len(),
            in_flight: self.pool.busy_count(),
            pending_bakes: self.baker.pending_len() + self.baker.in_flight(),
            chunks: tree.len(),
            frame_time: started.elapsed(),
        };
        tracing::trace!(
            dispatched,
            completed,
            baked,
            backlog = stats.backlog,
            in_flight = stats.in_flight,
            "frame complete"
        );
        self.frame += 1;
        Ok(stats)
    }

    /// Queue a sample request serviced by a later [`TerrainPipeline::update`].
    pub fn request_samples(&mut self, points: Vec<Vec3>, filter: SampleFilter) -> SampleHandle {
        self.balancer.request_samples(points, filter)
    }

    /// Monotonic count of tile jobs handed to workers.
    pub fn dispatched_jobs(&self) -> u64 {
        self.balancer.dispatched_jobs()
    }

    pub fn backlog_len(&self) -> usize {
        self.balancer.backlog_len()
    }

    pub fn in_flight(&self) -> usize {
        self.pool.busy_count()
    }

    /// Fraction of `expected` jobs dispatched so far, clamped to 1.
    pub fn progress(&self, expected: u64) -> f32 {
        if expected == 0 {
            return 1.0;
        }
        (self.dispatched_jobs() as f64 / expected as f64).min(1.0) as f32
    }

    /// True once every queued, running and baking piece of work has landed
    /// and the tree reflects it.
    pub fn is_drained(&self) -> bool {
        self.balancer.backlog_len() == 0
            && self.balancer.sample_backlog_len() == 0
            && self.pool.busy_count() == 0
            && self.baker.is_drained()
            && self.tree.as_ref().is_none_or(|tree| !tree.walk_requested())
    }

    /// Height of the finest baked collider under world column `(x, z)`.
    pub fn collision_height(&self, x: f32, z: f32) -> Option<f32> {
        let tree = self.tree.as_ref()?;
        tree.iter()
            .filter_map(|(_, chunk)| {
                let tile = chunk.tile();
                let half = tile.size * 0.5;
                let inside = (x - tile.origin.x).abs() <= half && (z - tile.origin.z).abs() <= half;
                let collider = chunk.collider().filter(|_| inside)?;
                collider.height_at(x, z).map(|h| (tile.depth, h))
            })
            .min_by_key(|(depth, _)| *depth)
            .map(|(_, h)| h)
    }
}

impl<D: ComputeDevice> Drop for TerrainPipeline<D> {
    fn drop(&mut self) {
        if let Some(tree) = self.tree.as_mut() {
            tree.teardown(&mut self.balancer);
            tracing::debug!(
                dispatched = self.balancer.dispatched_jobs(),
                in_flight = self.pool.busy_count(),
                "terrain pipeline shut down"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchOrder, MeshSettings, PrunePolicy};
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::time::Duration;
    use terrastream_common::{HeightSample, RawTileMesh, TerrainSettings, TileLayout};
    use terrastream_device::{HeightfieldDevice, HeightfieldTileBuffers};

    const MAX_FRAMES: usize = 20_000;

    fn config(workers: usize) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.terrain = TerrainSettings {
            size: 4096.0,
            height: 500.0,
            noise_layers: 4,
            base_frequency: 0.001,
            ..TerrainSettings::default()
        };
        config.mesh = MeshSettings {
            resolution: 5,
            lod_levels: 6,
            min_chunk_size: 64.0,
        };
        config.stream.worker_count = workers;
        config.stream.bake_threads = 1;
        config
    }

    fn pipeline(config: PipelineConfig, latency: u32) -> TerrainPipeline<HeightfieldDevice> {
        let device = HeightfieldDevice::new(&config.terrain).with_readback_latency(latency);
        TerrainPipeline::new(config, device).unwrap()
    }

    /// Run frames at a fixed viewpoint until everything has landed.
    fn run_until_drained<D: ComputeDevice>(pipeline: &mut TerrainPipeline<D>, viewpoint: Vec3) -> usize {
        for frame in 1..=MAX_FRAMES {
            let stats = pipeline.update(viewpoint).unwrap();
            assert!(stats.in_flight <= pipeline.config().stream.worker_count);
            if pipeline.is_drained() {
                return frame;
            }
            if stats.pending_bakes > 0 && stats.backlog == 0 && stats.in_flight == 0 {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
        panic!("pipeline did not drain within {MAX_FRAMES} frames");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config(2);
        config.mesh.resolution = 6;
        let device = HeightfieldDevice::new(&config.terrain);
        assert!(matches!(
            TerrainPipeline::new(config, device),
            Err(PipelineError::Config(ConfigError::Layout(_)))
        ));
    }

    #[test]
    fn lifecycle_misuse_is_reported() {
        let mut p = pipeline(config(2), 0);
        assert!(matches!(p.update(Vec3::ZERO), Err(PipelineError::NotStarted)));
        p.start(Vec3::ZERO).unwrap();
        assert!(matches!(p.start(Vec3::ZERO), Err(PipelineError::AlreadyStarted)));
        assert!(matches!(
            p.install_affectors(Vec::new()),
            Err(PipelineError::AffectorsAfterStart)
        ));
        assert!(matches!(p.load_features(), Err(PipelineError::AffectorsAfterStart)));
    }

    #[test]
    fn start_without_features_binds_placeholder() {
        let mut p = pipeline(config(2), 0);
        p.start(Vec3::ZERO).unwrap();
        assert!(p.affectors().is_empty());
        assert_eq!(p.device().affector_slots(), 1);
    }

    #[test]
    fn distant_viewpoint_keeps_single_root_leaf() {
        let mut p = pipeline(config(2), 1);
        let far = Vec3::new(10_000.0, 0.0, 0.0);
        p.start(far).unwrap();
        let tree = p.tree().unwrap();
        assert_eq!(tree.get(tree.root()).unwrap().depth(), 6);
        run_until_drained(&mut p, far);

        let tree = p.tree().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.displayed(), vec![tree.root()]);
        assert_eq!(p.dispatched_jobs(), 1);

        let near = Vec3::new(4000.0, 0.0, 0.0);
        p.update(near).unwrap();
        assert!(p.tree().unwrap().get(p.tree().unwrap().root()).unwrap().is_fragmented());
    }

    #[test]
    fn teleport_descends_in_one_walk_and_drains_at_worker_rate() {
        let mut p = pipeline(config(2), 0);
        p.start(Vec3::new(100_000.0, 0.0, 0.0)).unwrap();
        run_until_drained(&mut p, Vec3::new(100_000.0, 0.0, 0.0));
        assert_eq!(p.tree().unwrap().len(), 1);

        let near = Vec3::new(10.0, 0.0, 0.0);
        let first = p.update(near).unwrap();
        assert!(first.walked);
        let tree = p.tree().unwrap();
        let leaf = tree.iter().any(|(_, c)| {
            c.depth() == 0
                && (c.origin().x - near.x).abs() <= c.size() * 0.5
                && (c.origin().z - near.z).abs() <= c.size() * 0.5
        });
        assert!(leaf, "first walk did not reach the finest level");
        let required = first.backlog + first.dispatched;
        assert!(required >= 4);
        assert!(first.dispatched <= 2);

        let mut frames = 1;
        let mut stats = first;
        while stats.backlog > 0 {
            stats = p.update(near).unwrap();
            assert!(stats.dispatched <= 2);
            assert!(stats.in_flight <= 2);
            frames += 1;
        }
        assert!(frames >= required.div_ceil(2), "{required} tiles left the queue in {frames} frames");
    }

    #[test]
    fn teleporting_away_drops_hidden_requests() {
        let mut p = pipeline(config(2), 1);
        let near = Vec3::new(10.0, 0.0, 10.0);
        p.start(near).unwrap();
        p.update(near).unwrap();
        assert!(p.backlog_len() > 2);
        let dispatched = p.dispatched_jobs();

        let far = Vec3::new(100_000.0, 0.0, 100_000.0);
        let stats = p.update(far).unwrap();
        assert!(stats.walked);
        // only the root, still shown, keeps a queued request
        assert!(p.backlog_len() <= 1, "{} requests left after collapse", p.backlog_len());

        run_until_drained(&mut p, far);
        assert!(p.dispatched_jobs() <= dispatched + 1);
        let tree = p.tree().unwrap();
        assert_eq!(tree.displayed(), vec![tree.root()]);

        // coming back asks for the released tiles again
        run_until_drained(&mut p, near);
        let tree = p.tree().unwrap();
        assert!(tree.displayed().iter().any(|&id| tree.get(id).unwrap().depth() == 0));
    }

    #[test]
    fn chunk_not_ready_in_frame_its_tile_arrives() {
        let mut p = pipeline(config(2), 0);
        p.start(Vec3::new(100_000.0, 0.0, 0.0)).unwrap();
        let viewpoint = Vec3::new(100_000.0, 0.0, 0.0);

        let first = p.update(viewpoint).unwrap();
        assert_eq!(first.dispatched, 1);
        let second = p.update(viewpoint).unwrap();
        assert_eq!(second.completed, 1);
        assert_eq!(second.baked, 0);
        let tree = p.tree().unwrap();
        assert!(!tree.get(tree.root()).unwrap().is_ready());

        run_until_drained(&mut p, viewpoint);
        let tree = p.tree().unwrap();
        let root = tree.get(tree.root()).unwrap();
        assert!(root.is_ready());
        assert!(root.mesh().is_some());
        assert!(root.collider().is_some());
    }

    #[test]
    fn drained_tree_tiles_the_root_without_overlap() {
        for order in [DispatchOrder::NewestFirst, DispatchOrder::OldestFirst] {
            let mut config = config(3);
            config.stream.dispatch_order = order;
            let mut p = pipeline(config, 1);
            let viewpoint = Vec3::new(700.0, 0.0, -300.0);
            p.start(viewpoint).unwrap();
            run_until_drained(&mut p, viewpoint);

            let tree = p.tree().unwrap();
            let shown = tree.displayed();
            let area: f32 = shown
                .iter()
                .map(|&id| tree.get(id).unwrap().size().powi(2))
                .sum();
            assert_eq!(area, 4096.0 * 4096.0, "{order:?}");
            assert!(tree.iter().all(|(_, c)| c.is_ready()));
            for (_, chunk) in tree.iter() {
                if tree.needs_collider(chunk.depth()) {
                    assert!(chunk.collider().is_some());
                } else {
                    assert!(chunk.collider().is_none());
                }
            }
            assert_eq!(p.progress(p.dispatched_jobs()), 1.0);
        }
    }

    #[test]
    fn dispatch_order_changes_which_tiles_finish_first() {
        let first_ready = |order: DispatchOrder| {
            let mut config = config(1);
            config.stream.dispatch_order = order;
            let mut p = pipeline(config, 0);
            let viewpoint = Vec3::new(10.0, 0.0, 10.0);
            p.start(viewpoint).unwrap();
            for _ in 0..MAX_FRAMES {
                p.update(viewpoint).unwrap();
                let tree = p.tree().unwrap();
                if let Some((_, chunk)) = tree.iter().find(|(_, c)| c.is_ready()) {
                    return chunk.depth();
                }
                std::thread::sleep(Duration::from_micros(200));
            }
            panic!("nothing became ready");
        };
        assert_eq!(first_ready(DispatchOrder::OldestFirst), 6);
        assert_eq!(first_ready(DispatchOrder::NewestFirst), 0);
    }

    #[test]
    fn collision_query_uses_finest_collider() {
        let mut p = pipeline(config(4), 0);
        let viewpoint = Vec3::new(30.0, 0.0, 30.0);
        p.start(viewpoint).unwrap();
        run_until_drained(&mut p, viewpoint);

        let h = p.collision_height(30.0, 30.0).unwrap();
        let expected = p.device().heightfield().height(Vec2::new(30.0, 30.0), p.affectors());
        assert!((h - expected).abs() < 25.0, "collider {h}, terrain {expected}");
        assert!(p.collision_height(10_000.0, 0.0).is_none());
    }

    #[test]
    fn immediate_prune_discards_late_results() {
        let mut config = config(2);
        config.stream.prune = PrunePolicy::Immediate;
        let mut p = pipeline(config, 2);
        p.start(Vec3::ZERO).unwrap();
        p.update(Vec3::ZERO).unwrap();
        assert_eq!(p.in_flight(), 2);

        let far = Vec3::new(100_000.0, 0.0, 100_000.0);
        p.update(far).unwrap();
        run_until_drained(&mut p, far);
        let tree = p.tree().unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.is_consistent());
        assert_eq!(tree.displayed(), vec![tree.root()]);
    }

    #[test]
    fn runway_sampling_through_pipeline() {
        let mut config = config(2);
        config.terrain.height = 200.0;
        config.terrain.base_frequency = 0.0002;
        config.features.max_mean_deviation = 50.0;
        config.features.spread_radius = 1500.0;
        config.features.runway_count = 1;
        let mut p = pipeline(config, 0);
        assert_eq!(p.load_features().unwrap(), 1);
        assert_eq!(p.device().affector_slots(), 1);

        let runway = p.affectors()[0];
        let sampler = p.sampler();
        let samples = sampler
            .sample_line(runway.approach, runway.departure, 10, &SampleFilter::default())
            .unwrap();
        let expected: Vec<f32> = (0..10)
            .map(|i| runway.approach.y + (runway.departure.y - runway.approach.y) * i as f32 / 9.0)
            .collect();
        for (sample, want) in samples.iter().zip(&expected) {
            assert!((sample.height().unwrap() - want).abs() < 0.01);
        }

        // the same query through the per-frame sample queue
        p.start(Vec3::ZERO).unwrap();
        let points: Vec<Vec3> = samples.iter().map(|s| s.position).collect();
        let handle = p.request_samples(points, SampleFilter::default());
        assert!(handle.try_take().is_none());
        let stats = p.update(Vec3::ZERO).unwrap();
        assert_eq!(stats.samples_serviced, 1);
        let queued: Vec<HeightSample> = handle.try_take().unwrap().unwrap();
        assert_eq!(queued, samples);
    }

    /// Reference device whose first `failures` dispatches are rejected.
    struct FlakyDevice {
        inner: HeightfieldDevice,
        failures: Cell<u32>,
    }

    impl ComputeDevice for FlakyDevice {
        type TileBuffers = HeightfieldTileBuffers;

        fn name(&self) -> &str {
            "flaky"
        }

        fn create_tile_buffers(&self, layout: TileLayout) -> Result<Self::TileBuffers, DeviceError> {
            self.inner.create_tile_buffers(layout)
        }

        fn dispatch_tile(&self, buffers: &mut Self::TileBuffers, tile: &TileDescriptor) -> Result<(), DeviceError> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(DeviceError::Readback("device lost".into()));
            }
            self.inner.dispatch_tile(buffers, tile)
        }

        fn poll_tile(&self, buffers: &mut Self::TileBuffers) -> Result<Option<RawTileMesh>, DeviceError> {
            self.inner.poll_tile(buffers)
        }

        fn sample_points(&self, points: &[Vec3], filter: &SampleFilter) -> Result<Vec<Vec3>, DeviceError> {
            self.inner.sample_points(points, filter)
        }

        fn upload_affectors(&mut self, affectors: &[Affector]) -> Result<(), DeviceError> {
            self.inner.upload_affectors(affectors)
        }

        fn affector_slots(&self) -> usize {
            self.inner.affector_slots()
        }
    }

    #[test]
    fn failed_dispatch_is_retried() {
        let config = config(2);
        let device = FlakyDevice {
            inner: HeightfieldDevice::new(&config.terrain).with_readback_latency(0),
            failures: Cell::new(3),
        };
        let mut p = TerrainPipeline::new(config, device).unwrap();
        let far = Vec3::new(50_000.0, 0.0, 0.0);
        p.start(far).unwrap();
        for _ in 0..3 {
            let stats = p.update(far).unwrap();
            assert_eq!(stats.dispatched, 0);
            assert_eq!(stats.backlog, 1);
        }
        run_until_drained(&mut p, far);
        assert_eq!(p.dispatched_jobs(), 1);
        let tree = p.tree().unwrap();
        assert!(tree.get(tree.root()).unwrap().is_ready());
    }

    #[test]
    fn progress_counts_dispatched_jobs() {
        let mut p = pipeline(config(2), 0);
        assert_eq!(p.progress(0), 1.0);
        p.start(Vec3::ZERO).unwrap();
        assert_eq!(p.progress(10), 0.0);
        p.update(Vec3::ZERO).unwrap();
        assert!((p.progress(10) - 0.2).abs() < 1e-6);
        assert_eq!(p.progress(1), 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn in_flight_never_exceeds_worker_count(
            workers in 1usize..4,
            latency in 0u32..3,
            path in prop::collection::vec((-1500.0f32..1500.0, -1500.0f32..1500.0), 1..6),
            frames_per_stop in 1usize..20,
        ) {
            let mut config = config(workers);
            config.terrain.size = 1024.0;
            config.mesh.lod_levels = 4;
            config.mesh.resolution = 3;
            let mut p = pipeline(config, latency);
            p.start(Vec3::ZERO).unwrap();
            for (x, z) in path {
                let viewpoint = Vec3::new(x, 0.0, z);
                for _ in 0..frames_per_stop {
                    let stats = p.update(viewpoint).unwrap();
                    prop_assert!(stats.in_flight <= workers);
                    prop_assert!(stats.dispatched <= workers);
                }
                prop_assert!(p.tree().unwrap().is_consistent());
            }
        }
    }
}
