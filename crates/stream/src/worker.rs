use terrastream_common::{TileDescriptor, TileLayout};
use terrastream_device::{ComputeDevice, DeviceError};

use crate::chunk::ChunkId;
use crate::mesh::TileMesh;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Free,
    Busy,
}

/// The job record a worker carries while busy; completions are matched to
/// chunks through it, not through arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileJob {
    pub chunk: ChunkId,
    pub tile: TileDescriptor,
}

/// A finished generation job with tangents computed.
#[derive(Debug)]
pub struct CompletedTile {
    pub chunk: ChunkId,
    pub worker: usize,
    pub mesh: TileMesh,
}

#[derive(Debug)]
pub enum WorkerEvent {
    Completed(CompletedTile),
    /// The readback failed; the worker is free again and the chunk still needs its tile.
    Failed { chunk: ChunkId, error: DeviceError },
}

/// One unit of device generation capacity, owning its buffers for life.
#[derive(Debug)]
pub struct ComputeWorker<B> {
    index: usize,
    layout: TileLayout,
    buffers: B,
    job: Option<TileJob>,
}

impl<B> ComputeWorker<B> {
    pub fn new(index: usize, layout: TileLayout, buffers: B) -> Self {
        Self {
            index,
            layout,
            buffers,
            job: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> WorkerState {
        if self.job.is_some() {
            WorkerState::Busy
        } else {
            WorkerState::Free
        }
    }

    pub fn is_free(&self) -> bool {
        self.job.is_none()
    }

    pub fn job(&self) -> Option<&TileJob> {
        self.job.as_ref()
    }

    /// Start generating `job.tile`.
    ///
    /// # Panics
    ///
    /// Panics if the worker is already busy.
    pub fn submit<D>(&mut self, device: &D, job: TileJob) -> Result<(), DeviceError>
    where
        D: ComputeDevice<TileBuffers = B>,
    {
        if let Some(current) = &self.job {
            panic!(
                "worker {} is busy with chunk {} and cannot accept chunk {}",
                self.index, current.chunk, job.chunk
            );
        }
        device.dispatch_tile(&mut self.buffers, &job.tile)?;
        self.job = Some(job);
        Ok(())
    }

    /// Check the in-flight readback. The worker becomes free when an event is returned.
    pub fn poll<D>(&mut self, device: &D) -> Option<WorkerEvent>
    where
        D: ComputeDevice<TileBuffers = B>,
    {
        let job = self.job?;
        let result = match device.poll_tile(&mut self.buffers) {
            Ok(None) => return None,
            Ok(Some(raw)) if !raw.matches_layout(self.layout) => Err(DeviceError::LayoutMismatch {
                expected: self.layout.vertex_count(),
                actual: raw.vertices.len(),
            }),
            Ok(Some(raw)) => Ok(raw),
            Err(error) => Err(error),
        };
        self.job = None;
        Some(match result {
            Ok(raw) => WorkerEvent::Completed(CompletedTile {
                chunk: job.chunk,
                worker: self.index,
                mesh: TileMesh::from_readback(job.tile, raw),
            }),
            Err(error) => WorkerEvent::Failed {
                chunk: job.chunk,
                error,
            },
        })
    }
}

/// Fixed set of compute workers built once at startup.
#[derive(Debug)]
pub struct WorkerPool<B> {
    workers: Vec<ComputeWorker<B>>,
}

impl<B> WorkerPool<B> {
    pub fn new<D>(device: &D, layout: TileLayout, count: usize) -> Result<Self, DeviceError>
    where
        D: ComputeDevice<TileBuffers = B>,
    {
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let buffers = device.create_tile_buffers(layout)?;
            workers.push(ComputeWorker::new(index, layout, buffers));
        }
        tracing::debug!(count, backend = device.name(), "worker pool created");
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[ComputeWorker<B>] {
        &self.workers
    }

    pub fn has_free_worker(&self) -> bool {
        self.workers.iter().any(ComputeWorker::is_free)
    }

    pub fn busy_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_free()).count()
    }

    /// Chunks currently being generated, in worker order.
    pub fn busy_chunks(&self) -> Vec<ChunkId> {
        self.workers
            .iter()
            .filter_map(|w| w.job().map(|job| job.chunk))
            .collect()
    }

    /// Submit to the first free worker and return its index.
    ///
    /// # Panics
    ///
    /// Panics if no worker is free; callers check [`WorkerPool::has_free_worker`] first.
    pub fn submit<D>(
        &mut self,
        device: &D,
        chunk: ChunkId,
        tile: TileDescriptor,
    ) -> Result<usize, DeviceError>
    where
        D: ComputeDevice<TileBuffers = B>,
    {
        let Some(worker) = self.workers.iter_mut().find(|w| w.is_free()) else {
            panic!("no free worker for chunk {chunk}");
        };
        worker.submit(device, TileJob { chunk, tile })?;
        Ok(worker.index)
    }

    /// Poll every busy worker once.
    pub fn poll<D>(&mut self, device: &D) -> Vec<WorkerEvent>
    where
        D: ComputeDevice<TileBuffers = B>,
    {
        self.workers
            .iter_mut()
            .filter_map(|worker| worker.poll(device))
            .collect()
    }
}
