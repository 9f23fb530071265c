use std::collections::{HashSet, VecDeque};

use crossbeam_channel::{Receiver, Sender};
use glam::Vec3;
use terrastream_common::{HeightSample, SampleFilter};
use terrastream_device::{ComputeDevice, DeviceError};

use crate::chunk::{ChunkId, ChunkTree};
use crate::config::DispatchOrder;
use crate::sampler::PointSampler;
use crate::worker::WorkerPool;

/// Result delivered to a [`SampleHandle`].
pub type SampleResult = Result<Vec<HeightSample>, DeviceError>;

/// A queued batch of columns to sample.
#[derive(Debug)]
pub struct SampleRequest {
    pub points: Vec<Vec3>,
    pub filter: SampleFilter,
    reply: Sender<SampleResult>,
}

/// Receiving end of an asynchronous sample request.
#[derive(Debug)]
pub struct SampleHandle {
    rx: Receiver<SampleResult>,
}

impl SampleHandle {
    /// Take the result if the request has been serviced.
    pub fn try_take(&self) -> Option<SampleResult> {
        self.rx.try_recv().ok()
    }
}

/// Admission control between chunk requests and the worker pool.
///
/// Holds the tile and sample backlogs and drains them once per frame: tiles
/// while workers are free, samples one request at a time.
#[derive(Debug)]
pub struct LoadBalancer {
    order: DispatchOrder,
    tiles: VecDeque<ChunkId>,
    samples: VecDeque<SampleRequest>,
    dispatched: u64,
}

impl LoadBalancer {
    pub fn new(order: DispatchOrder) -> Self {
        Self {
            order,
            tiles: VecDeque::new(),
            samples: VecDeque::new(),
            dispatched: 0,
        }
    }

    pub fn order(&self) -> DispatchOrder {
        self.order
    }

    pub fn enqueue_tile(&mut self, chunk: ChunkId) {
        self.tiles.push_back(chunk);
    }

    /// Remove a still-queued request. Dispatched requests are not affected.
    pub fn cancel_tile(&mut self, chunk: ChunkId) -> bool {
        !self.cancel_tiles(&HashSet::from([chunk])).is_empty()
    }

    /// Remove every queued request for `chunks` in one pass over the backlog.
    /// Returns the chunks whose requests were removed.
    pub fn cancel_tiles(&mut self, chunks: &HashSet<ChunkId>) -> Vec<ChunkId> {
        if chunks.is_empty() {
            return Vec::new();
        }
        let mut cancelled = Vec::new();
        self.tiles.retain(|queued| {
            let keep = !chunks.contains(queued);
            if !keep {
                cancelled.push(*queued);
            }
            keep
        });
        if !cancelled.is_empty() {
            tracing::debug!(count = cancelled.len(), "queued tile requests cancelled");
        }
        cancelled
    }

    pub fn backlog_len(&self) -> usize {
        self.tiles.len()
    }

    pub fn sample_backlog_len(&self) -> usize {
        self.samples.len()
    }

    /// Tile jobs handed to workers since construction.
    pub fn dispatched_jobs(&self) -> u64 {
        self.dispatched
    }

    pub fn request_samples(&mut self, points: Vec<Vec3>, filter: SampleFilter) -> SampleHandle {
        let (reply, rx) = crossbeam_channel::bounded(1);
        self.samples.push_back(SampleRequest {
            points,
            filter,
            reply,
        });
        SampleHandle { rx }
    }

    fn pop_tile(&mut self) -> Option<ChunkId> {
        match self.order {
            DispatchOrder::NewestFirst => self.tiles.pop_back(),
            DispatchOrder::OldestFirst => self.tiles.pop_front(),
        }
    }

    /// Hand queued tiles to free workers. Returns the number dispatched.
    ///
    /// Requests for chunks that are gone or already ready are discarded. A
    /// request whose dispatch fails goes back on the queue and draining stops
    /// for this frame.
    pub fn dispatch_tiles<D: ComputeDevice>(
        &mut self,
        pool: &mut WorkerPool<D::TileBuffers>,
        device: &D,
        tree: &ChunkTree,
    ) -> usize {
        let mut count = 0;
        while pool.has_free_worker() {
            let Some(chunk) = self.pop_tile() else {
                break;
            };
            let Some(tile) = tree.pending_tile(chunk) else {
                tracing::debug!(chunk = %chunk, "skipping stale tile request");
                continue;
            };
            match pool.submit(device, chunk, tile) {
                Ok(worker) => {
                    self.dispatched += 1;
                    count += 1;
                    tracing::debug!(chunk = %chunk, worker, depth = tile.depth, "tile dispatched");
                }
                Err(error) => {
                    tracing::error!(chunk = %chunk, %error, "tile dispatch failed");
                    self.tiles.push_back(chunk);
                    break;
                }
            }
        }
        count
    }

    /// Service at most one queued sample request. Returns whether one was serviced.
    pub fn service_samples<D: ComputeDevice>(&mut self, sampler: &PointSampler<'_, D>) -> bool {
        let Some(request) = self.samples.pop_front() else {
            return false;
        };
        let result = sampler.sample(&request.points, &request.filter);
        if let Err(error) = &result {
            tracing::warn!(%error, points = request.points.len(), "sample request failed");
        }
        // the requester may have dropped its handle
        let _ = request.reply.send(result);
        true
    }
}
