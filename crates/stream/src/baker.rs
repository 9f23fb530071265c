use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use crate::chunk::ChunkId;
use crate::collider::TerrainCollider;
use crate::mesh::TileMesh;

/// A generated mesh waiting for its collision bake.
#[derive(Debug)]
pub struct BakeRequest {
    pub chunk: ChunkId,
    pub mesh: TileMesh,
    pub needs_collider: bool,
}

/// Output of a bake, ready to be assigned to its chunk.
#[derive(Debug, Clone)]
pub struct BakedTile {
    pub chunk: ChunkId,
    pub mesh: Arc<TileMesh>,
    pub collider: Option<Arc<TerrainCollider>>,
}

impl BakeRequest {
    fn bake(self) -> BakedTile {
        let collider = self
            .needs_collider
            .then(|| Arc::new(TerrainCollider::bake(&self.mesh)));
        BakedTile {
            chunk: self.chunk,
            mesh: Arc::new(self.mesh),
            collider,
        }
    }
}

/// Batched collision baking on a bounded thread pool.
///
/// At most one batch runs at a time. A batch is claimed only when the
/// previous one has been collected, and it contains at most `batch_size`
/// requests; everything else waits in the pending queue.
pub struct CollisionBaker {
    pool: ThreadPool,
    batch_size: usize,
    pending: VecDeque<BakeRequest>,
    in_flight: usize,
    tx: Sender<Vec<BakedTile>>,
    rx: Receiver<Vec<BakedTile>>,
    batches: u64,
}

impl CollisionBaker {
    pub fn new(batch_size: usize, threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("collision-bake-{i}"))
            .build()?;
        let (tx, rx) = crossbeam_channel::unbounded();
        Ok(Self {
            pool,
            batch_size: batch_size.max(1),
            pending: VecDeque::new(),
            in_flight: 0,
            tx,
            rx,
            batches: 0,
        })
    }

    pub fn bake(&mut self, request: BakeRequest) {
        self.pending.push_back(request);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Requests in the batch currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight == 0
    }

    /// No batch running and nothing waiting.
    pub fn is_drained(&self) -> bool {
        self.is_idle() && self.pending.is_empty()
    }

    /// Batches started since construction.
    pub fn batches_started(&self) -> u64 {
        self.batches
    }

    /// Collect a finished batch, if any, then start the next one when idle.
    ///
    /// Never blocks. Results of a batch started here are returned by a later call.
    pub fn update(&mut self) -> Vec<BakedTile> {
        let done = if self.in_flight > 0 {
            match self.rx.try_recv() {
                Ok(batch) => {
                    self.in_flight = 0;
                    batch
                }
                Err(_) => Vec::new(),
            }
        } else {
            Vec::new()
        };
        self.start_batch();
        done
    }

    /// Block until the running batch finishes and return it.
    #[cfg(test)]
    fn wait(&mut self) -> Vec<BakedTile> {
        if self.in_flight == 0 {
            return Vec::new();
        }
        match self.rx.recv() {
            Ok(batch) => {
                self.in_flight = 0;
                batch
            }
            Err(_) => Vec::new(),
        }
    }

    fn start_batch(&mut self) {
        if self.in_flight > 0 || self.pending.is_empty() {
            return;
        }
        let take = self.pending.len().min(self.batch_size);
        let batch: Vec<BakeRequest> = self.pending.drain(..take).collect();
        self.in_flight = batch.len();
        self.batches += 1;
        tracing::debug!(
            batch = self.batches,
            size = batch.len(),
            queued = self.pending.len(),
            "collision bake batch started"
        );
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            let baked: Vec<BakedTile> = batch.into_par_iter().map(BakeRequest::bake).collect();
            // the baker may have been dropped mid-batch
            let _ = tx.send(baked);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::LoadBalancer;
    use crate::chunk::ChunkTree;
    use crate::config::{DispatchOrder, PrunePolicy};
    use glam::Vec3;
    use terrastream_common::{RawTileMesh, TileDescriptor, TileLayout};

    fn requests(count: usize) -> Vec<BakeRequest> {
        let mut lb = LoadBalancer::new(DispatchOrder::OldestFirst);
        let mut tree = ChunkTree::new(
            TileDescriptor::new(Vec3::ZERO, 4096.0, 3),
            3,
            PrunePolicy::Retain,
            &mut lb,
        );
        tree.update_lod(Vec3::ZERO, &mut lb);
        tree.iter()
            .take(count)
            .map(|(chunk, c)| BakeRequest {
                chunk,
                mesh: TileMesh::from_readback(*c.tile(), RawTileMesh::zeroed(TileLayout::new(5).unwrap())),
                needs_collider: c.depth() == 0,
            })
            .collect()
    }

    #[test]
    fn batches_are_bounded_and_nothing_is_dropped() {
        let mut baker = CollisionBaker::new(4, 2).unwrap();
        let all = requests(10);
        assert_eq!(all.len(), 10);
        for request in all {
            baker.bake(request);
        }

        assert!(baker.update().is_empty());
        assert_eq!(baker.in_flight(), 4);
        assert_eq!(baker.pending_len(), 6);

        // requests arriving mid-batch wait for the next one
        baker.bake(requests(1).pop().unwrap());
        let mut delivered = baker.wait().len();
        assert_eq!(delivered, 4);
        assert_eq!(baker.pending_len(), 7);

        while !baker.is_drained() {
            baker.update();
            assert!(baker.in_flight() <= 4);
            delivered += baker.wait().len();
        }
        assert_eq!(delivered, 11);
        assert_eq!(baker.batches_started(), 3);
    }

    #[test]
    fn collider_only_where_requested() {
        let mut baker = CollisionBaker::new(16, 1).unwrap();
        let all = requests(21);
        let expected = all.iter().filter(|r| r.needs_collider).count();
        assert!(expected > 0);
        for request in all {
            baker.bake(request);
        }
        baker.update();
        let baked = baker.wait();
        baker.update();
        let baked: Vec<BakedTile> = baked.into_iter().chain(baker.wait()).collect();
        assert_eq!(baked.len(), 21);
        assert_eq!(baked.iter().filter(|b| b.collider.is_some()).count(), expected);
    }

    #[test]
    fn batch_is_not_returned_in_the_frame_it_starts() {
        let mut baker = CollisionBaker::new(16, 1).unwrap();
        for request in requests(2) {
            baker.bake(request);
        }
        assert!(baker.update().is_empty());
        assert!(!baker.is_idle());
        let mut frames = 0;
        loop {
            frames += 1;
            if !baker.update().is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
            assert!(frames < 5000, "bake batch never completed");
        }
        assert!(baker.is_drained());
    }
}
