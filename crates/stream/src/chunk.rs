use std::collections::HashSet;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use glam::{Vec2, Vec3};
use terrastream_common::TileDescriptor;

use crate::baker::BakedTile;
use crate::balancer::LoadBalancer;
use crate::collider::TerrainCollider;
use crate::config::PrunePolicy;
use crate::mesh::TileMesh;

/// Child centers relative to the parent, in units of a quarter of the parent size.
const CHILD_OFFSETS: [Vec3; 4] = [
    Vec3::new(1.0, 0.0, 1.0),
    Vec3::new(1.0, 0.0, -1.0),
    Vec3::new(-1.0, 0.0, 1.0),
    Vec3::new(-1.0, 0.0, -1.0),
];

/// Generational handle to a chunk in a [`ChunkTree`].
///
/// A handle outlives its chunk: once the slot is reused the generation no
/// longer matches and lookups return `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkId {
    index: u32,
    generation: u32,
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// One quadtree node.
#[derive(Debug)]
pub struct Chunk {
    tile: TileDescriptor,
    parent: Option<ChunkId>,
    children: Option<[ChunkId; 4]>,
    forced: bool,
    ready: bool,
    can_disable: bool,
    /// Set by the parent; an inactive chunk hides its whole subtree.
    active: bool,
    /// Whether this chunk draws its own terrain when visible.
    terrain_enabled: bool,
    /// A generation request is queued or running for this chunk.
    requested: bool,
    /// The last walk found the viewpoint out of range and hid the children.
    collapsed: bool,
    mesh: Option<Arc<TileMesh>>,
    collider: Option<Arc<TerrainCollider>>,
}

impl Chunk {
    pub fn tile(&self) -> &TileDescriptor {
        &self.tile
    }

    pub fn origin(&self) -> Vec3 {
        self.tile.origin
    }

    pub fn size(&self) -> f32 {
        self.tile.size
    }

    pub fn depth(&self) -> i32 {
        self.tile.depth
    }

    pub fn parent(&self) -> Option<ChunkId> {
        self.parent
    }

    pub fn children(&self) -> Option<[ChunkId; 4]> {
        self.children
    }

    pub fn is_fragmented(&self) -> bool {
        self.children.is_some()
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn can_disable(&self) -> bool {
        self.can_disable
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn terrain_enabled(&self) -> bool {
        self.terrain_enabled
    }

    pub fn mesh(&self) -> Option<&Arc<TileMesh>> {
        self.mesh.as_ref()
    }

    pub fn collider(&self) -> Option<&Arc<TerrainCollider>> {
        self.collider.as_ref()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    chunk: Option<Chunk>,
}

/// Arena-backed terrain quadtree.
///
/// Chunks with depth in `0..=lod_levels` own geometry and request it from the
/// [`LoadBalancer`] when created. Deeper chunks are forced scaffold that always
/// defers to its children.
#[derive(Debug)]
pub struct ChunkTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: ChunkId,
    lod_levels: i32,
    prune: PrunePolicy,
    live: usize,
    walk_requested: bool,
}

impl ChunkTree {
    pub fn new(
        root: TileDescriptor,
        lod_levels: i32,
        prune: PrunePolicy,
        balancer: &mut LoadBalancer,
    ) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: ChunkId {
                index: 0,
                generation: 0,
            },
            lod_levels,
            prune,
            live: 0,
            walk_requested: false,
        };
        let root = tree.spawn(root, None, balancer);
        tree.root = root;
        tree.set_active(root, true);
        tree
    }

    pub fn root(&self) -> ChunkId {
        self.root
    }

    pub fn lod_levels(&self) -> i32 {
        self.lod_levels
    }

    /// Number of live chunks.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.chunk.as_ref())
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.chunk.as_ref().map(|chunk| {
                (
                    ChunkId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    chunk,
                )
            })
        })
    }

    pub fn owns_geometry(&self, depth: i32) -> bool {
        (0..=self.lod_levels).contains(&depth)
    }

    pub fn needs_collider(&self, depth: i32) -> bool {
        depth == 0 || depth == self.lod_levels
    }

    /// Tile to generate for `id`, or `None` if the chunk is gone or already ready.
    pub fn pending_tile(&self, id: ChunkId) -> Option<TileDescriptor> {
        self.get(id)
            .filter(|chunk| !chunk.ready && self.owns_geometry(chunk.tile.depth))
            .map(|chunk| chunk.tile)
    }

    /// True when chunks became ready since the last LOD walk.
    pub fn walk_requested(&self) -> bool {
        self.walk_requested
    }

    /// Walk the tree from the root, fragmenting and collapsing for `viewpoint`.
    pub fn update_lod(&mut self, viewpoint: Vec3, balancer: &mut LoadBalancer) {
        let _span = tracing::info_span!("update_lod").entered();
        self.walk_requested = false;
        let before = self.live;
        self.update_node(self.root, viewpoint, balancer);
        tracing::trace!(
            chunks = self.live,
            created = self.live.saturating_sub(before),
            "lod walk complete"
        );
    }

    fn update_node(&mut self, id: ChunkId, viewpoint: Vec3, balancer: &mut LoadBalancer) {
        let Some(chunk) = self.get(id) else {
            return;
        };
        let tile = chunk.tile;
        let forced = chunk.forced;
        if !chunk.ready && !chunk.requested && self.owns_geometry(tile.depth) {
            self.request(id, balancer);
        }
        if tile.depth <= 0 {
            return;
        }

        if tile.depth > self.lod_levels {
            let children = self.fragment(id, balancer);
            if let Some(chunk) = self.chunk_mut(id) {
                chunk.forced = true;
                chunk.can_disable = true;
                chunk.terrain_enabled = false;
            }
            for child in children {
                self.set_active(child, true);
                self.update_node(child, viewpoint, balancer);
            }
            return;
        }

        let offset = Vec2::new(viewpoint.x - tile.origin.x, viewpoint.z - tile.origin.z);
        if offset.length_squared() > tile.size * tile.size && !forced {
            self.collapse(id, balancer);
            return;
        }

        let children = self.fragment(id, balancer);
        let can_disable = self.refresh_can_disable(id);
        if let Some(chunk) = self.chunk_mut(id) {
            chunk.terrain_enabled = !can_disable;
            chunk.collapsed = false;
        }
        // Children are walked even while hidden so a single pass requests
        // every tile down to the viewpoint.
        for child in children {
            self.set_active(child, can_disable);
            self.update_node(child, viewpoint, balancer);
        }
    }

    fn fragment(&mut self, id: ChunkId, balancer: &mut LoadBalancer) -> [ChunkId; 4] {
        if let Some(children) = self.get(id).and_then(|chunk| chunk.children) {
            return children;
        }
        let Some(parent) = self.get(id).map(|chunk| chunk.tile) else {
            return [id; 4];
        };
        let children = CHILD_OFFSETS.map(|offset| {
            let tile = TileDescriptor::new(
                parent.origin + offset * (parent.size * 0.25),
                parent.size * 0.5,
                parent.depth - 1,
            );
            self.spawn(tile, Some(id), balancer)
        });
        if let Some(chunk) = self.chunk_mut(id) {
            chunk.children = Some(children);
        }
        tracing::debug!(chunk = %id, depth = parent.depth, size = parent.size, "chunk fragmented");
        children
    }

    fn collapse(&mut self, id: ChunkId, balancer: &mut LoadBalancer) {
        let prune = self.prune;
        let Some(chunk) = self.chunk_mut(id) else {
            return;
        };
        chunk.terrain_enabled = true;
        let was_collapsed = std::mem::replace(&mut chunk.collapsed, true);
        let Some(children) = chunk.children else {
            return;
        };
        match prune {
            PrunePolicy::Retain => {
                for child in children {
                    self.set_active(child, false);
                }
                if !was_collapsed {
                    self.release_requests(&children, balancer);
                }
            }
            PrunePolicy::Immediate => {
                chunk.children = None;
                chunk.can_disable = false;
                self.destroy_subtrees(&children, balancer);
                tracing::debug!(chunk = %id, chunks = self.live, "collapsed subtree pruned");
            }
        }
    }

    /// Withdraw the queued requests of every chunk under `roots`. Running jobs
    /// are left alone; the next walk that reaches a chunk asks again.
    fn release_requests(&mut self, roots: &[ChunkId], balancer: &mut LoadBalancer) {
        let mut queued = HashSet::new();
        let mut stack = roots.to_vec();
        while let Some(id) = stack.pop() {
            let Some(chunk) = self.get(id) else {
                continue;
            };
            if chunk.requested {
                queued.insert(id);
            }
            stack.extend(chunk.children.into_iter().flatten());
        }
        let released = balancer.cancel_tiles(&queued);
        for &id in &released {
            if let Some(chunk) = self.chunk_mut(id) {
                chunk.requested = false;
            }
        }
        if !released.is_empty() {
            tracing::debug!(released = released.len(), "hidden chunk requests released");
        }
    }

    fn request(&mut self, id: ChunkId, balancer: &mut LoadBalancer) {
        if let Some(chunk) = self.chunk_mut(id) {
            chunk.requested = true;
            balancer.enqueue_tile(id);
            tracing::debug!(chunk = %id, "tile requested again");
        }
    }

    /// Queue `id` again after its job failed. A chunk hidden under a collapsed
    /// ancestor is not queued; it asks again once a walk reaches it.
    pub fn retry_tile(&mut self, id: ChunkId, balancer: &mut LoadBalancer) -> bool {
        let Some(chunk) = self.get(id) else {
            return false;
        };
        if chunk.ready {
            return false;
        }
        let mut ancestor = chunk.parent.and_then(|p| self.get(p));
        let mut hidden = false;
        while let Some(a) = ancestor {
            hidden |= a.collapsed;
            ancestor = a.parent.and_then(|p| self.get(p));
        }
        if hidden {
            if let Some(chunk) = self.chunk_mut(id) {
                chunk.requested = false;
            }
            return false;
        }
        balancer.enqueue_tile(id);
        true
    }

    fn refresh_can_disable(&mut self, id: ChunkId) -> bool {
        let Some(chunk) = self.get(id) else {
            return false;
        };
        if chunk.forced {
            return true;
        }
        let children_ready = chunk.children.is_some_and(|children| {
            children
                .iter()
                .all(|&child| self.get(child).is_some_and(|c| c.ready))
        });
        let can_disable = chunk.ready && children_ready;
        if let Some(chunk) = self.chunk_mut(id) {
            chunk.can_disable = can_disable;
        }
        can_disable
    }

    /// Install a baked tile on its chunk and mark it ready.
    ///
    /// Returns `false` without touching the tree when the chunk no longer
    /// exists, is already ready, or lacks a collider its depth requires.
    pub fn assign_ready(&mut self, baked: BakedTile) -> bool {
        let needs_collider = self.needs_collider(baked.mesh.tile.depth);
        let Some(chunk) = self.chunk_mut(baked.chunk) else {
            tracing::debug!(chunk = %baked.chunk, "dropping baked tile for destroyed chunk");
            return false;
        };
        if chunk.ready {
            return false;
        }
        if needs_collider && baked.collider.is_none() {
            tracing::warn!(chunk = %baked.chunk, "baked tile is missing its required collider");
            return false;
        }
        chunk.mesh = Some(baked.mesh);
        chunk.collider = baked.collider;
        chunk.ready = true;
        let parent = chunk.parent;
        self.walk_requested = true;
        if let Some(parent) = parent {
            self.refresh_can_disable(parent);
        }
        true
    }

    /// Destroy every chunk, cancelling their queued generation requests.
    pub fn teardown(&mut self, balancer: &mut LoadBalancer) {
        self.destroy_subtrees(&[self.root], balancer);
        tracing::debug!("chunk tree torn down");
    }

    fn destroy_subtrees(&mut self, roots: &[ChunkId], balancer: &mut LoadBalancer) {
        let mut queued = HashSet::new();
        let mut stack = roots.to_vec();
        while let Some(id) = stack.pop() {
            let Some(slot) = self
                .slots
                .get_mut(id.index as usize)
                .filter(|slot| slot.generation == id.generation)
            else {
                continue;
            };
            let Some(chunk) = slot.chunk.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
            if chunk.requested {
                queued.insert(id);
            }
            stack.extend(chunk.children.into_iter().flatten());
        }
        balancer.cancel_tiles(&queued);
    }

    /// Whether `id` currently draws its own terrain: every ancestor is
    /// active, the chunk shows itself, and its mesh is ready.
    pub fn is_displayed(&self, id: ChunkId) -> bool {
        let Some(chunk) = self.get(id) else {
            return false;
        };
        if !(chunk.ready && chunk.terrain_enabled && chunk.mesh.is_some()) {
            return false;
        }
        let mut cursor = Some(chunk);
        while let Some(c) = cursor {
            if !c.active {
                return false;
            }
            cursor = c.parent.and_then(|p| self.get(p));
        }
        true
    }

    pub fn displayed(&self) -> Vec<ChunkId> {
        self.iter()
            .map(|(id, _)| id)
            .filter(|&id| self.is_displayed(id))
            .collect()
    }

    /// Check the structural links: children are live, point back at their
    /// parent and halve its size one level down.
    pub fn is_consistent(&self) -> bool {
        self.iter().all(|(id, chunk)| {
            let parent_ok = chunk
                .parent
                .is_none_or(|p| self.get(p).and_then(|p| p.children).is_some_and(|cs| cs.contains(&id)));
            let children_ok = chunk.children.is_none_or(|children| {
                children.iter().all(|&child| {
                    self.get(child).is_some_and(|c| {
                        c.parent == Some(id)
                            && c.tile.depth == chunk.tile.depth - 1
                            && c.tile.size == chunk.tile.size * 0.5
                    })
                })
            });
            parent_ok && children_ok
        })
    }

    /// Indented textual view of the tree, skipping forced scaffold nodes.
    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(self.root, 0, &mut out);
        out
    }

    fn dump_node(&self, id: ChunkId, indent: usize, out: &mut String) {
        let Some(chunk) = self.get(id) else {
            return;
        };
        let next = if chunk.forced {
            indent
        } else {
            let _ = writeln!(
                out,
                "{:w$}[{}] depth={} size={} origin=({:.0}, {:.0}){}{}",
                "",
                id,
                chunk.tile.depth,
                chunk.tile.size,
                chunk.tile.origin.x,
                chunk.tile.origin.z,
                if chunk.ready { " ready" } else { "" },
                if self.is_displayed(id) { " shown" } else { "" },
                w = indent,
            );
            indent + 2
        };
        for child in chunk.children.into_iter().flatten() {
            self.dump_node(child, next, out);
        }
    }

    fn spawn(
        &mut self,
        tile: TileDescriptor,
        parent: Option<ChunkId>,
        balancer: &mut LoadBalancer,
    ) -> ChunkId {
        let owns_geometry = self.owns_geometry(tile.depth);
        let chunk = Chunk {
            tile,
            parent,
            children: None,
            forced: false,
            ready: false,
            can_disable: false,
            active: false,
            terrain_enabled: owns_geometry,
            requested: owns_geometry,
            collapsed: false,
            mesh: None,
            collider: None,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.chunk = Some(chunk);
                ChunkId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    chunk: Some(chunk),
                });
                ChunkId {
                    index,
                    generation: 0,
                }
            }
        };
        self.live += 1;
        if owns_geometry {
            balancer.enqueue_tile(id);
        }
        id
    }

    fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.chunk.as_mut())
    }

    fn set_active(&mut self, id: ChunkId, active: bool) {
        if let Some(chunk) = self.chunk_mut(id) {
            chunk.active = active;
        }
    }
}
