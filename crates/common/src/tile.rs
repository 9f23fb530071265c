use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Largest tile resolution (vertices per edge) a device is expected to support.
pub const MAX_RESOLUTION: u32 = 129;

/// Generation parameters bound to a single device dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileDescriptor {
    /// World-space center of the tile.
    pub origin: Vec3,
    /// Edge length in world units.
    pub size: f32,
    /// Depth in the quadtree; 0 is the finest level.
    pub depth: i32,
}

impl TileDescriptor {
    pub fn new(origin: Vec3, size: f32, depth: i32) -> Self {
        Self {
            origin,
            size,
            depth,
        }
    }

    /// World-space XZ position of grid vertex `(column, row)` for the given layout.
    pub fn grid_position(&self, layout: TileLayout, column: u32, row: u32) -> Vec2 {
        let step = self.size / (layout.resolution - 1) as f32;
        let half = self.size * 0.5;
        Vec2::new(
            self.origin.x - half + column as f32 * step,
            self.origin.z - half + row as f32 * step,
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("tile resolution must be odd, got {0}")]
    EvenResolution(u32),
    #[error("tile resolution {0} outside supported range 3..=129")]
    OutOfRange(u32),
}

/// Buffer sizing derived from the tile resolution (vertices per edge).
///
/// Resolution is odd so that every tile has a center vertex shared with its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileLayout {
    resolution: u32,
}

impl TileLayout {
    pub fn new(resolution: u32) -> Result<Self, LayoutError> {
        if !(3..=MAX_RESOLUTION).contains(&resolution) {
            return Err(LayoutError::OutOfRange(resolution));
        }
        if resolution % 2 != 1 {
            return Err(LayoutError::EvenResolution(resolution));
        }
        Ok(Self { resolution })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn vertex_count(&self) -> usize {
        (self.resolution * self.resolution) as usize
    }

    pub fn index_count(&self) -> usize {
        ((self.resolution - 1) * (self.resolution - 1) * 6) as usize
    }

    /// Number of workgroups along one axis for a square `group_size` workgroup.
    pub fn workgroups(&self, group_size: u32) -> u32 {
        self.resolution.div_ceil(group_size)
    }

    /// Linear vertex index of grid point `(column, row)`.
    pub fn vertex_index(&self, column: u32, row: u32) -> u32 {
        row * self.resolution + column
    }
}

/// The four buffers read back from one tile generation dispatch.
///
/// Vertices are relative to the tile origin on XZ and absolute on Y.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTileMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub normals: Vec<Vec3>,
    /// Auxiliary per-vertex shading data (normalized height, slope).
    pub uv2: Vec<Vec2>,
}

impl RawTileMesh {
    /// Allocate zeroed buffers for the given layout.
    pub fn zeroed(layout: TileLayout) -> Self {
        Self {
            vertices: vec![Vec3::ZERO; layout.vertex_count()],
            indices: vec![0; layout.index_count()],
            normals: vec![Vec3::Y; layout.vertex_count()],
            uv2: vec![Vec2::ZERO; layout.vertex_count()],
        }
    }

    /// True when every buffer has the length the layout dictates.
    pub fn matches_layout(&self, layout: TileLayout) -> bool {
        self.vertices.len() == layout.vertex_count()
            && self.normals.len() == layout.vertex_count()
            && self.uv2.len() == layout.vertex_count()
            && self.indices.len() == layout.index_count()
    }

    /// Triangles whose three indices are pairwise distinct.
    pub fn valid_triangle_count(&self) -> usize {
        self.indices
            .chunks_exact(3)
            .filter(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_rejects_even_resolution() {
        assert_eq!(TileLayout::new(32), Err(LayoutError::EvenResolution(32)));
        assert_eq!(TileLayout::new(1), Err(LayoutError::OutOfRange(1)));
        assert_eq!(TileLayout::new(131), Err(LayoutError::OutOfRange(131)));
    }

    #[test]
    fn layout_buffer_sizes() {
        let layout = TileLayout::new(33).unwrap();
        assert_eq!(layout.vertex_count(), 33 * 33);
        assert_eq!(layout.index_count(), 32 * 32 * 6);
        assert_eq!(layout.workgroups(8), 5);
        assert_eq!(layout.vertex_index(2, 1), 35);
    }

    #[test]
    fn grid_position_spans_tile_edges() {
        let layout = TileLayout::new(5).unwrap();
        let tile = TileDescriptor::new(Vec3::new(100.0, 0.0, -50.0), 40.0, 2);
        assert_eq!(tile.grid_position(layout, 0, 0), Vec2::new(80.0, -70.0));
        assert_eq!(tile.grid_position(layout, 4, 4), Vec2::new(120.0, -30.0));
        assert_eq!(tile.grid_position(layout, 2, 2), Vec2::new(100.0, -50.0));
    }

    #[test]
    fn degenerate_triangles_are_not_counted() {
        let mut mesh = RawTileMesh::zeroed(TileLayout::new(3).unwrap());
        assert_eq!(mesh.valid_triangle_count(), 0);
        mesh.indices[0..3].copy_from_slice(&[0, 1, 3]);
        mesh.indices[3..6].copy_from_slice(&[4, 4, 1]);
        assert_eq!(mesh.valid_triangle_count(), 1);
        assert!(mesh.matches_layout(TileLayout::new(3).unwrap()));
    }
}
