use glam::{Vec2, Vec3, Vec4};
use terrastream_common::{RawTileMesh, TileDescriptor};

/// A finished terrain tile mesh: read-back buffers plus derived tangents.
///
/// Immutable once assigned to a chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMesh {
    pub tile: TileDescriptor,
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub normals: Vec<Vec3>,
    pub uv2: Vec<Vec2>,
    /// Per-vertex tangent; `w` carries the bitangent sign.
    pub tangents: Vec<Vec4>,
}

impl TileMesh {
    /// Build the finished mesh for `tile`, computing tangents from the planar
    /// XZ parameterization that terrain texturing uses.
    pub fn from_readback(tile: TileDescriptor, raw: RawTileMesh) -> Self {
        let tangents = compute_tangents(&raw.vertices, &raw.normals, &raw.indices);
        Self {
            tile,
            vertices: raw.vertices,
            indices: raw.indices,
            normals: raw.normals,
            uv2: raw.uv2,
            tangents,
        }
    }

    /// Iterate the non-degenerate triangles as vertex-index triples.
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .filter(|t| t[0] != t[1] && t[1] != t[2] && t[0] != t[2])
    }

    pub fn valid_triangle_count(&self) -> usize {
        self.triangles().count()
    }

    /// True for tiles with no surface at all (open water, out of range).
    pub fn is_empty(&self) -> bool {
        self.valid_triangle_count() == 0
    }
}

fn compute_tangents(vertices: &[Vec3], normals: &[Vec3], indices: &[u32]) -> Vec<Vec4> {
    let mut tan_u = vec![Vec3::ZERO; vertices.len()];
    let mut tan_v = vec![Vec3::ZERO; vertices.len()];

    for t in indices.chunks_exact(3) {
        let [a, b, c] = [t[0] as usize, t[1] as usize, t[2] as usize];
        if a == b || b == c || a == c {
            continue;
        }
        let (p0, p1, p2) = (vertices[a], vertices[b], vertices[c]);
        let e1 = p1 - p0;
        let e2 = p2 - p0;
        // planar texture coordinates
        let (du1, dv1) = (e1.x, e1.z);
        let (du2, dv2) = (e2.x, e2.z);
        let det = du1 * dv2 - du2 * dv1;
        if det.abs() <= f32::EPSILON {
            continue;
        }
        let r = 1.0 / det;
        let sdir = (e1 * dv2 - e2 * dv1) * r;
        let tdir = (e2 * du1 - e1 * du2) * r;
        for i in [a, b, c] {
            tan_u[i] += sdir;
            tan_v[i] += tdir;
        }
    }

    normals
        .iter()
        .zip(tan_u.iter().zip(&tan_v))
        .map(|(&n, (&u, &v))| {
            let u = if u.length_squared() > f32::EPSILON { u } else { Vec3::X };
            let t = (u - n * n.dot(u)).normalize_or(Vec3::X);
            let w = if n.cross(u).dot(v) < 0.0 { -1.0 } else { 1.0 };
            t.extend(w)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream_common::TileLayout;

    fn flat_raw(layout: TileLayout, height: f32) -> RawTileMesh {
        let res = layout.resolution();
        let mut raw = RawTileMesh::zeroed(layout);
        for row in 0..res {
            for column in 0..res {
                let i = layout.vertex_index(column, row) as usize;
                raw.vertices[i] = Vec3::new(column as f32, height, row as f32);
            }
        }
        let mut cursor = 0;
        for row in 0..res - 1 {
            for column in 0..res - 1 {
                let v0 = layout.vertex_index(column, row);
                let v1 = layout.vertex_index(column + 1, row);
                let v2 = layout.vertex_index(column, row + 1);
                let v3 = layout.vertex_index(column + 1, row + 1);
                raw.indices[cursor..cursor + 6].copy_from_slice(&[v0, v2, v1, v1, v2, v3]);
                cursor += 6;
            }
        }
        raw
    }

    #[test]
    fn flat_tile_tangents_follow_x() {
        let layout = TileLayout::new(5).unwrap();
        let tile = TileDescriptor::new(Vec3::ZERO, 4.0, 0);
        let mesh = TileMesh::from_readback(tile, flat_raw(layout, 10.0));
        assert_eq!(mesh.tangents.len(), layout.vertex_count());
        for t in &mesh.tangents {
            assert!((t.truncate() - Vec3::X).length() < 1e-5);
            assert!(t.w.abs() == 1.0);
        }
        assert_eq!(mesh.valid_triangle_count(), 32);
    }

    #[test]
    fn degenerate_tile_is_empty_but_well_formed() {
        let layout = TileLayout::new(3).unwrap();
        let tile = TileDescriptor::new(Vec3::ZERO, 2.0, 0);
        let mesh = TileMesh::from_readback(tile, RawTileMesh::zeroed(layout));
        assert!(mesh.is_empty());
        assert_eq!(mesh.tangents.len(), 9);
        assert!(mesh.tangents.iter().all(|t| t.truncate() == Vec3::X));
    }
}
