use glam::{Vec2, Vec3};

use crate::mesh::TileMesh;

/// Axis-aligned bounds of a collider in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Aabb { min: p, max: p },
                Some(b) => Aabb {
                    min: b.min.min(p),
                    max: b.max.max(p),
                },
            })
        })
    }
}

/// Baked collision geometry for one tile.
///
/// Triangles are in world space and bucketed into a uniform XZ grid so that
/// vertical ray queries only test nearby triangles. A tile with no valid
/// triangles bakes to an empty collider.
#[derive(Debug, Clone)]
pub struct TerrainCollider {
    triangles: Vec<[Vec3; 3]>,
    bounds: Option<Aabb>,
    cells_per_side: usize,
    cells: Vec<Vec<u32>>,
}

impl TerrainCollider {
    pub fn bake(mesh: &TileMesh) -> Self {
        let offset = Vec3::new(mesh.tile.origin.x, 0.0, mesh.tile.origin.z);
        let triangles: Vec<[Vec3; 3]> = mesh
            .triangles()
            .map(|t| t.map(|i| mesh.vertices[i as usize] + offset))
            .collect();
        let bounds = Aabb::from_points(triangles.iter().flatten().copied());
        let cells_per_side = ((triangles.len() as f32 / 2.0).sqrt().ceil() as usize).max(1);

        let mut collider = Self {
            triangles,
            bounds,
            cells_per_side,
            cells: vec![Vec::new(); cells_per_side * cells_per_side],
        };
        for (i, tri) in collider.triangles.iter().enumerate() {
            let lo = tri[0].min(tri[1]).min(tri[2]);
            let hi = tri[0].max(tri[1]).max(tri[2]);
            let (c0, r0) = collider.cell_of(Vec2::new(lo.x, lo.z));
            let (c1, r1) = collider.cell_of(Vec2::new(hi.x, hi.z));
            for row in r0..=r1 {
                for column in c0..=c1 {
                    collider.cells[row * cells_per_side + column].push(i as u32);
                }
            }
        }
        collider
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Height of the topmost surface under world column `(x, z)`, found by a
    /// downward ray. `None` outside the collider or over a hole.
    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        let bounds = self.bounds?;
        let p = Vec2::new(x, z);
        if p.x < bounds.min.x || p.x > bounds.max.x || p.y < bounds.min.z || p.y > bounds.max.z {
            return None;
        }
        let (column, row) = self.cell_of(p);
        self.cells[row * self.cells_per_side + column]
            .iter()
            .filter_map(|&i| vertical_hit(&self.triangles[i as usize], p))
            .reduce(f32::max)
    }

    fn cell_of(&self, p: Vec2) -> (usize, usize) {
        let Some(bounds) = self.bounds else {
            return (0, 0);
        };
        let n = self.cells_per_side;
        let extent = Vec2::new(bounds.max.x - bounds.min.x, bounds.max.z - bounds.min.z)
            .max(Vec2::splat(f32::EPSILON));
        let rel = (p - Vec2::new(bounds.min.x, bounds.min.z)) / extent;
        let index = |t: f32| ((t * n as f32).floor().max(0.0) as usize).min(n - 1);
        (index(rel.x), index(rel.y))
    }
}

/// Height at which a vertical line through `p` meets the triangle, if it does.
fn vertical_hit(tri: &[Vec3; 3], p: Vec2) -> Option<f32> {
    let a = Vec2::new(tri[0].x, tri[0].z);
    let b = Vec2::new(tri[1].x, tri[1].z);
    let c = Vec2::new(tri[2].x, tri[2].z);
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let det = v0.perp_dot(v1);
    if det.abs() <= f32::EPSILON {
        return None;
    }
    let u = v2.perp_dot(v1) / det;
    let v = v0.perp_dot(v2) / det;
    const TOLERANCE: f32 = 1e-5;
    if u < -TOLERANCE || v < -TOLERANCE || u + v > 1.0 + TOLERANCE {
        return None;
    }
    Some(tri[0].y + u * (tri[1].y - tri[0].y) + v * (tri[2].y - tri[0].y))
}
