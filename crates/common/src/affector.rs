use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Distance, in multiples of the affector width, over which flattening fades out.
const FALLOFF_WIDTHS: f32 = 4.0;

/// An engineered flat strip (a runway) that constrains terrain generation near it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affector {
    pub approach: Vec3,
    pub departure: Vec3,
    pub width: f32,
}

impl Affector {
    pub fn new(approach: Vec3, departure: Vec3, width: f32) -> Self {
        Self {
            approach,
            departure,
            width,
        }
    }

    /// Closest point parameter on the centerline (0 = approach, 1 = departure) and the
    /// planar distance to it.
    fn project(&self, column: Vec2) -> (f32, f32) {
        let a = self.approach.truncate_xz();
        let b = self.departure.truncate_xz();
        let ab = b - a;
        let len_sq = ab.length_squared();
        let t = if len_sq <= f32::EPSILON {
            0.0
        } else {
            ((column - a).dot(ab) / len_sq).clamp(0.0, 1.0)
        };
        (t, column.distance(a + ab * t))
    }

    /// Height of the flattened strip at `column`, paired with its blend weight in
    /// `0..=1`. `None` when the column is beyond the falloff band.
    pub fn flatten(&self, column: Vec2) -> Option<(f32, f32)> {
        let (t, distance) = self.project(column);
        let half = self.width * 0.5;
        let outer = half + self.width * FALLOFF_WIDTHS;
        if distance >= outer {
            return None;
        }
        let height = self.approach.y + (self.departure.y - self.approach.y) * t;
        let weight = if distance <= half {
            1.0
        } else {
            let x = 1.0 - (distance - half) / (outer - half);
            x * x * (3.0 - 2.0 * x)
        };
        Some((height, weight))
    }

    /// True when `column` lies on the paved strip itself.
    pub fn covers(&self, column: Vec2) -> bool {
        self.project(column).1 <= self.width * 0.5
    }
}

trait TruncateXz {
    fn truncate_xz(self) -> Vec2;
}

impl TruncateXz for Vec3 {
    fn truncate_xz(self) -> Vec2 {
        Vec2::new(self.x, self.z)
    }
}
