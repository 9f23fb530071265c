use glam::{Vec2, Vec3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use terrastream_common::{Affector, TerrainSettings};

/// Layered-noise height function with affector flattening.
///
/// Heights are never negative, so a negative value can serve as the
/// "no terrain" sentinel in sampling results.
#[derive(Clone)]
pub struct Heightfield {
    fbm: Fbm<Perlin>,
    height: f32,
}

impl Heightfield {
    pub fn new(settings: &TerrainSettings) -> Self {
        let fbm = Fbm::<Perlin>::new(settings.seed)
            .set_octaves(settings.noise_layers.clamp(1, 32) as usize)
            .set_frequency(settings.base_frequency)
            .set_lacunarity(settings.frequency_decay)
            .set_persistence(settings.amplitude_decay);
        Self {
            fbm,
            height: settings.height,
        }
    }

    pub fn max_height(&self) -> f32 {
        self.height
    }

    /// Unmodified terrain height at a world column.
    pub fn raw_height(&self, column: Vec2) -> f32 {
        let v = self.fbm.get([column.x as f64, column.y as f64]) as f32;
        (v * 0.5 + 0.5).clamp(0.0, 1.0) * self.height
    }

    /// Terrain height with every affector's flattening blended in, in order.
    pub fn height(&self, column: Vec2, affectors: &[Affector]) -> f32 {
        affectors
            .iter()
            .filter_map(|a| a.flatten(column))
            .fold(self.raw_height(column), |h, (flat, w)| h + (flat - h) * w)
    }

    /// Surface normal from central differences spaced `step` apart.
    pub fn normal(&self, column: Vec2, affectors: &[Affector], step: f32) -> Vec3 {
        let dx = Vec2::new(step, 0.0);
        let dz = Vec2::new(0.0, step);
        let hx = self.height(column + dx, affectors) - self.height(column - dx, affectors);
        let hz = self.height(column + dz, affectors) - self.height(column - dz, affectors);
        Vec3::new(-hx, 2.0 * step, -hz).normalize()
    }

    /// Slope in degrees from horizontal for a unit normal.
    pub fn slope_deg(normal: Vec3) -> f32 {
        normal.y.clamp(-1.0, 1.0).acos().to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field() -> Heightfield {
        Heightfield::new(&TerrainSettings {
            height: 1000.0,
            noise_layers: 6,
            base_frequency: 0.002,
            ..TerrainSettings::default()
        })
    }

    #[test]
    fn heights_stay_in_range() {
        let f = field();
        for i in 0..200 {
            let h = f.raw_height(Vec2::new(i as f32 * 37.0, i as f32 * -11.0));
            assert!((0.0..=1000.0).contains(&h));
        }
    }

    #[test]
    fn affector_flattens_strip() {
        let f = field();
        let runway = Affector::new(Vec3::new(0.0, 400.0, 0.0), Vec3::new(250.0, 400.0, 0.0), 10.0);
        for i in 0..10 {
            let column = Vec2::new(i as f32 * 25.0, 1.0);
            assert!((f.height(column, &[runway]) - 400.0).abs() < 1e-3);
        }
    }

    #[test]
    fn flat_strip_has_vertical_normal() {
        let f = field();
        let runway = Affector::new(Vec3::new(0.0, 50.0, 0.0), Vec3::new(500.0, 50.0, 0.0), 40.0);
        let n = f.normal(Vec2::new(250.0, 0.0), &[runway], 1.0);
        assert!(Heightfield::slope_deg(n) < 0.01);
    }
}
