use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Vec2, Vec3};
use terrastream_common::{
    Affector, INVALID_HEIGHT, RawTileMesh, SampleFilter, TerrainSettings, TileDescriptor,
    TileLayout,
};

use crate::device::{ComputeDevice, DeviceError};
use crate::heightfield::Heightfield;

/// CPU reference implementation of [`ComputeDevice`].
///
/// Generation runs synchronously inside `dispatch_tile`; the result is then held
/// back for `readback_latency` polls to model an asynchronous readback.
pub struct HeightfieldDevice {
    field: Heightfield,
    sea_level: f32,
    affectors: Vec<Affector>,
    readback_latency: u32,
    dispatches: AtomicU64,
}

/// One worker's buffers on the reference device.
#[derive(Debug)]
pub struct HeightfieldTileBuffers {
    layout: TileLayout,
    staging: RawTileMesh,
    /// Polls remaining before the staged result is returned; `None` when idle.
    countdown: Option<u32>,
}

impl HeightfieldTileBuffers {
    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    pub fn is_in_flight(&self) -> bool {
        self.countdown.is_some()
    }
}

impl HeightfieldDevice {
    pub fn new(settings: &TerrainSettings) -> Self {
        Self {
            field: Heightfield::new(settings),
            sea_level: settings.sea_level,
            affectors: Vec::new(),
            readback_latency: 1,
            dispatches: AtomicU64::new(0),
        }
    }

    /// Number of polls a tile readback stays pending after its dispatch.
    pub fn with_readback_latency(mut self, polls: u32) -> Self {
        self.readback_latency = polls;
        self
    }

    pub fn heightfield(&self) -> &Heightfield {
        &self.field
    }

    pub fn affectors(&self) -> &[Affector] {
        &self.affectors
    }

    /// Total tile dispatches issued on this device.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    fn generate(&self, layout: TileLayout, tile: &TileDescriptor, out: &mut RawTileMesh) {
        let res = layout.resolution();
        let step = tile.size / (res - 1) as f32;
        let max_height = self.field.max_height().max(f32::EPSILON);
        let local = Vec2::new(tile.origin.x, tile.origin.z);

        for row in 0..res {
            for column in 0..res {
                let i = layout.vertex_index(column, row) as usize;
                let world = tile.grid_position(layout, column, row);
                let h = self.field.height(world, &self.affectors);
                let normal = self.field.normal(world, &self.affectors, step);
                let offset = world - local;
                out.vertices[i] = Vec3::new(offset.x, h, offset.y);
                out.normals[i] = normal;
                out.uv2[i] = Vec2::new(h / max_height, 1.0 - normal.y);
            }
        }

        let mut cursor = 0;
        for row in 0..res - 1 {
            for column in 0..res - 1 {
                let v0 = layout.vertex_index(column, row);
                let v1 = layout.vertex_index(column + 1, row);
                let v2 = layout.vertex_index(column, row + 1);
                let v3 = layout.vertex_index(column + 1, row + 1);
                for tri in [[v0, v2, v1], [v1, v2, v3]] {
                    let submerged = tri
                        .iter()
                        .all(|&v| out.vertices[v as usize].y < self.sea_level);
                    let tri = if submerged { [0, 0, 0] } else { tri };
                    out.indices[cursor..cursor + 3].copy_from_slice(&tri);
                    cursor += 3;
                }
            }
        }
    }
}

impl ComputeDevice for HeightfieldDevice {
    type TileBuffers = HeightfieldTileBuffers;

    fn name(&self) -> &str {
        "cpu-heightfield"
    }

    fn create_tile_buffers(&self, layout: TileLayout) -> Result<Self::TileBuffers, DeviceError> {
        Ok(HeightfieldTileBuffers {
            layout,
            staging: RawTileMesh::zeroed(layout),
            countdown: None,
        })
    }

    fn dispatch_tile(
        &self,
        buffers: &mut Self::TileBuffers,
        tile: &TileDescriptor,
    ) -> Result<(), DeviceError> {
        if buffers.countdown.is_some() {
            return Err(DeviceError::BuffersBusy);
        }
        self.generate(buffers.layout, tile, &mut buffers.staging);
        buffers.countdown = Some(self.readback_latency);
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(origin = ?tile.origin, size = tile.size, depth = tile.depth, "cpu tile dispatched");
        Ok(())
    }

    fn poll_tile(&self, buffers: &mut Self::TileBuffers) -> Result<Option<RawTileMesh>, DeviceError> {
        match buffers.countdown {
            None => Ok(None),
            Some(0) => {
                buffers.countdown = None;
                Ok(Some(buffers.staging.clone()))
            }
            Some(n) => {
                buffers.countdown = Some(n - 1);
                Ok(None)
            }
        }
    }

    fn sample_points(&self, points: &[Vec3], filter: &SampleFilter) -> Result<Vec<Vec3>, DeviceError> {
        let affectors: &[Affector] = if filter.ignore_affectors {
            &[]
        } else {
            self.affectors.as_slice()
        };
        Ok(points
            .iter()
            .map(|p| {
                let column = Vec2::new(p.x, p.z);
                let h = self.field.height(column, affectors);
                let slope = Heightfield::slope_deg(self.field.normal(column, affectors, 1.0));
                let avoided =
                    filter.avoid_affectors && self.affectors.iter().any(|a| a.covers(column));
                let y = if slope > filter.max_slope_deg || h > filter.max_height || avoided {
                    INVALID_HEIGHT
                } else {
                    h
                };
                Vec3::new(p.x, y, p.z)
            })
            .collect())
    }

    fn upload_affectors(&mut self, affectors: &[Affector]) -> Result<(), DeviceError> {
        self.affectors = affectors.to_vec();
        tracing::debug!(count = affectors.len(), "affectors installed");
        Ok(())
    }

    fn affector_slots(&self) -> usize {
        self.affectors.len().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TerrainSettings {
        TerrainSettings {
            size: 4096.0,
            height: 1000.0,
            noise_layers: 6,
            base_frequency: 0.001,
            ..TerrainSettings::default()
        }
    }

    fn tile() -> TileDescriptor {
        TileDescriptor::new(Vec3::new(512.0, 0.0, -512.0), 256.0, 3)
    }

    #[test]
    fn readback_arrives_after_latency() {
        let device = HeightfieldDevice::new(&settings()).with_readback_latency(2);
        let layout = TileLayout::new(9).unwrap();
        let mut buffers = device.create_tile_buffers(layout).unwrap();

        device.dispatch_tile(&mut buffers, &tile()).unwrap();
        assert!(device.poll_tile(&mut buffers).unwrap().is_none());
        assert!(device.poll_tile(&mut buffers).unwrap().is_none());
        let mesh = device.poll_tile(&mut buffers).unwrap().unwrap();
        assert!(mesh.matches_layout(layout));
        assert!(!buffers.is_in_flight());
        assert_eq!(device.dispatch_count(), 1);
    }

    #[test]
    fn second_dispatch_on_busy_buffers_fails() {
        let device = HeightfieldDevice::new(&settings());
        let mut buffers = device.create_tile_buffers(TileLayout::new(5).unwrap()).unwrap();
        device.dispatch_tile(&mut buffers, &tile()).unwrap();
        assert!(matches!(
            device.dispatch_tile(&mut buffers, &tile()),
            Err(DeviceError::BuffersBusy)
        ));
    }

    #[test]
    fn vertices_are_relative_to_tile_origin() {
        let device = HeightfieldDevice::new(&settings()).with_readback_latency(0);
        let layout = TileLayout::new(5).unwrap();
        let mut buffers = device.create_tile_buffers(layout).unwrap();
        device.dispatch_tile(&mut buffers, &tile()).unwrap();
        let mesh = device.poll_tile(&mut buffers).unwrap().unwrap();
        assert_eq!(mesh.vertices[0].x, -128.0);
        assert_eq!(mesh.vertices[0].z, -128.0);
        assert_eq!(mesh.vertices[24].x, 128.0);
        assert_eq!(mesh.valid_triangle_count(), 32);
    }

    #[test]
    fn submerged_tile_is_all_degenerate() {
        let device = HeightfieldDevice::new(&TerrainSettings {
            sea_level: 10_000.0,
            ..settings()
        })
        .with_readback_latency(0);
        let layout = TileLayout::new(5).unwrap();
        let mut buffers = device.create_tile_buffers(layout).unwrap();
        device.dispatch_tile(&mut buffers, &tile()).unwrap();
        let mesh = device.poll_tile(&mut buffers).unwrap().unwrap();
        assert_eq!(mesh.valid_triangle_count(), 0);
    }

    #[test]
    fn empty_affector_upload_keeps_placeholder_slot() {
        let mut device = HeightfieldDevice::new(&settings());
        device.upload_affectors(&[]).unwrap();
        assert_eq!(device.affector_slots(), 1);
        let runway = Affector::new(Vec3::ZERO, Vec3::X * 250.0, 10.0);
        device.upload_affectors(&[runway, runway]).unwrap();
        assert_eq!(device.affector_slots(), 2);
    }

    #[test]
    fn sampling_applies_filters() {
        let mut device = HeightfieldDevice::new(&settings());
        let runway = Affector::new(Vec3::new(0.0, 300.0, 0.0), Vec3::new(250.0, 300.0, 0.0), 10.0);
        device.upload_affectors(&[runway]).unwrap();

        let points = [Vec3::new(100.0, 0.0, 0.0)];
        let plain = device.sample_points(&points, &SampleFilter::default()).unwrap();
        assert!((plain[0].y - 300.0).abs() < 1e-3);

        let low = SampleFilter {
            max_height: 100.0,
            ..SampleFilter::default()
        };
        assert_eq!(device.sample_points(&points, &low).unwrap()[0].y, INVALID_HEIGHT);

        let foliage = SampleFilter::foliage(90.0, f32::INFINITY);
        assert_eq!(device.sample_points(&points, &foliage).unwrap()[0].y, INVALID_HEIGHT);

        let raw = SampleFilter {
            ignore_affectors: true,
            ..SampleFilter::default()
        };
        let sampled = device.sample_points(&points, &raw).unwrap()[0].y;
        let expected = device.heightfield().raw_height(Vec2::new(100.0, 0.0));
        assert_eq!(sampled, expected);
    }
}
