use glam::Vec3;
use terrastream_common::{Affector, LayoutError, RawTileMesh, SampleFilter, TileDescriptor, TileLayout};

/// Errors reported by a compute device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("no compatible adapter found")]
    NoAdapter,
    #[error("device request failed: {0}")]
    RequestDevice(String),
    #[error("tile buffers already hold an in-flight dispatch")]
    BuffersBusy,
    #[error("readback failed: {0}")]
    Readback(String),
    #[error("readback returned {actual} elements, layout expects {expected}")]
    LayoutMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Device-side terrain facility: tile generation, point sampling and affector upload.
///
/// Tile generation is split into a dispatch and a poll so the caller can keep
/// running its frame loop while the device works. Each worker owns one
/// [`ComputeDevice::TileBuffers`] for its whole lifetime.
pub trait ComputeDevice {
    /// Per-worker device buffers sized for one tile.
    type TileBuffers;

    /// Short backend name for logs and tooling.
    fn name(&self) -> &str;

    /// Allocate one worker's buffer set for the given layout.
    fn create_tile_buffers(&self, layout: TileLayout) -> Result<Self::TileBuffers, DeviceError>;

    /// Issue the generation dispatch for `tile` into `buffers` and start reading it back.
    fn dispatch_tile(
        &self,
        buffers: &mut Self::TileBuffers,
        tile: &TileDescriptor,
    ) -> Result<(), DeviceError>;

    /// Check whether the readback started by the last dispatch has arrived.
    ///
    /// Returns `Ok(None)` while the data is still in flight.
    fn poll_tile(&self, buffers: &mut Self::TileBuffers) -> Result<Option<RawTileMesh>, DeviceError>;

    /// Sample terrain heights at world-space XZ columns.
    ///
    /// Returns the input points with `y` replaced by the height, or by a negative
    /// sentinel where the filter rejects the column.
    fn sample_points(&self, points: &[Vec3], filter: &SampleFilter) -> Result<Vec<Vec3>, DeviceError>;

    /// Replace the affector set bound to every kernel.
    fn upload_affectors(&mut self, affectors: &[Affector]) -> Result<(), DeviceError>;

    /// Number of affector records bound on the device, including the placeholder.
    fn affector_slots(&self) -> usize;
}
