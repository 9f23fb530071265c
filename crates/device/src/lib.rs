//! Compute device interface.
//!
//! # Invariants
//! - Tile readback never blocks the caller; completion is observed by polling.
//! - A set of tile buffers holds at most one in-flight dispatch.
//! - Affectors are installed before the first tile dispatch; an empty set still
//!   leaves a one-element placeholder bound on the device.
//!
//! # Backends
//! [`HeightfieldDevice`] evaluates the terrain on the CPU and simulates readback
//! latency in polls. It is the reference backend used by tests and headless tools;
//! GPU backends implement the same [`ComputeDevice`] trait.

mod device;
mod heightfield;
mod reference;

pub use device::{ComputeDevice, DeviceError};
pub use heightfield::Heightfield;
pub use reference::{HeightfieldDevice, HeightfieldTileBuffers};

pub fn crate_info() -> &'static str {
    "terrastream-device v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("device"));
    }
}
