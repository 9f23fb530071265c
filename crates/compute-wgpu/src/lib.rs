//! wgpu compute backend for terrain tile generation and point sampling.
//!
//! # Invariants
//! - Each set of tile buffers carries at most one dispatch; its four staging
//!   buffers are mapped together and released together.
//! - Tile readback is polled with `Maintain::Poll` and never waits on the GPU.
//! - Point sampling is synchronous and waits for its own submission only.
//! - The affector binding always holds at least one record.
//!
//! # Workaround
//! WGSL storage arrays of `vec3<f32>` use a 16-byte stride, so vertices and
//! normals travel as `vec4<f32>` and are narrowed on readback.

mod gpu;
pub mod shaders;

pub use gpu::{WgpuDevice, WgpuTileBuffers};

pub fn crate_info() -> &'static str {
    "terrastream-wgpu v0.1.0"
}
