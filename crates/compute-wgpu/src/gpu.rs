use bytemuck::{Pod, Zeroable};
use crossbeam_channel::{Receiver, TryRecvError};
use glam::{Vec2, Vec3};
use terrastream_common::{
    Affector, RawTileMesh, SampleFilter, TerrainSettings, TileDescriptor, TileLayout,
};
use terrastream_device::{ComputeDevice, DeviceError};
use wgpu::util::DeviceExt;

use crate::shaders;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct TerrainUniform {
    height: f32,
    sea_level: f32,
    base_frequency: f32,
    frequency_decay: f32,
    amplitude_decay: f32,
    noise_layers: u32,
    seed: u32,
    affector_count: u32,
}

impl TerrainUniform {
    fn new(settings: &TerrainSettings, affector_count: usize) -> Self {
        Self {
            height: settings.height,
            sea_level: settings.sea_level,
            base_frequency: settings.base_frequency as f32,
            frequency_decay: settings.frequency_decay as f32,
            amplitude_decay: settings.amplitude_decay as f32,
            noise_layers: settings.noise_layers.clamp(1, 32),
            seed: settings.seed,
            affector_count: affector_count as u32,
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GpuAffector {
    approach: [f32; 4],
    departure: [f32; 4],
}

impl From<&Affector> for GpuAffector {
    fn from(a: &Affector) -> Self {
        Self {
            approach: [a.approach.x, a.approach.y, a.approach.z, a.width],
            departure: [a.departure.x, a.departure.y, a.departure.z, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct TileParams {
    origin_size: [f32; 4],
    resolution: u32,
    depth: i32,
    _pad: [u32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct SampleParams {
    count: u32,
    max_slope_deg: f32,
    max_height: f32,
    flags: u32,
}

impl SampleParams {
    const IGNORE_AFFECTORS: u32 = 1;
    const AVOID_AFFECTORS: u32 = 2;

    fn new(count: usize, filter: &SampleFilter) -> Self {
        let mut flags = 0;
        if filter.ignore_affectors {
            flags |= Self::IGNORE_AFFECTORS;
        }
        if filter.avoid_affectors {
            flags |= Self::AVOID_AFFECTORS;
        }
        Self {
            count: count as u32,
            max_slope_deg: filter.max_slope_deg,
            // Keep the uniform finite; an unbounded filter still accepts every height.
            max_height: filter.max_height.min(f32::MAX),
            flags,
        }
    }
}

const STAGING_COUNT: usize = 4;

/// Map requests issued for one tile dispatch.
struct PendingReadback {
    rx: Receiver<(usize, Result<(), wgpu::BufferAsyncError>)>,
    mapped: [bool; STAGING_COUNT],
}

/// One worker's storage and staging buffers on a [`WgpuDevice`].
///
/// Staging order is vertices, indices, normals, uv2.
pub struct WgpuTileBuffers {
    layout: TileLayout,
    params: wgpu::Buffer,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    normals: wgpu::Buffer,
    uv2: wgpu::Buffer,
    staging: [wgpu::Buffer; STAGING_COUNT],
    pending: Option<PendingReadback>,
}

impl WgpuTileBuffers {
    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    pub fn is_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    fn outputs(&self) -> [&wgpu::Buffer; STAGING_COUNT] {
        [&self.vertices, &self.indices, &self.normals, &self.uv2]
    }

    fn unmap_all(&self) {
        for staging in &self.staging {
            staging.unmap();
        }
    }

    fn read_mapped(&self) -> RawTileMesh {
        let vertices: Vec<[f32; 4]> = read_staging(&self.staging[0]);
        let indices: Vec<u32> = read_staging(&self.staging[1]);
        let normals: Vec<[f32; 4]> = read_staging(&self.staging[2]);
        let uv2: Vec<[f32; 2]> = read_staging(&self.staging[3]);
        RawTileMesh {
            vertices: vertices.iter().map(|v| Vec3::new(v[0], v[1], v[2])).collect(),
            indices,
            normals: normals.iter().map(|n| Vec3::new(n[0], n[1], n[2])).collect(),
            uv2: uv2.iter().map(|&uv| Vec2::from(uv)).collect(),
        }
    }
}

/// Copy a mapped staging buffer out and unmap it.
fn read_staging<T: Pod>(buffer: &wgpu::Buffer) -> Vec<T> {
    let data = buffer.slice(..).get_mapped_range();
    let out = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    buffer.unmap();
    out
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

/// Terrain compute device running the tile and sampling kernels through wgpu.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    settings: TerrainSettings,
    terrain_uniform: wgpu::Buffer,
    affectors: wgpu::Buffer,
    affector_slots: usize,
    tile_layout: wgpu::BindGroupLayout,
    tile_pipeline: wgpu::ComputePipeline,
    sample_layout: wgpu::BindGroupLayout,
    sample_pipeline: wgpu::ComputePipeline,
}

impl WgpuDevice {
    /// Open a headless device on the first adapter wgpu offers.
    pub fn new(settings: &TerrainSettings) -> Result<Self, DeviceError> {
        Self::with_fallback(settings, false)
    }

    /// Open a headless device, optionally forcing the software fallback adapter.
    pub fn with_fallback(
        settings: &TerrainSettings,
        force_fallback_adapter: bool,
    ) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter,
        }))
        .ok_or(DeviceError::NoAdapter)?;

        let adapter_name = adapter.get_info().name;
        tracing::info!(adapter = %adapter_name, "compute adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("terrastream_compute"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| DeviceError::RequestDevice(e.to_string()))?;

        Ok(Self::from_device(device, queue, adapter_name, settings))
    }

    fn from_device(
        device: wgpu::Device,
        queue: wgpu::Queue,
        adapter_name: String,
        settings: &TerrainSettings,
    ) -> Self {
        let terrain_uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("terrain_uniform"),
            contents: bytemuck::bytes_of(&TerrainUniform::new(settings, 0)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let affectors = create_affector_buffer(&device, &[]);

        let tile_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile_bind_group_layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                uniform_entry(2),
                storage_entry(3, false),
                storage_entry(4, false),
                storage_entry(5, false),
                storage_entry(6, false),
            ],
        });
        let tile_pipeline = create_pipeline(
            &device,
            "generate_tile",
            &tile_layout,
            shaders::tile_kernel(),
        );

        let sample_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sample_bind_group_layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, true),
                uniform_entry(2),
                storage_entry(3, true),
                storage_entry(4, false),
            ],
        });
        let sample_pipeline = create_pipeline(
            &device,
            "sample_points",
            &sample_layout,
            shaders::sample_kernel(),
        );

        Self {
            device,
            queue,
            adapter_name,
            settings: settings.clone(),
            terrain_uniform,
            affectors,
            affector_slots: 1,
            tile_layout,
            tile_pipeline,
            sample_layout,
            sample_pipeline,
        }
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn tile_bind_group(&self, buffers: &WgpuTileBuffers) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tile_bind_group"),
            layout: &self.tile_layout,
            entries: &[
                buffer_entry(0, &self.terrain_uniform),
                buffer_entry(1, &self.affectors),
                buffer_entry(2, &buffers.params),
                buffer_entry(3, &buffers.vertices),
                buffer_entry(4, &buffers.indices),
                buffer_entry(5, &buffers.normals),
                buffer_entry(6, &buffers.uv2),
            ],
        })
    }

    fn storage_buffer(&self, label: &str, size: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    fn staging_buffer(&self, label: &str, size: usize) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }
}

fn create_affector_buffer(device: &wgpu::Device, affectors: &[Affector]) -> wgpu::Buffer {
    let mut records: Vec<GpuAffector> = affectors.iter().map(GpuAffector::from).collect();
    if records.is_empty() {
        records.push(GpuAffector::zeroed());
    }
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("affectors"),
        contents: bytemuck::cast_slice(&records),
        usage: wgpu::BufferUsages::STORAGE,
    })
}

fn create_pipeline(
    device: &wgpu::Device,
    entry_point: &str,
    layout: &wgpu::BindGroupLayout,
    source: String,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(entry_point),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

impl ComputeDevice for WgpuDevice {
    type TileBuffers = WgpuTileBuffers;

    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_tile_buffers(&self, layout: TileLayout) -> Result<Self::TileBuffers, DeviceError> {
        let vertex_bytes = layout.vertex_count() * std::mem::size_of::<[f32; 4]>();
        let index_bytes = layout.index_count() * std::mem::size_of::<u32>();
        let uv_bytes = layout.vertex_count() * std::mem::size_of::<[f32; 2]>();

        let params = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tile_params"),
            size: std::mem::size_of::<TileParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(WgpuTileBuffers {
            layout,
            params,
            vertices: self.storage_buffer("tile_vertices", vertex_bytes),
            indices: self.storage_buffer("tile_indices", index_bytes),
            normals: self.storage_buffer("tile_normals", vertex_bytes),
            uv2: self.storage_buffer("tile_uv2", uv_bytes),
            staging: [
                self.staging_buffer("tile_vertices_staging", vertex_bytes),
                self.staging_buffer("tile_indices_staging", index_bytes),
                self.staging_buffer("tile_normals_staging", vertex_bytes),
                self.staging_buffer("tile_uv2_staging", uv_bytes),
            ],
            pending: None,
        })
    }

    fn dispatch_tile(
        &self,
        buffers: &mut Self::TileBuffers,
        tile: &TileDescriptor,
    ) -> Result<(), DeviceError> {
        if buffers.pending.is_some() {
            return Err(DeviceError::BuffersBusy);
        }

        let params = TileParams {
            origin_size: [tile.origin.x, tile.origin.y, tile.origin.z, tile.size],
            resolution: buffers.layout.resolution(),
            depth: tile.depth,
            _pad: [0; 2],
        };
        self.queue
            .write_buffer(&buffers.params, 0, bytemuck::bytes_of(&params));
        let bind_group = self.tile_bind_group(buffers);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tile_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("generate_tile"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.tile_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let groups = buffers.layout.workgroups(shaders::TILE_WORKGROUP);
            pass.dispatch_workgroups(groups, groups, 1);
        }
        for (source, staging) in buffers.outputs().into_iter().zip(&buffers.staging) {
            encoder.copy_buffer_to_buffer(source, 0, staging, 0, source.size());
        }
        self.queue.submit(Some(encoder.finish()));

        let (tx, rx) = crossbeam_channel::bounded(STAGING_COUNT);
        for (index, staging) in buffers.staging.iter().enumerate() {
            let tx = tx.clone();
            staging
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send((index, result));
                });
        }
        buffers.pending = Some(PendingReadback {
            rx,
            mapped: [false; STAGING_COUNT],
        });
        tracing::trace!(origin = ?tile.origin, size = tile.size, depth = tile.depth, "gpu tile dispatched");
        Ok(())
    }

    fn poll_tile(&self, buffers: &mut Self::TileBuffers) -> Result<Option<RawTileMesh>, DeviceError> {
        let Some(pending) = buffers.pending.as_mut() else {
            return Ok(None);
        };
        self.device.poll(wgpu::Maintain::Poll);

        loop {
            match pending.rx.try_recv() {
                Ok((index, Ok(()))) => pending.mapped[index] = true,
                Ok((_, Err(e))) => {
                    buffers.pending = None;
                    buffers.unmap_all();
                    return Err(DeviceError::Readback(e.to_string()));
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if pending.mapped.iter().all(|m| *m) {
                        break;
                    }
                    buffers.pending = None;
                    buffers.unmap_all();
                    return Err(DeviceError::Readback("map callback dropped".into()));
                }
            }
        }

        if !pending.mapped.iter().all(|m| *m) {
            return Ok(None);
        }
        buffers.pending = None;
        Ok(Some(buffers.read_mapped()))
    }

    fn sample_points(&self, points: &[Vec3], filter: &SampleFilter) -> Result<Vec<Vec3>, DeviceError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let input: Vec<[f32; 4]> = points.iter().map(|p| [p.x, p.y, p.z, 0.0]).collect();
        let bytes = std::mem::size_of_val(input.as_slice());

        let point_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("sample_points"),
                contents: bytemuck::cast_slice(&input),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let params = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("sample_params"),
                contents: bytemuck::bytes_of(&SampleParams::new(points.len(), filter)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let results = self.storage_buffer("sample_results", bytes);
        let staging = self.staging_buffer("sample_staging", bytes);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sample_bind_group"),
            layout: &self.sample_layout,
            entries: &[
                buffer_entry(0, &self.terrain_uniform),
                buffer_entry(1, &self.affectors),
                buffer_entry(2, &params),
                buffer_entry(3, &point_buffer),
                buffer_entry(4, &results),
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("sample_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("sample_points"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.sample_pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups((points.len() as u32).div_ceil(shaders::SAMPLE_WORKGROUP), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&results, 0, &staging, 0, bytes as u64);
        self.queue.submit(Some(encoder.finish()));

        let (tx, rx) = crossbeam_channel::bounded(1);
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(DeviceError::Readback(e.to_string())),
            Err(_) => return Err(DeviceError::Readback("map callback dropped".into())),
        }
        let out: Vec<[f32; 4]> = read_staging(&staging);
        tracing::trace!(count = points.len(), "gpu points sampled");
        Ok(out.iter().map(|v| Vec3::new(v[0], v[1], v[2])).collect())
    }

    fn upload_affectors(&mut self, affectors: &[Affector]) -> Result<(), DeviceError> {
        self.affectors = create_affector_buffer(&self.device, affectors);
        self.affector_slots = affectors.len().max(1);
        self.queue.write_buffer(
            &self.terrain_uniform,
            0,
            bytemuck::bytes_of(&TerrainUniform::new(&self.settings, affectors.len())),
        );
        tracing::debug!(count = affectors.len(), "affectors uploaded");
        Ok(())
    }

    fn affector_slots(&self) -> usize {
        self.affector_slots
    }
}
