use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use glam::Vec3;
use terrastream_common::SampleFilter;
use terrastream_device::{ComputeDevice, HeightfieldDevice};
use terrastream_stream::{FrameBudget, PipelineConfig, PointSampler, TerrainPipeline};
use terrastream_wgpu::WgpuDevice;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "terrastream-cli", about = "CLI tool for terrain streaming operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Pipeline config (.yaml, .yml or .json); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run on the wgpu compute backend instead of the CPU heightfield
    #[arg(long, global = true)]
    gpu: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Stream the terrain around a fixed viewpoint until it settles
    Simulate {
        /// Viewpoint X
        #[arg(short, long, default_value = "0")]
        x: f32,
        /// Viewpoint Z
        #[arg(short, long, default_value = "0")]
        z: f32,
        /// Give up after this many frames
        #[arg(short, long, default_value = "100000")]
        frames: u64,
        /// Place runway affectors before streaming
        #[arg(long)]
        features: bool,
        /// Print the chunk tree once drained
        #[arg(long)]
        dump: bool,
    },
    /// Sample terrain heights along a straight line
    Sample {
        #[arg(long, default_value = "0")]
        x0: f32,
        #[arg(long, default_value = "0")]
        z0: f32,
        #[arg(long, default_value = "1000")]
        x1: f32,
        #[arg(long, default_value = "0")]
        z1: f32,
        /// Number of samples including both ends
        #[arg(short, long, default_value = "10")]
        count: usize,
        /// Maximum accepted slope in degrees
        #[arg(long, default_value = "90")]
        max_slope: f32,
    },
    /// Print the effective config as YAML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("terrastream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", terrastream_common::crate_info());
            println!("device: {}", terrastream_device::crate_info());
            println!("stream: {}", terrastream_stream::crate_info());
            println!("wgpu: {}", terrastream_wgpu::crate_info());
            println!(
                "root depth: {} (terrain {} / chunk {})",
                config.root_depth(),
                config.terrain.size,
                config.mesh.min_chunk_size
            );
        }
        Commands::Simulate {
            x,
            z,
            frames,
            features,
            dump,
        } => {
            let viewpoint = Vec3::new(x, 0.0, z);
            if cli.gpu {
                let device = WgpuDevice::new(&config.terrain)?;
                println!("backend: wgpu ({})", device.adapter_name());
                simulate(config, device, viewpoint, frames, features, dump)?;
            } else {
                let device = HeightfieldDevice::new(&config.terrain);
                simulate(config, device, viewpoint, frames, features, dump)?;
            }
        }
        Commands::Sample {
            x0,
            z0,
            x1,
            z1,
            count,
            max_slope,
        } => {
            let filter = SampleFilter {
                max_slope_deg: max_slope,
                ..SampleFilter::default()
            };
            let (start, end) = (Vec3::new(x0, 0.0, z0), Vec3::new(x1, 0.0, z1));
            if cli.gpu {
                let device = WgpuDevice::new(&config.terrain)?;
                sample(&device, start, end, count, &filter)?;
            } else {
                let device = HeightfieldDevice::new(&config.terrain);
                sample(&device, start, end, count, &filter)?;
            }
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

fn simulate<D: ComputeDevice>(
    config: PipelineConfig,
    device: D,
    viewpoint: Vec3,
    max_frames: u64,
    features: bool,
    dump: bool,
) -> anyhow::Result<()> {
    let mut pipeline = TerrainPipeline::new(config, device)?;
    if features {
        let placed = pipeline.load_features()?;
        println!("runways placed: {placed}");
    }
    pipeline.start(viewpoint)?;

    let mut budget = FrameBudget::new(240, Duration::from_micros(16_600));
    let mut frame = 0;
    while !pipeline.is_drained() {
        if frame >= max_frames {
            anyhow::bail!("pipeline still busy after {max_frames} frames");
        }
        let stats = pipeline.update(viewpoint)?;
        budget.record(stats.frame_time);
        frame += 1;

        if frame % 500 == 0 {
            let expected = pipeline.dispatched_jobs() + pipeline.backlog_len() as u64;
            tracing::info!(
                frame,
                progress = pipeline.progress(expected),
                backlog = stats.backlog,
                in_flight = stats.in_flight,
                chunks = stats.chunks,
                "streaming"
            );
        }
        if stats.in_flight > 0 || stats.pending_bakes > 0 {
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    let (displayed, chunks) = pipeline
        .tree()
        .map(|tree| (tree.displayed().len(), tree.len()))
        .unwrap_or_default();
    println!("Drained after {frame} frames");
    println!(
        "Jobs: {}, chunks: {chunks}, displayed: {displayed}",
        pipeline.dispatched_jobs()
    );
    println!(
        "Frame time: avg {:?}, min {:?}, max {:?}, over budget {}",
        budget.average(),
        budget.min(),
        budget.max(),
        budget.over_budget()
    );
    match pipeline.collision_height(viewpoint.x, viewpoint.z) {
        Some(h) => println!("Ground under viewpoint: {h:.2}"),
        None => println!("Ground under viewpoint: no collider"),
    }
    if dump {
        if let Some(tree) = pipeline.tree() {
            print!("{}", tree.debug_dump());
        }
    }
    Ok(())
}

fn sample<D: ComputeDevice>(
    device: &D,
    start: Vec3,
    end: Vec3,
    count: usize,
    filter: &SampleFilter,
) -> anyhow::Result<()> {
    let samples = PointSampler::new(device).sample_line(start, end, count, filter)?;
    for s in &samples {
        match s.height() {
            Some(h) => println!("{:>10.2} {:>10.2} {:>10.2}", s.position.x, s.position.z, h),
            None => println!("{:>10.2} {:>10.2} {:>10}", s.position.x, s.position.z, "invalid"),
        }
    }
    let valid = samples.iter().filter(|s| s.is_valid()).count();
    println!("{valid}/{} valid", samples.len());
    Ok(())
}
