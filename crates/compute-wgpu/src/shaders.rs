/// Edge length of the square workgroup used by the tile kernel.
pub const TILE_WORKGROUP: u32 = 8;

/// Workgroup width of the point sampling kernel.
pub const SAMPLE_WORKGROUP: u32 = 64;

/// Terrain uniforms, the affector buffer and the shared height functions.
///
/// Bindings 0 and 1 are identical in both kernels.
pub const TERRAIN_COMMON: &str = r#"
struct Terrain {
    height: f32,
    sea_level: f32,
    base_frequency: f32,
    frequency_decay: f32,
    amplitude_decay: f32,
    noise_layers: u32,
    seed: u32,
    affector_count: u32,
};

// approach.w carries the strip width.
struct Affector {
    approach: vec4<f32>,
    departure: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> terrain: Terrain;

@group(0) @binding(1)
var<storage, read> affectors: array<Affector>;

fn pcg(v: u32) -> u32 {
    let state = v * 747796405u + 2891336453u;
    let word = ((state >> ((state >> 28u) + 4u)) ^ state) * 277803737u;
    return (word >> 22u) ^ word;
}

fn gradient(cell: vec2<i32>, layer: u32) -> vec2<f32> {
    let h = pcg(bitcast<u32>(cell.x) ^ pcg(bitcast<u32>(cell.y) ^ pcg(terrain.seed + layer)));
    let angle = f32(h) * (6.2831853 / 4294967296.0);
    return vec2<f32>(cos(angle), sin(angle));
}

fn perlin(p: vec2<f32>, layer: u32) -> f32 {
    let base = floor(p);
    let f = p - base;
    let i = vec2<i32>(base);
    let u = f * f * f * (f * (f * 6.0 - 15.0) + 10.0);
    let g00 = dot(gradient(i, layer), f);
    let g10 = dot(gradient(i + vec2<i32>(1, 0), layer), f - vec2<f32>(1.0, 0.0));
    let g01 = dot(gradient(i + vec2<i32>(0, 1), layer), f - vec2<f32>(0.0, 1.0));
    let g11 = dot(gradient(i + vec2<i32>(1, 1), layer), f - vec2<f32>(1.0, 1.0));
    return mix(mix(g00, g10, u.x), mix(g01, g11, u.x), u.y) * 1.4142135;
}

fn raw_height(column: vec2<f32>) -> f32 {
    var frequency = terrain.base_frequency;
    var amplitude = 1.0;
    var sum = 0.0;
    var norm = 0.0;
    for (var layer = 0u; layer < terrain.noise_layers; layer++) {
        sum += perlin(column * frequency, layer) * amplitude;
        norm += amplitude;
        frequency *= terrain.frequency_decay;
        amplitude *= terrain.amplitude_decay;
    }
    let v = sum / max(norm, 1e-6);
    return clamp(v * 0.5 + 0.5, 0.0, 1.0) * terrain.height;
}

// (t along the centerline, planar distance to it)
fn affector_project(a: Affector, column: vec2<f32>) -> vec2<f32> {
    let p0 = a.approach.xz;
    let ab = a.departure.xz - p0;
    let len_sq = dot(ab, ab);
    var t = 0.0;
    if (len_sq > 1e-6) {
        t = clamp(dot(column - p0, ab) / len_sq, 0.0, 1.0);
    }
    return vec2<f32>(t, distance(column, p0 + ab * t));
}

fn terrain_height(column: vec2<f32>, use_affectors: bool) -> f32 {
    var h = raw_height(column);
    if (!use_affectors) {
        return h;
    }
    for (var i = 0u; i < terrain.affector_count; i++) {
        let a = affectors[i];
        let width = a.approach.w;
        let td = affector_project(a, column);
        let half_width = width * 0.5;
        let outer = half_width + width * 4.0;
        if (td.y >= outer) {
            continue;
        }
        let level = mix(a.approach.y, a.departure.y, td.x);
        var weight = 1.0;
        if (td.y > half_width) {
            let x = 1.0 - (td.y - half_width) / (outer - half_width);
            weight = x * x * (3.0 - 2.0 * x);
        }
        h = h + (level - h) * weight;
    }
    return h;
}

fn terrain_normal(column: vec2<f32>, step: f32, use_affectors: bool) -> vec3<f32> {
    let dx = vec2<f32>(step, 0.0);
    let dz = vec2<f32>(0.0, step);
    let hx = terrain_height(column + dx, use_affectors) - terrain_height(column - dx, use_affectors);
    let hz = terrain_height(column + dz, use_affectors) - terrain_height(column - dz, use_affectors);
    return normalize(vec3<f32>(-hx, 2.0 * step, -hz));
}
"#;

/// Tile generation: one invocation per grid vertex, plus the quad it anchors.
pub const TILE_KERNEL: &str = r#"
struct TileParams {
    origin_size: vec4<f32>,
    resolution: u32,
    depth: i32,
    _pad0: u32,
    _pad1: u32,
};

@group(0) @binding(2)
var<uniform> tile: TileParams;

@group(0) @binding(3)
var<storage, read_write> vertices: array<vec4<f32>>;

@group(0) @binding(4)
var<storage, read_write> indices: array<u32>;

@group(0) @binding(5)
var<storage, read_write> normals: array<vec4<f32>>;

@group(0) @binding(6)
var<storage, read_write> uv2: array<vec2<f32>>;

fn grid_column(column: u32, row: u32) -> vec2<f32> {
    let size = tile.origin_size.w;
    let step = size / f32(tile.resolution - 1u);
    let half_size = size * 0.5;
    return vec2<f32>(
        tile.origin_size.x - half_size + f32(column) * step,
        tile.origin_size.z - half_size + f32(row) * step,
    );
}

@compute @workgroup_size(8, 8, 1)
fn generate_tile(@builtin(global_invocation_id) id: vec3<u32>) {
    let res = tile.resolution;
    if (id.x >= res || id.y >= res) {
        return;
    }
    let step = tile.origin_size.w / f32(res - 1u);
    let world = grid_column(id.x, id.y);
    let h = terrain_height(world, true);
    let n = terrain_normal(world, step, true);
    let v0 = id.y * res + id.x;
    vertices[v0] = vec4<f32>(world.x - tile.origin_size.x, h, world.y - tile.origin_size.z, 1.0);
    normals[v0] = vec4<f32>(n, 0.0);
    uv2[v0] = vec2<f32>(h / max(terrain.height, 1e-6), 1.0 - n.y);

    if (id.x + 1u >= res || id.y + 1u >= res) {
        return;
    }
    let v1 = v0 + 1u;
    let v2 = v0 + res;
    let v3 = v0 + res + 1u;
    let h1 = terrain_height(grid_column(id.x + 1u, id.y), true);
    let h2 = terrain_height(grid_column(id.x, id.y + 1u), true);
    let h3 = terrain_height(grid_column(id.x + 1u, id.y + 1u), true);
    let sea = terrain.sea_level;
    let base = (id.y * (res - 1u) + id.x) * 6u;

    if (h < sea && h2 < sea && h1 < sea) {
        indices[base] = 0u;
        indices[base + 1u] = 0u;
        indices[base + 2u] = 0u;
    } else {
        indices[base] = v0;
        indices[base + 1u] = v2;
        indices[base + 2u] = v1;
    }
    if (h1 < sea && h2 < sea && h3 < sea) {
        indices[base + 3u] = 0u;
        indices[base + 4u] = 0u;
        indices[base + 5u] = 0u;
    } else {
        indices[base + 3u] = v1;
        indices[base + 4u] = v2;
        indices[base + 5u] = v3;
    }
}
"#;

/// Point sampling: one invocation per requested column.
pub const SAMPLE_KERNEL: &str = r#"
// flags: bit 0 ignores affectors, bit 1 rejects columns on an affector strip.
struct SampleParams {
    count: u32,
    max_slope_deg: f32,
    max_height: f32,
    flags: u32,
};

@group(0) @binding(2)
var<uniform> query: SampleParams;

@group(0) @binding(3)
var<storage, read> points: array<vec4<f32>>;

@group(0) @binding(4)
var<storage, read_write> results: array<vec4<f32>>;

@compute @workgroup_size(64, 1, 1)
fn sample_points(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= query.count) {
        return;
    }
    let p = points[id.x];
    let column = p.xz;
    let use_affectors = (query.flags & 1u) == 0u;
    let h = terrain_height(column, use_affectors);
    let n = terrain_normal(column, 1.0, use_affectors);
    let slope = degrees(acos(clamp(n.y, -1.0, 1.0)));

    var avoided = false;
    if ((query.flags & 2u) != 0u) {
        for (var i = 0u; i < terrain.affector_count; i++) {
            let a = affectors[i];
            if (affector_project(a, column).y <= a.approach.w * 0.5) {
                avoided = true;
            }
        }
    }

    var y = h;
    if (slope > query.max_slope_deg || h > query.max_height || avoided) {
        y = -1.0;
    }
    results[id.x] = vec4<f32>(p.x, y, p.z, 0.0);
}
"#;

/// Full WGSL source for the tile kernel.
pub fn tile_kernel() -> String {
    format!("{TERRAIN_COMMON}\n{TILE_KERNEL}")
}

/// Full WGSL source for the point sampling kernel.
pub fn sample_kernel() -> String {
    format!("{TERRAIN_COMMON}\n{SAMPLE_KERNEL}")
}
