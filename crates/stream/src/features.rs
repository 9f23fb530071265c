use std::f32::consts::TAU;

use glam::{Vec2, Vec3};
use terrastream_common::{Affector, SampleFilter};
use terrastream_device::{ComputeDevice, DeviceError};

use crate::config::FeatureSettings;
use crate::sampler::PointSampler;

/// Samples taken along a candidate runway.
const PROFILE_SAMPLES: usize = 10;

/// Why a candidate runway was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Part of the strip has no valid terrain.
    InvalidSample,
    /// The end-to-end gradient is too steep, in degrees.
    Slope(f32),
    /// The terrain strays too far from the straight profile.
    Roughness(f32),
}

/// Judge a sampled profile against the runway limits. Returns the flattened
/// approach and departure heights on success.
pub fn evaluate_profile(
    heights: &[Option<f32>],
    length: f32,
    settings: &FeatureSettings,
) -> Result<(f32, f32), Rejection> {
    let heights: Vec<f32> = heights
        .iter()
        .copied()
        .collect::<Option<_>>()
        .ok_or(Rejection::InvalidSample)?;
    let (Some(&first), Some(&last)) = (heights.first(), heights.last()) else {
        return Err(Rejection::InvalidSample);
    };

    let slope = ((last - first).abs() / length.max(f32::EPSILON)).atan().to_degrees();
    if slope > settings.max_slope_deg {
        return Err(Rejection::Slope(slope));
    }

    let steps = (heights.len() - 1).max(1) as f32;
    let deviation = heights
        .iter()
        .enumerate()
        .map(|(i, h)| (h - (first + (last - first) * i as f32 / steps)).abs())
        .sum::<f32>()
        / heights.len() as f32;
    if deviation > settings.max_mean_deviation {
        return Err(Rejection::Roughness(deviation));
    }
    Ok((first, last))
}

/// Search for runway sites and return one affector per accepted airport.
///
/// Headings are tried in turn for each airport, every attempt at a fresh random
/// center inside the spread circle, until one passes. Airports with no passing
/// heading are skipped.
pub fn plan_runways<D: ComputeDevice>(
    sampler: &PointSampler<'_, D>,
    settings: &FeatureSettings,
) -> Result<Vec<Affector>, DeviceError> {
    let _span = tracing::info_span!("plan_runways").entered();
    let mut rng = fastrand::Rng::with_seed(settings.seed);
    // raw terrain: no affectors are installed while planning
    let filter = SampleFilter {
        ignore_affectors: true,
        ..SampleFilter::default()
    };
    let mut runways = Vec::new();

    for airport in 0..settings.runway_count {
        let mut accepted = None;
        for heading in (0..settings.orientation_samples).step_by(2) {
            let (approach, departure) = candidate_strip(&mut rng, settings, heading);

            let profile = sampler.sample_line(approach, departure, PROFILE_SAMPLES, &filter)?;
            let heights: Vec<Option<f32>> = profile.iter().map(|s| s.height()).collect();
            match evaluate_profile(&heights, settings.runway_length, settings) {
                Ok((start, end)) => {
                    accepted = Some(Affector::new(
                        approach.with_y(start),
                        departure.with_y(end),
                        settings.runway_width,
                    ));
                    break;
                }
                Err(reason) => {
                    tracing::trace!(airport, heading, ?reason, "runway heading rejected");
                }
            }
        }
        match accepted {
            Some(runway) => {
                tracing::debug!(airport, approach = ?runway.approach, departure = ?runway.departure, "runway placed");
                runways.push(runway);
            }
            None => tracing::debug!(airport, "no suitable runway heading"),
        }
    }
    tracing::info!(placed = runways.len(), requested = settings.runway_count, "runway planning finished");
    Ok(runways)
}

/// Centerline endpoints for one attempt at `heading`, centered on a new random
/// point of the spread circle.
fn candidate_strip(rng: &mut fastrand::Rng, settings: &FeatureSettings, heading: u32) -> (Vec3, Vec3) {
    let center = point_in_circle(rng) * settings.spread_radius;
    let angle = heading as f32 / settings.orientation_samples as f32 * TAU;
    let half = Vec2::from_angle(angle) * (settings.runway_length * 0.5);
    (
        Vec3::new(center.x - half.x, 0.0, center.y - half.y),
        Vec3::new(center.x + half.x, 0.0, center.y + half.y),
    )
}

fn point_in_circle(rng: &mut fastrand::Rng) -> Vec2 {
    loop {
        let p = Vec2::new(rng.f32() * 2.0 - 1.0, rng.f32() * 2.0 - 1.0);
        if p.length_squared() <= 1.0 {
            return p;
        }
    }
}
