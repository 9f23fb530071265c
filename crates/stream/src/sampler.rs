use glam::Vec3;
use terrastream_common::{HeightSample, SampleFilter};
use terrastream_device::{ComputeDevice, DeviceError};

/// Synchronous height queries against the device.
///
/// Used directly by feature placement, and by the load balancer to service
/// queued sample requests.
#[derive(Debug)]
pub struct PointSampler<'a, D> {
    device: &'a D,
}

impl<'a, D: ComputeDevice> PointSampler<'a, D> {
    pub fn new(device: &'a D) -> Self {
        Self { device }
    }

    pub fn sample(&self, points: &[Vec3], filter: &SampleFilter) -> Result<Vec<HeightSample>, DeviceError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self.device.sample_points(points, filter)?;
        if raw.len() != points.len() {
            return Err(DeviceError::LayoutMismatch {
                expected: points.len(),
                actual: raw.len(),
            });
        }
        let samples: Vec<HeightSample> = raw.into_iter().map(|position| HeightSample { position }).collect();
        tracing::trace!(
            points = samples.len(),
            valid = samples.iter().filter(|s| s.is_valid()).count(),
            "points sampled"
        );
        Ok(samples)
    }

    /// Sample `count` evenly spaced points from `start` to `end` inclusive.
    pub fn sample_line(
        &self,
        start: Vec3,
        end: Vec3,
        count: usize,
        filter: &SampleFilter,
    ) -> Result<Vec<HeightSample>, DeviceError> {
        let points: Vec<Vec3> = match count {
            0 => Vec::new(),
            1 => vec![start],
            n => (0..n)
                .map(|i| start.lerp(end, i as f32 / (n - 1) as f32))
                .collect(),
        };
        self.sample(&points, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream_common::{Affector, TerrainSettings};
    use terrastream_device::HeightfieldDevice;

    fn device() -> HeightfieldDevice {
        HeightfieldDevice::new(&TerrainSettings {
            size: 8192.0,
            height: 2000.0,
            noise_layers: 8,
            base_frequency: 0.001,
            ..TerrainSettings::default()
        })
    }

    #[test]
    fn line_sampling_spans_endpoints() {
        let device = device();
        let sampler = PointSampler::new(&device);
        let samples = sampler
            .sample_line(Vec3::ZERO, Vec3::new(90.0, 0.0, 0.0), 10, &SampleFilter::default())
            .unwrap();
        assert_eq!(samples.len(), 10);
        assert_eq!(samples[0].position.x, 0.0);
        assert!((samples[9].position.x - 90.0).abs() < 1e-4);
        assert!((samples[3].position.x - 30.0).abs() < 1e-4);
        assert!(samples.iter().all(HeightSample::is_valid));
    }

    #[test]
    fn flat_runway_samples_agree_unless_affectors_ignored() {
        let mut device = device();
        let approach = Vec3::new(1875.0, 800.0, 3140.0);
        let departure = Vec3::new(2125.0, 800.0, 3140.0);
        device.upload_affectors(&[Affector::new(approach, departure, 10.0)]).unwrap();
        let sampler = PointSampler::new(&device);

        let flattened = sampler
            .sample_line(approach, departure, 10, &SampleFilter::default())
            .unwrap();
        let heights: Vec<f32> = flattened.iter().filter_map(HeightSample::height).collect();
        assert_eq!(heights.len(), 10);
        for h in &heights {
            assert!((h - heights[0]).abs() < 0.01, "{heights:?}");
        }

        let raw_filter = SampleFilter {
            ignore_affectors: true,
            ..SampleFilter::default()
        };
        let raw = sampler.sample_line(approach, departure, 10, &raw_filter).unwrap();
        let spread = raw
            .iter()
            .map(|s| s.position.y)
            .fold(f32::NEG_INFINITY, f32::max)
            - raw.iter().map(|s| s.position.y).fold(f32::INFINITY, f32::min);
        assert!(spread > 0.01, "raw terrain unexpectedly flat: {spread}");
    }

    #[test]
    fn filtered_columns_are_invalid() {
        let device = device();
        let sampler = PointSampler::new(&device);
        let filter = SampleFilter {
            max_height: -10.0,
            ..SampleFilter::default()
        };
        let samples = sampler.sample(&[Vec3::ZERO, Vec3::X], &filter).unwrap();
        assert!(samples.iter().all(|s| s.height().is_none()));
        assert!(sampler.sample(&[], &filter).unwrap().is_empty());
    }
}
