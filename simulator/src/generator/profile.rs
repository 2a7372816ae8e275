use anyhow::{bail, Context};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use surakshacore::math::GeoHelper;
use surakshacore::prelude::{LocationFix, MotionSample};

const GRAVITY: f64 = 9.81;

/// Synthetic accelerometer trace: gravity on z, noise on every axis, and
/// short side-to-side bursts where a shake should register.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotionProfileConfig {
    pub sample_rate_hz: u32,
    pub duration_ms: u64,
    pub noise: f64,
    pub shake_at_ms: Vec<u64>,
    pub shake_duration_ms: u64,
    pub shake_amplitude: f64,
    pub seed: u64,
}

impl Default for MotionProfileConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 50,
            duration_ms: 3_000,
            noise: 0.4,
            shake_at_ms: vec![1_200],
            shake_duration_ms: 300,
            shake_amplitude: 22.0,
            seed: 7,
        }
    }
}

impl MotionProfileConfig {
    pub fn interval_ms(&self) -> u64 {
        1_000 / u64::from(self.sample_rate_hz.max(1))
    }

    fn in_burst(&self, offset_ms: u64) -> bool {
        self.shake_at_ms
            .iter()
            .any(|&start| offset_ms >= start && offset_ms < start + self.shake_duration_ms)
    }
}

/// Samples stamped `base_ms + offset`.
pub fn build_motion_trace(
    config: &MotionProfileConfig,
    base_ms: u64,
) -> anyhow::Result<Vec<MotionSample>> {
    if config.sample_rate_hz == 0 {
        bail!("motion profile sample_rate_hz must be positive");
    }
    let interval = config.interval_ms().max(1);
    let count = config.duration_ms / interval;
    let capacity = usize::try_from(count).context("motion trace too long")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut samples = Vec::with_capacity(capacity);
    let noise = config.noise.abs();

    for index in 0..count {
        let offset = index * interval;
        let mut jitter = || {
            if noise > 0.0 {
                rng.gen_range(-noise..noise)
            } else {
                0.0
            }
        };
        let (mut x, y, z) = (jitter(), jitter(), GRAVITY + jitter());
        if config.in_burst(offset) {
            let sign = if index % 2 == 0 { 1.0 } else { -1.0 };
            x += sign * config.shake_amplitude;
        }
        samples.push(MotionSample::new(x, y, z, base_ms + offset));
    }

    Ok(samples)
}

/// Steady walk along a heading with positional jitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackConfig {
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub points: usize,
    pub step_m: f64,
    pub heading_deg: f64,
    pub jitter_m: f64,
    pub interval_ms: u64,
    pub accuracy_m: f64,
    pub seed: u64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            start_latitude: 28.6139,
            start_longitude: 77.2090,
            points: 8,
            step_m: 6.0,
            heading_deg: 45.0,
            jitter_m: 1.5,
            interval_ms: 2_000,
            accuracy_m: 12.0,
            seed: 11,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub offset_ms: u64,
    pub fix: LocationFix,
}

pub fn build_track(config: &TrackConfig, start: DateTime<Utc>) -> Vec<TrackPoint> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let heading = config.heading_deg.to_radians();
    let jitter = config.jitter_m.abs();

    (0..config.points)
        .map(|index| {
            let travelled = config.step_m * index as f64;
            let (mut north, mut east) = (travelled * heading.cos(), travelled * heading.sin());
            if jitter > 0.0 {
                north += rng.gen_range(-jitter..jitter);
                east += rng.gen_range(-jitter..jitter);
            }
            let (latitude, longitude) =
                GeoHelper::offset_m(config.start_latitude, config.start_longitude, north, east);
            let offset_ms = config.interval_ms * index as u64;
            let timestamp = start + Duration::milliseconds(offset_ms as i64);
            TrackPoint {
                offset_ms,
                fix: LocationFix::new(latitude, longitude, timestamp)
                    .with_accuracy(config.accuracy_m),
            }
        })
        .collect()
}
