//! Seeded synthetic drives with injected fix faults.

use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};
use serde::Serialize;
use std::time::Duration;

use car2x_core::{GeoPoint, LocationFix, RejectReason};

/// Mean meters per degree of latitude.
const METERS_PER_DEG: f64 = 111_195.0;

/// A deliberately corrupted fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Timestamp five seconds in the past
    Stale,
    /// Accuracy of 40 m
    LowAccuracy,
    /// Position displaced 200 m north
    Jump,
    /// Sensor speed 15 m/s above truth
    SpeedSpike,
}

impl FaultKind {
    pub const ALL: [FaultKind; 4] = [
        FaultKind::Stale,
        FaultKind::LowAccuracy,
        FaultKind::Jump,
        FaultKind::SpeedSpike,
    ];

    /// The rejection the filter must produce for this fault.
    pub fn expected_reason(&self) -> RejectReason {
        match self {
            FaultKind::Stale => RejectReason::Stale,
            FaultKind::LowAccuracy => RejectReason::LowAccuracy,
            FaultKind::Jump => RejectReason::PositionJump,
            FaultKind::SpeedSpike => RejectReason::SpeedSpike,
        }
    }
}

/// One fix of a drive, delivered at `offset` from the start.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceSample {
    pub offset: Duration,
    pub fix: LocationFix,
    pub fault: Option<FaultKind>,
}

/// Shape of a synthetic drive.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub origin: GeoPoint,

    /// Degrees clockwise from north
    pub heading_deg: f64,

    /// Ground-truth speed (m/s)
    pub speed_mps: f64,

    /// Interval between fixes
    pub step: Duration,

    /// Standard deviation of horizontal position noise (m)
    pub position_noise_m: f64,

    /// Standard deviation of sensor speed noise (m/s)
    pub speed_noise_mps: f64,

    /// Probability that a fix (other than the first) is corrupted
    pub fault_rate: f64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            origin: GeoPoint::new(48.137, 11.575),
            heading_deg: 60.0,
            speed_mps: 6.0,
            step: Duration::from_millis(500),
            position_noise_m: 0.3,
            speed_noise_mps: 0.2,
            fault_rate: 0.15,
        }
    }
}

/// Offsets `origin` by `north_m` / `east_m` meters (flat-earth, fine for short drives).
pub fn offset_point(origin: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
    let lat = origin.lat + north_m / METERS_PER_DEG;
    let lon = origin.lon + east_m / (METERS_PER_DEG * origin.lat.to_radians().cos());
    GeoPoint::new(lat, lon)
}

/// Generates `samples` fixes along a straight noisy drive.
///
/// `epoch_ms` is the wall-clock time of offset zero; clean fixes are
/// stamped with their delivery time. Fails only for a negative or
/// non-finite noise deviation.
pub fn noisy_drive<R: Rng>(
    rng: &mut R,
    config: &DriveConfig,
    epoch_ms: i64,
    samples: usize,
) -> Result<Vec<TraceSample>, NormalError> {
    let position_noise = Normal::new(0.0, config.position_noise_m)?;
    let speed_noise = Normal::new(0.0, config.speed_noise_mps)?;
    let (sin_h, cos_h) = config.heading_deg.to_radians().sin_cos();

    let trace = (0..samples)
        .map(|i| {
            let offset = config.step * i as u32;
            let travelled = config.speed_mps * offset.as_secs_f64();
            let north = travelled * cos_h + position_noise.sample(rng);
            let east = travelled * sin_h + position_noise.sample(rng);
            let position = offset_point(config.origin, north, east);
            let speed = (config.speed_mps + speed_noise.sample(rng)).max(0.0) as f32;
            let accuracy = rng.gen_range(3.0f32..8.0);
            let timestamp = epoch_ms + offset.as_millis() as i64;

            let mut fix = LocationFix::new(position.lat, position.lon, accuracy, speed, timestamp);
            let fault = (i > 0 && rng.gen_bool(config.fault_rate))
                .then(|| FaultKind::ALL[rng.gen_range(0..FaultKind::ALL.len())]);

            match fault {
                Some(FaultKind::Stale) => fix.timestamp -= 5_000,
                Some(FaultKind::LowAccuracy) => fix.accuracy = 40.0,
                Some(FaultKind::Jump) => {
                    let jumped = offset_point(position, 200.0, 0.0);
                    fix.latitude = jumped.lat;
                    fix.longitude = jumped.lon;
                }
                Some(FaultKind::SpeedSpike) => fix.speed += 15.0,
                None => {}
            }

            TraceSample {
                offset,
                fix,
                fault,
            }
        })
        .collect();
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use car2x_core::{FilterOutcome, LocationFilter};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const EPOCH: i64 = 1_704_067_200_000;

    fn drive(seed: u64, samples: usize) -> Vec<TraceSample> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        noisy_drive(&mut rng, &DriveConfig::default(), EPOCH, samples).unwrap()
    }

    #[test]
    fn test_same_seed_same_drive() {
        assert_eq!(drive(9, 50), drive(9, 50));
        assert_ne!(drive(9, 50), drive(10, 50));
    }

    #[test]
    fn test_offset_point_distance() {
        let origin = GeoPoint::new(48.0, 11.0);
        let moved = offset_point(origin, 300.0, 400.0);
        assert_relative_eq!(origin.distance_to(&moved), 500.0, max_relative = 5e-3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_first_sample_is_clean(seed in any::<u64>(), samples in 1usize..20) {
            prop_assert_eq!(drive(seed, samples)[0].fault, None);
        }

        #[test]
        fn prop_faults_rejected_with_matching_reason(seed in any::<u64>()) {
            let mut filter = LocationFilter::default();
            for sample in drive(seed, 120) {
                let now = EPOCH + sample.offset.as_millis() as i64;
                let outcome = filter.accept(sample.fix, now);
                match sample.fault {
                    Some(fault) => prop_assert_eq!(
                        outcome,
                        FilterOutcome::Rejected(fault.expected_reason()),
                        "at {:?}",
                        sample.offset
                    ),
                    None => prop_assert!(outcome.is_accepted(), "at {:?}: {:?}", sample.offset, outcome),
                }
            }
        }
    }
}
