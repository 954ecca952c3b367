//! Noise-rejection filter for raw position fixes.
//!
//! Turns a stream of raw, sometimes stale and sometimes erratic fixes into a
//! trustworthy current position. Rules are applied in order and the first
//! failing rule decides the rejection reason:
//!
//! 1. **Freshness** - fix older than `max_fix_age_ms` → `stale`
//! 2. **Accuracy** - accuracy `<= 0` or `> max_accuracy_m` → `low_accuracy`
//!    - latitude/longitude non-finite or outside WGS84 range → `invalid_position`
//! 3. **First fix** - no previous acceptance → accept
//! 4. **Ordering** - not strictly newer than the last accepted fix → `non_monotonic_time`
//! 5. **Implied speed** - distance / elapsed time above `max_jump_speed_mps` → `position_jump`
//! 6. **Speed spike** - sensor speed changed by more than `max_speed_delta_kmh` → `speed_spike`
//!
//! The filter is deterministic and performs no I/O. A rejection never
//! touches the stored state.

use serde::{Deserialize, Serialize};

use crate::location::LocationFix;

/// Thresholds for the acceptance rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    /// Maximum age of a fix relative to the evaluation instant (ms)
    pub max_fix_age_ms: i64,

    /// Worst accuracy still accepted (m)
    pub max_accuracy_m: f32,

    /// Highest plausible displacement speed between fixes (m/s)
    pub max_jump_speed_mps: f64,

    /// Largest plausible change in sensor speed between fixes (km/h)
    pub max_speed_delta_kmh: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_fix_age_ms: 3000,
            max_accuracy_m: 25.0,
            max_jump_speed_mps: 12.0,
            max_speed_delta_kmh: 40.0,
        }
    }
}

/// Why a fix was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Stale,
    LowAccuracy,
    InvalidPosition,
    NonMonotonicTime,
    PositionJump,
    SpeedSpike,
}

impl RejectReason {
    /// Stable reason code for status reporting.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Stale => "stale",
            RejectReason::LowAccuracy => "low_accuracy",
            RejectReason::InvalidPosition => "invalid_position",
            RejectReason::NonMonotonicTime => "non_monotonic_time",
            RejectReason::PositionJump => "position_jump",
            RejectReason::SpeedSpike => "speed_spike",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Result of evaluating one raw fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOutcome {
    Accepted(LocationFix),
    Rejected(RejectReason),
}

impl FilterOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterOutcome::Accepted(_))
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            FilterOutcome::Accepted(_) => None,
            FilterOutcome::Rejected(reason) => Some(*reason),
        }
    }
}

/// Stateful acceptance filter.
///
/// Holds only the last accepted fix; everything else about a raw fix is
/// discarded after evaluation.
#[derive(Debug, Clone)]
pub struct LocationFilter {
    config: FilterConfig,
    last_accepted: Option<LocationFix>,
}

impl LocationFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            last_accepted: None,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// The most recently accepted fix, if any.
    pub fn last_accepted(&self) -> Option<&LocationFix> {
        self.last_accepted.as_ref()
    }

    /// Forgets the last accepted fix (new broadcasting session).
    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    /// Evaluates `raw` at wall-clock instant `now_ms`.
    pub fn accept(&mut self, raw: LocationFix, now_ms: i64) -> FilterOutcome {
        match self.evaluate(&raw, now_ms) {
            Ok(()) => {
                self.last_accepted = Some(raw);
                FilterOutcome::Accepted(raw)
            }
            Err(reason) => FilterOutcome::Rejected(reason),
        }
    }

    fn evaluate(&self, raw: &LocationFix, now_ms: i64) -> Result<(), RejectReason> {
        if now_ms.saturating_sub(raw.timestamp) > self.config.max_fix_age_ms {
            return Err(RejectReason::Stale);
        }

        // Written as a positive range check so NaN accuracy is rejected too.
        if !(raw.accuracy > 0.0 && raw.accuracy <= self.config.max_accuracy_m) {
            return Err(RejectReason::LowAccuracy);
        }

        // Range checks are false for NaN, so non-finite coordinates fail too.
        if !((-90.0..=90.0).contains(&raw.latitude) && (-180.0..=180.0).contains(&raw.longitude)) {
            return Err(RejectReason::InvalidPosition);
        }

        let Some(last) = self.last_accepted.as_ref() else {
            return Ok(());
        };

        let dt_secs = raw.timestamp.saturating_sub(last.timestamp) as f64 / 1000.0;
        if dt_secs <= 0.0 {
            return Err(RejectReason::NonMonotonicTime);
        }

        let distance = last.position().distance_to(&raw.position());
        let implied_speed = distance / dt_secs;
        if !(implied_speed <= self.config.max_jump_speed_mps) {
            return Err(RejectReason::PositionJump);
        }

        let speed_delta = (raw.speed_kmh() - last.speed_kmh()).abs();
        if !(speed_delta <= self.config.max_speed_delta_kmh) {
            return Err(RejectReason::SpeedSpike);
        }

        Ok(())
    }
}

impl Default for LocationFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}
