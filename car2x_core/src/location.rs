//! Position fixes and the location-provider collaborator interface.
//!
//! The provider is push-style: subscriptions deliver fixes into a bounded
//! queue owned by the agent, and the one-shot request resolves to a single
//! fix. Everything downstream of the queue is synchronous.

use async_trait::async_trait;
use car2x_env::CancelHandle;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::geo_math::GeoPoint;

/// Conversion factor between m/s and km/h.
pub const MPS_TO_KMH: f64 = 3.6;

/// A single position measurement from the location provider.
///
/// Immutable once created; the filter consumes it at most once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Degrees
    #[serde(alias = "lat")]
    pub latitude: f64,

    /// Degrees
    #[serde(alias = "lon")]
    pub longitude: f64,

    /// Horizontal accuracy in meters; `<= 0` means unknown/invalid
    pub accuracy: f32,

    /// Ground speed in m/s
    #[serde(default)]
    pub speed: f32,

    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f32, speed: f32, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            speed,
            timestamp,
        }
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Sensor speed converted to km/h.
    pub fn speed_kmh(&self) -> f64 {
        f64::from(self.speed) * MPS_TO_KMH
    }

    /// Returns a copy re-stamped with `timestamp`.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Provider accuracy/power trade-off for an update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    HighAccuracy,
    BalancedPowerAccuracy,
}

/// A periodic update subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    pub priority: Priority,

    /// Desired interval between fixes
    pub interval: Duration,

    /// Fastest interval the provider may deliver at
    pub min_interval: Duration,
}

impl UpdateRequest {
    /// High-rate, high-accuracy stream (500 ms, at most every 300 ms).
    pub fn high_accuracy() -> Self {
        Self {
            priority: Priority::HighAccuracy,
            interval: Duration::from_millis(500),
            min_interval: Duration::from_millis(300),
        }
    }

    /// Lower-rate balanced stream for indoor/poor-sky conditions (2 s, at most every 1.5 s).
    pub fn balanced() -> Self {
        Self {
            priority: Priority::BalancedPowerAccuracy,
            interval: Duration::from_millis(2000),
            min_interval: Duration::from_millis(1500),
        }
    }
}

/// Handle to an active update subscription.
///
/// Cancelling (or dropping) it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancelHandle,
}

impl Subscription {
    pub fn new(cancel: CancelHandle) -> Self {
        Self { cancel }
    }

    /// Unsubscribes. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// External source of raw position fixes.
#[async_trait]
pub trait LocationProvider: Send + Sync + 'static {
    /// Fetches one current fix, if the provider can produce one.
    async fn current_fix(&self, priority: Priority) -> Option<LocationFix>;

    /// Starts delivering fixes into `updates` at the requested rate until the
    /// returned subscription is cancelled.
    fn request_updates(
        &self,
        request: UpdateRequest,
        updates: mpsc::Sender<LocationFix>,
    ) -> Subscription;
}

/// Provider that never produces a fix (location unavailable or not permitted).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocation;

#[async_trait]
impl LocationProvider for NoLocation {
    async fn current_fix(&self, _priority: Priority) -> Option<LocationFix> {
        None
    }

    fn request_updates(
        &self,
        _request: UpdateRequest,
        _updates: mpsc::Sender<LocationFix>,
    ) -> Subscription {
        let (cancel, _) = car2x_env::cancel_pair();
        Subscription::new(cancel)
    }
}
