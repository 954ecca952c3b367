//! The shared "current position" and the pipeline that writes it.
//!
//! `SharedPositionState` is the only datum crossing activity boundaries: the
//! fix pump writes it, the beacon tick and the V2V handler read it. Readers
//! get a copy of the whole fix, so they see either the previous or the new
//! value and never a torn one.
//!
//! Every `clear` starts a new generation. A pipeline publishes only into the
//! generation it was created in, so a pump from a stopped session that is
//! still draining cannot overwrite the state of its successor.

use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::location::LocationFix;
use crate::location_filter::{FilterConfig, FilterOutcome, LocationFilter, RejectReason};
use crate::sinks::StatusSink;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    fix: Option<LocationFix>,
}

/// Most recently accepted fix, shared by reference.
#[derive(Debug, Clone, Default)]
pub struct SharedPositionState {
    inner: Arc<RwLock<Slot>>,
}

impl SharedPositionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current fix, if one has been accepted.
    pub fn snapshot(&self) -> Option<LocationFix> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).fix
    }

    pub fn is_present(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Forgets the current fix and starts a new generation.
    pub fn clear(&self) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slot.generation = slot.generation.wrapping_add(1);
        slot.fix = None;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).generation
    }

    /// Only the fix pipeline publishes, and only accepted fixes.
    ///
    /// Returns false (and changes nothing) if `generation` has been retired.
    pub(crate) fn publish(&self, generation: u64, fix: LocationFix) -> bool {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            return false;
        }
        slot.fix = Some(fix);
        true
    }
}

/// Filter plus shared state plus status reporting.
///
/// Owned by the single pump task; every raw fix goes through `ingest`.
pub struct FixPipeline {
    filter: LocationFilter,
    position: SharedPositionState,
    generation: u64,
    status: Arc<dyn StatusSink>,
}

impl FixPipeline {
    pub fn new(
        config: FilterConfig,
        position: SharedPositionState,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            filter: LocationFilter::new(config),
            generation: position.generation(),
            position,
            status,
        }
    }

    pub fn filter(&self) -> &LocationFilter {
        &self.filter
    }

    /// Resets the filter and the shared state together.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.position.clear();
        self.generation = self.position.generation();
    }

    /// Evaluates one raw fix at `now_ms`, publishes it if accepted, and
    /// reports the outcome.
    pub fn ingest(&mut self, raw: LocationFix, now_ms: i64) -> FilterOutcome {
        let outcome = self.filter.accept(raw, now_ms);
        match outcome {
            FilterOutcome::Accepted(fix) => {
                if !self.position.publish(self.generation, fix) {
                    debug!(timestamp = fix.timestamp, "fix from a retired session dropped");
                    return outcome;
                }
                self.status.status(&format!(
                    "GPS OK (acc={} m), v={:.1} km/h",
                    fix.accuracy,
                    fix.speed_kmh()
                ));
            }
            FilterOutcome::Rejected(reason) => {
                debug!(
                    reason = reason.code(),
                    accuracy = raw.accuracy,
                    timestamp = raw.timestamp,
                    "fix rejected"
                );
                let text = match reason {
                    RejectReason::Stale => format!("Ignoring old GPS ({} m)", raw.accuracy),
                    _ => format!("Ignoring bad GPS (acc={} m)", raw.accuracy),
                };
                self.status.status(&text);
            }
        }
        outcome
    }
}
