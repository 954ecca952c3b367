//! Presentation collaborators exposed by the core.
//!
//! The core never renders anything itself. Status lines and warning
//! summaries are handed to these sinks as finished text.

use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Receives human-readable status strings.
pub trait StatusSink: Send + Sync + 'static {
    fn status(&self, text: &str);

    /// Summary of the most recently sent beacon.
    fn last_beacon(&self, _text: &str) {}
}

/// Receives formatted DENM or nearest-peers summaries.
pub trait WarningSink: Send + Sync + 'static {
    fn warning(&self, text: &str);
}

/// Sink that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn status(&self, text: &str) {
        info!(target: "car2x::status", "{text}");
    }

    fn last_beacon(&self, text: &str) {
        info!(target: "car2x::beacon", "{}", text.replace('\n', " "));
    }
}

impl WarningSink for TracingSink {
    fn warning(&self, text: &str) {
        warn!(target: "car2x::warning", "{}", text.replace('\n', " | "));
    }
}

/// Sink that records every line in memory, for tests and the simulator.
#[derive(Debug, Default)]
pub struct MemorySink {
    statuses: Mutex<Vec<String>>,
    beacons: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<String> {
        lock(&self.statuses).clone()
    }

    pub fn beacons(&self) -> Vec<String> {
        lock(&self.beacons).clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        lock(&self.warnings).clone()
    }

    pub fn last_status(&self) -> Option<String> {
        lock(&self.statuses).last().cloned()
    }

    pub fn last_warning(&self) -> Option<String> {
        lock(&self.warnings).last().cloned()
    }

    /// Number of status lines that start with `prefix`.
    pub fn count_status(&self, prefix: &str) -> usize {
        lock(&self.statuses)
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        lock(&self.statuses).clear();
        lock(&self.beacons).clear();
        lock(&self.warnings).clear();
    }
}

fn lock(lines: &Mutex<Vec<String>>) -> std::sync::MutexGuard<'_, Vec<String>> {
    lines.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StatusSink for MemorySink {
    fn status(&self, text: &str) {
        lock(&self.statuses).push(text.to_string());
    }

    fn last_beacon(&self, text: &str) {
        lock(&self.beacons).push(text.to_string());
    }
}

impl WarningSink for MemorySink {
    fn warning(&self, text: &str) {
        lock(&self.warnings).push(text.to_string());
    }
}
