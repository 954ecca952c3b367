//! Process-wide vehicle identifier.

use std::fmt;
use std::path::Path;
use tracing::{info, warn};

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Short identifier carried in every CAM, e.g. `CAR3F9A`.
///
/// Derived once at startup and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VehicleId(String);

impl VehicleId {
    /// `"CAR"` followed by the last four characters of `device_id`, upper-cased.
    pub fn from_device_id(device_id: &str) -> Self {
        let trimmed = device_id.trim();
        let chars: Vec<char> = trimmed.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        Self(format!("CAR{}", tail.to_uppercase()))
    }

    /// Resolves the identifier from, in order: an explicit device id, the
    /// host machine id, or a random UUID.
    pub fn detect(explicit: Option<&str>) -> Self {
        if let Some(device_id) = explicit.filter(|id| !id.trim().is_empty()) {
            return Self::from_device_id(device_id);
        }

        if let Some(machine_id) = read_machine_id(Path::new(MACHINE_ID_PATH)) {
            let id = Self::from_device_id(&machine_id);
            info!("Vehicle id {id} derived from {MACHINE_ID_PATH}");
            return id;
        }

        let random = uuid::Uuid::new_v4().simple().to_string();
        let id = Self::from_device_id(&random);
        warn!("No stable device id available, using random vehicle id {id}");
        id
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn read_machine_id(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let id = contents.trim();
    (!id.is_empty()).then(|| id.to_string())
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
