//! Wire messages exchanged over the broadcast channels.
//!
//! Every message is a single JSON object in one UDP datagram. Inbound bytes
//! are validated exactly once, in [`InboundMessage::decode`]; downstream code
//! only ever sees the typed variants.
//!
//! | Message | Direction | Discriminator |
//! |---------|-----------|---------------|
//! | CAM     | outbound  | none (implied by port and shape) |
//! | DENM    | inbound   | `"type": "DENM"` |
//! | V2V     | inbound   | `"type": "V2V"` |

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::location::LocationFix;
use crate::vehicle_id::VehicleId;

pub const TYPE_CAM: &str = "CAM";
pub const TYPE_DENM: &str = "DENM";
pub const TYPE_V2V: &str = "V2V";

/// Errors raised while decoding an inbound payload.
///
/// These never leave the dispatcher: a payload that fails to decode is
/// simply ignored.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON, or a known message type with missing/mistyped fields
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON that is not an object
    #[error("Payload is not a JSON object")]
    NotAnObject,
}

/// Cooperative Awareness Message: periodic self-position broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CamMessage {
    pub vehicle_id: String,
    pub lat: f64,
    pub lon: f64,
    pub speed_kmh: f64,

    /// Send time, ms since the Unix epoch
    pub timestamp: i64,

    /// Sender's dotted-quad IPv4 address
    pub ip: String,

    /// Port the sender listens on for DENM/V2V replies
    pub denm_port: u16,
}

impl CamMessage {
    /// Builds a beacon from an accepted fix.
    ///
    /// `timestamp` is the send time, not the fix time.
    pub fn from_fix(
        vehicle_id: &VehicleId,
        fix: &LocationFix,
        timestamp: i64,
        ip: Ipv4Addr,
        denm_port: u16,
    ) -> Self {
        Self {
            vehicle_id: vehicle_id.as_str().to_string(),
            lat: fix.latitude,
            lon: fix.longitude,
            speed_kmh: fix.speed_kmh(),
            timestamp,
            ip: ip.to_string(),
            denm_port,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Decentralized Environmental Notification Message: a hazard alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenmMessage {
    pub event: String,
    pub cause: String,
    pub severity: String,

    /// Distance to the hazard in meters
    #[serde(
        default,
        deserialize_with = "negative_as_absent",
        skip_serializing_if = "Option::is_none"
    )]
    pub distance_m: Option<f64>,

    /// Speed associated with the event in km/h
    #[serde(
        default,
        deserialize_with = "negative_as_absent",
        skip_serializing_if = "Option::is_none"
    )]
    pub speed_kmh: Option<f64>,
}

impl DenmMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Tagged {
            kind: TYPE_DENM,
            body: self,
        })
    }
}

/// One peer in a V2V list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub vehicle_id: String,
    pub lat: f64,
    pub lon: f64,
    pub speed_kmh: f64,
}

impl PeerEntry {
    pub fn new(vehicle_id: impl Into<String>, lat: f64, lon: f64, speed_kmh: f64) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            lat,
            lon,
            speed_kmh,
        }
    }
}

/// Vehicle-to-vehicle peer list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct V2vMessage {
    pub vehicles: Vec<PeerEntry>,
}

impl V2vMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&Tagged {
            kind: TYPE_V2V,
            body: self,
        })
    }
}

#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

/// Legacy senders write `-1` for "not available".
fn negative_as_absent<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value.filter(|v| *v >= 0.0))
}

/// A decoded inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Cam(CamMessage),
    Denm(DenmMessage),
    V2v(V2vMessage),

    /// Well-formed object with a missing or unknown discriminator
    Unrecognized(Option<String>),
}

impl InboundMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(object) = &value else {
            return Err(DecodeError::NotAnObject);
        };

        let kind = object.get("type").map(|t| t.as_str().map(str::to_string));
        match kind {
            Some(Some(kind)) => match kind.as_str() {
                TYPE_DENM => Ok(Self::Denm(serde_json::from_value(value)?)),
                TYPE_V2V => Ok(Self::V2v(serde_json::from_value(value)?)),
                TYPE_CAM => Ok(Self::Cam(serde_json::from_value(value)?)),
                _ => Ok(Self::Unrecognized(Some(kind))),
            },
            Some(None) => Ok(Self::Unrecognized(None)),
            // CAMs carry no discriminator; recognise them by shape.
            None => Ok(serde_json::from_value::<CamMessage>(value)
                .map(Self::Cam)
                .unwrap_or(Self::Unrecognized(None))),
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Cam(_) => Some(TYPE_CAM),
            Self::Denm(_) => Some(TYPE_DENM),
            Self::V2v(_) => Some(TYPE_V2V),
            Self::Unrecognized(kind) => kind.as_deref(),
        }
    }
}
