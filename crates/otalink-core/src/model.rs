//! otalink data model types.
//!
//! These types describe devices as seen by the server:
//! - `DeviceRecord` is the persisted view kept by a `DeviceStore`
//! - `DeviceSummary` is the live view returned by the admin API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Size of one binary firmware frame on the device channel.
pub const OTA_CHUNK_SIZE: usize = 4096;

/// Metadata remembered about a device across connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Caller-assigned device identity.
    pub device_id: String,

    /// When the device first announced itself.
    pub first_seen: DateTime<Utc>,

    /// Last registration or liveness response.
    pub last_seen: DateTime<Utc>,

    /// Number of identity announcements received.
    pub registrations: u32,
}

impl DeviceRecord {
    /// Create a record for a device seen for the first time.
    pub fn new(device_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            first_seen: at,
            last_seen: at,
            registrations: 0,
        }
    }
}

/// Device listing entry for the admin API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,

    /// Whether a live connection is registered for this device.
    pub online: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,

    pub last_seen: DateTime<Utc>,

    /// Whether an OTA transfer is currently running.
    pub transfer_active: bool,
}
