//! Protocol message types for the device WebSocket.
//!
//! This module defines all control messages of the otalink device protocol:
//! - Device → Server: REGISTER, PONG
//! - Server → Device: REGISTERED, PING, OTA_BEGIN, OTA_END
//!
//! Control messages are JSON objects discriminated by a `type` field and are
//! sent as WebSocket text frames. Firmware chunks are sent as binary frames
//! between OTA_BEGIN and OTA_END.

use serde::{Deserialize, Serialize};

/// Messages that can be received from a device.
///
/// Any well-formed envelope with an unrecognised `type` decodes to `Unknown`.
///
/// # Example
/// ```json
/// { "type": "REGISTER", "deviceId": "esp32-kitchen" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceMessage {
    /// Identity announcement.
    Register {
        #[serde(rename = "deviceId")]
        device_id: String,
    },

    /// Liveness response to a PING.
    Pong,

    /// Envelope with a type this server does not handle.
    #[serde(other)]
    Unknown,
}

/// Messages that can be sent from server to device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Registration confirmed.
    Registered {
        #[serde(rename = "deviceId")]
        device_id: String,
    },

    /// Keepalive probe; the device answers with PONG.
    Ping,

    /// A firmware transfer of `size` bytes follows.
    OtaBegin { size: u64 },

    /// All firmware bytes have been sent.
    OtaEnd,
}
