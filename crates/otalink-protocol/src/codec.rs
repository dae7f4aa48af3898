//! WebSocket message codec for the otalink device protocol.
//!
//! Control messages are JSON text frames. Decoding is tolerant: callers get a
//! `CodecError::Malformed` for anything that is not a valid envelope and are
//! expected to drop it without closing the connection.

use crate::messages::{DeviceMessage, ServerMessage};
use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Inbound text is not a valid control envelope.
    #[error("Malformed control message: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Encode a server message to JSON string for WebSocket transmission.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::Serialize)
}

/// Decode a device message from JSON string received over WebSocket.
pub fn decode_device_message(text: &str) -> Result<DeviceMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Malformed)
}

/// Encode a device message. Used by device simulators and tests.
pub fn encode_device_message(msg: &DeviceMessage) -> Result<String, CodecError> {
    serde_json::to_string(msg).map_err(CodecError::Serialize)
}

/// Decode a server message. Used by device simulators and tests.
pub fn decode_server_message(text: &str) -> Result<ServerMessage, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Malformed)
}
