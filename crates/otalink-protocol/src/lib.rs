//! # otalink-protocol
//!
//! otalink device protocol message types and codec.
//!
//! This crate defines the JSON control envelopes exchanged over the device
//! WebSocket. Firmware bytes travel as raw binary frames and need no codec.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;
