//! # otalink-server
//!
//! Device connection server with chunked over-the-air firmware delivery.
//!
//! - `registry` tracks which device identity is reachable on which connection
//! - `dispatcher` applies REGISTER / PONG messages from devices
//! - `streamer` sends payloads as ordered, bounded binary frames
//! - `session` drives one firmware push from OTA_BEGIN to OTA_END
//! - `routes` and `server` expose all of it over HTTP and WebSocket

pub mod connection;
pub mod dispatcher;
pub mod link;
pub mod registry;
pub mod routes;
pub mod server;
pub mod session;
pub mod streamer;

#[cfg(test)]
mod test_support;

pub use dispatcher::{ConnectionContext, Dispatcher};
pub use link::{DeviceLink, Frame, LinkError, LinkId, LinkReceiver};
pub use registry::{DeviceRegistry, RegistryEntry, TransferGuard};
pub use routes::{create_router, AppState};
pub use server::{serve, OtaServer, ServerConfig, ServerError};
pub use session::{OtaConfig, OtaError, OtaService, TransferReport};
pub use streamer::{stream_chunks, StreamError};

pub use otalink_core::{DeviceStore, MemoryDeviceStore, OTA_CHUNK_SIZE};
