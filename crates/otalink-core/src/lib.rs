//! # otalink-core
//!
//! Core otalink data model and OTA transfer logic.
//!
//! This crate provides:
//! - Device metadata types and the `DeviceStore` abstraction
//! - Chunking of firmware images into bounded frames
//! - The OTA session state machine (without I/O)
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Transport, timing and locking live in `otalink-server`.

pub mod chunk;
pub mod model;
pub mod ota;
pub mod store;

pub use chunk::ChunkStreamer;
pub use model::*;
pub use ota::{FailureReason, InvalidTransition, OtaSession, OtaState};
pub use store::{DeviceStore, MemoryDeviceStore, StoreError};
