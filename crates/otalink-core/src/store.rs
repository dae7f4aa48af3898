//! Device metadata storage.
//!
//! The server records when devices announce themselves and answer keepalives.
//! Storage is abstracted so it can be implemented differently per platform:
//! - `MemoryDeviceStore` keeps records for the lifetime of the process
//! - persistent backends can implement `DeviceStore` on top of a file or database

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::model::DeviceRecord;

/// Errors that can occur during device store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage could not be accessed.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Failed to write a record.
    #[error("Write error: {0}")]
    WriteError(String),
}

/// Abstract device metadata storage.
///
/// All methods are synchronous and are expected to be cheap; callers never
/// hold the connection registry lock while calling into the store.
pub trait DeviceStore: Send + Sync {
    /// Record an identity announcement.
    fn record_registration(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Record a liveness response.
    fn record_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Load the record for a device.
    fn get(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError>;

    /// List all known devices, sorted by identity.
    fn list(&self) -> Result<Vec<DeviceRecord>, StoreError>;
}

/// In-memory device store.
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl MemoryDeviceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, device_id: &str, at: DateTime<Utc>, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut DeviceRecord),
    {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let record = records
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord::new(device_id, at));
        if at > record.last_seen {
            record.last_seen = at;
        }
        f(record);
        Ok(())
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn record_registration(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(device_id, at, |record| record.registrations += 1)
    }

    fn record_seen(&self, device_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(device_id, at, |_| {})
    }

    fn get(&self, device_id: &str) -> Result<Option<DeviceRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(records.get(device_id).cloned())
    }

    fn list(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let mut list: Vec<DeviceRecord> = records.values().cloned().collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_registration_creates_record() {
        let store = MemoryDeviceStore::new();
        let now = Utc::now();

        store.record_registration("D1", now).unwrap();

        let record = store.get("D1").unwrap().unwrap();
        assert_eq!(record.device_id, "D1");
        assert_eq!(record.first_seen, now);
        assert_eq!(record.registrations, 1);
    }

    #[test]
    fn test_seen_updates_last_seen_only() {
        let store = MemoryDeviceStore::new();
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);

        store.record_registration("D1", t0).unwrap();
        store.record_seen("D1", t1).unwrap();

        let record = store.get("D1").unwrap().unwrap();
        assert_eq!(record.first_seen, t0);
        assert_eq!(record.last_seen, t1);
        assert_eq!(record.registrations, 1);
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let store = MemoryDeviceStore::new();
        let t0 = Utc::now();

        store.record_seen("D1", t0).unwrap();
        store.record_seen("D1", t0 - Duration::seconds(5)).unwrap();

        assert_eq!(store.get("D1").unwrap().unwrap().last_seen, t0);
    }

    #[test]
    fn test_list_sorted() {
        let store = MemoryDeviceStore::new();
        let now = Utc::now();
        store.record_registration("b", now).unwrap();
        store.record_registration("a", now).unwrap();

        let ids: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.device_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_unknown_device() {
        let store = MemoryDeviceStore::new();
        assert!(store.get("missing").unwrap().is_none());
    }
}
