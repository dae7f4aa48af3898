//! Live device connection registry.
//!
//! Maps a device identity to the connection it most recently registered on.
//! The registry is the only state shared between connection tasks and admin
//! requests. All critical sections are short and never span an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use otalink_core::DeviceSummary;
use tracing::debug;

use crate::link::{DeviceLink, LinkId};

/// One registered device.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub link: DeviceLink,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, RegistryEntry>,
    transfers: HashSet<String>,
}

/// Registry of reachable devices.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: Mutex<Inner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `link` for `device_id`, replacing any previous entry.
    ///
    /// Returns the superseded link when a different connection was
    /// registered under the same identity. The caller decides whether to
    /// close it.
    pub fn register(&self, device_id: &str, link: DeviceLink) -> Option<DeviceLink> {
        let now = Utc::now();
        let entry = RegistryEntry {
            link,
            connected_at: now,
            last_seen: now,
        };
        let new_id = entry.link.id();

        let previous = self.lock().entries.insert(device_id.to_string(), entry);
        debug!("Registered {} on {}", device_id, new_id);

        previous
            .map(|prev| prev.link)
            .filter(|prev| prev.id() != new_id)
    }

    /// Remove `device_id` only if it is still registered on `link_id`.
    ///
    /// A connection that was superseded by a newer registration must not
    /// evict the newer entry when it closes.
    pub fn unregister(&self, device_id: &str, link_id: LinkId) -> bool {
        let mut inner = self.lock();
        match inner.entries.get(device_id) {
            Some(entry) if entry.link.id() == link_id => {
                inner.entries.remove(device_id);
                true
            }
            _ => false,
        }
    }

    /// Current connection for `device_id`.
    pub fn lookup(&self, device_id: &str) -> Option<DeviceLink> {
        self.lock()
            .entries
            .get(device_id)
            .map(|entry| entry.link.clone())
    }

    /// Full entry for `device_id`.
    pub fn entry(&self, device_id: &str) -> Option<RegistryEntry> {
        self.lock().entries.get(device_id).cloned()
    }

    /// Update last-seen for `device_id`. Returns false if not registered.
    pub fn touch(&self, device_id: &str) -> bool {
        match self.lock().entries.get_mut(device_id) {
            Some(entry) => {
                entry.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.lock().entries.contains_key(device_id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Registered devices sorted by identity.
    pub fn snapshot(&self) -> Vec<DeviceSummary> {
        let inner = self.lock();
        let mut list: Vec<DeviceSummary> = inner
            .entries
            .iter()
            .map(|(device_id, entry)| DeviceSummary {
                device_id: device_id.clone(),
                online: entry.link.is_open(),
                connected_at: Some(entry.connected_at),
                last_seen: entry.last_seen,
                transfer_active: inner.transfers.contains(device_id),
            })
            .collect();
        list.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        list
    }

    /// Whether an OTA transfer currently holds the lock for `device_id`.
    pub fn is_transfer_active(&self, device_id: &str) -> bool {
        self.lock().transfers.contains(device_id)
    }

    /// Claim the per-device transfer lock.
    ///
    /// Returns `None` if another transfer to the same device is running.
    /// The lock is released when the guard is dropped.
    pub fn try_begin_transfer(self: &Arc<Self>, device_id: &str) -> Option<TransferGuard> {
        if !self.lock().transfers.insert(device_id.to_string()) {
            return None;
        }
        Some(TransferGuard {
            registry: Arc::clone(self),
            device_id: device_id.to_string(),
        })
    }
}

/// Holds the transfer lock for one device.
#[derive(Debug)]
pub struct TransferGuard {
    registry: Arc<DeviceRegistry>,
    device_id: String,
}

impl TransferGuard {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.registry.lock().transfers.remove(&self.device_id);
    }
}
