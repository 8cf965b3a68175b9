//! Device registry.
//!
//! Maps device serials to registered devices for log-batch
//! auto-detection. Built once by the host at startup and passed by
//! reference into every ingestion call - an explicit dependency, not a
//! process-wide singleton.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::storage::models::DeviceRecord;

/// Serial-indexed registry of known devices.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    by_serial: RwLock<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the registry contents with the given device rows. Both
    /// the primary serial and the HA secondary serial become lookup
    /// keys; primary registrations win on collision.
    pub fn load_rows(&self, rows: Vec<DeviceRecord>) {
        let mut map = HashMap::new();
        // Secondary serials first so a primary entry overwrites them.
        for device in &rows {
            if let Some(serial) = &device.secondary_serial {
                if !serial.is_empty() {
                    map.insert(serial.clone(), device.clone());
                }
            }
        }
        for device in rows {
            if let Some(serial) = &device.serial {
                if !serial.is_empty() {
                    map.insert(serial.clone(), device);
                }
            }
        }

        let count = map.len();
        *self.by_serial.write() = map;
        log::info!("DEVICE_REGISTRY_LOADED serials={}", count);
    }

    /// Resolve a log batch's devid to a registered device.
    pub fn resolve_serial(&self, serial: &str) -> Option<DeviceRecord> {
        self.by_serial.read().get(serial).cloned()
    }

    pub fn serial_count(&self) -> usize {
        self.by_serial.read().len()
    }

    pub fn clear(&self) {
        self.by_serial.write().clear();
    }
}
