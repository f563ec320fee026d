//! Device cache
//!
//! Last-known MAC and I-Am metadata per device instance, shared between the
//! engine thread (which upserts on every I-Am) and caller threads.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{DeviceRecord, Mac, MAX_INSTANCE};

/// Thread-safe `device instance -> DeviceRecord` map
#[derive(Debug, Default)]
pub struct DeviceCache {
    devices: Mutex<HashMap<u32, DeviceRecord>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for its device instance
    ///
    /// Returns false (and stores nothing) when the record's instance is not a
    /// valid device instance.
    pub fn put(&self, record: DeviceRecord) -> bool {
        if record.device_instance > MAX_INSTANCE {
            tracing::debug!("Ignoring device record with invalid instance {}", record.device_instance);
            return false;
        }
        self.devices.lock().insert(record.device_instance, record);
        true
    }

    pub fn get(&self, device_instance: u32) -> Option<DeviceRecord> {
        self.devices.lock().get(&device_instance).cloned()
    }

    /// MAC the device last announced itself from
    pub fn get_transport_address(&self, device_instance: u32) -> Option<Mac> {
        self.devices.lock().get(&device_instance)?.source_mac
    }

    pub fn clear(&self) {
        self.devices.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// All cached records, ordered by device instance
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> = self.devices.lock().values().cloned().collect();
        records.sort_by_key(|r| r.device_instance);
        records
    }
}
