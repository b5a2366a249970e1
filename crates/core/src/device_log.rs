use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::logger;
use crate::types::DeviceId;

/// Status history of one device. Only that device's worker writes to it.
#[derive(Debug)]
pub struct DeviceLog {
    id: DeviceId,
    entries: Mutex<Vec<String>>,
}

impl DeviceLog {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), entries: Mutex::new(Vec::new()) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn push(&self, msg: impl Into<String>) {
        let msg = msg.into();
        logger::info_p(&self.id, &msg);
        self.lock().push(msg);
    }

    pub fn warn(&self, msg: impl Into<String>) {
        let msg = msg.into();
        logger::warn_p(&self.id, &msg);
        self.lock().push(msg);
    }

    pub fn error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        logger::error_p(&self.id, &msg);
        self.lock().push(msg);
    }

    pub fn latest(&self) -> Option<String> {
        self.lock().last().cloned()
    }

    pub fn history(&self) -> Vec<String> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One presentation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub name: String,
    pub id: DeviceId,
    pub latest: String,
}

/// Per-device logs for every discovered device, in discovery order.
#[derive(Debug, Default)]
pub struct LogStore {
    devices: Vec<(String, Arc<DeviceLog>)>,
}

impl LogStore {
    /// Devices get display names `emulator-01`, `emulator-02`, ...
    pub fn new(ids: &[DeviceId]) -> Self {
        let devices = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                logger::register_prefix(id, logger::COLOR_BLUE);
                (format!("emulator-{:02}", i + 1), Arc::new(DeviceLog::new(id)))
            })
            .collect();
        Self { devices }
    }

    pub fn device(&self, id: &str) -> Option<Arc<DeviceLog>> {
        self.devices.iter().find(|(_, d)| d.id() == id).map(|(_, d)| Arc::clone(d))
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|(_, d)| d.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DeviceRow> {
        self.devices
            .iter()
            .map(|(name, d)| DeviceRow {
                name: name.clone(),
                id: d.id().to_string(),
                latest: d.latest().unwrap_or_default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_shows_latest_and_keeps_history() {
        let store = LogStore::new(&["127.0.0.1:5555".into(), "127.0.0.1:5556".into()]);
        let d = store.device("127.0.0.1:5556").unwrap();
        d.push("Take Screenshot");
        d.push("ID login action performed");

        let rows = store.snapshot();
        assert_eq!(rows[0].name, "emulator-01");
        assert_eq!(rows[0].latest, "");
        assert_eq!(rows[1].name, "emulator-02");
        assert_eq!(rows[1].latest, "ID login action performed");
        assert_eq!(d.history().len(), 2);
    }

    #[test]
    fn test_unknown_device() {
        assert!(LogStore::new(&[]).device("x").is_none());
    }
}
