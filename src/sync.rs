//! Pushing completed visits to a remote store
//!
//! Only closed visits (with an exit time) are pushed. A record is marked
//! synced once its push succeeds; failures are logged and retried on the
//! next pass.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::storage::{VehicleRecord, VehicleStore};

/// Remote destination for vehicle records
pub trait SyncTarget: Send {
    fn push(&self, record: &VehicleRecord) -> Result<()>;
}

/// Wire form of a pushed record
#[derive(Debug, Serialize)]
pub struct SyncPayload<'a> {
    pub device_id: &'a str,
    pub plate: &'a str,
    #[serde(rename = "type")]
    pub vehicle_type: &'a str,
    pub entry_time: &'a str,
    pub exit_time: Option<&'a str>,
    pub db_id: Option<i64>,
}

impl<'a> SyncPayload<'a> {
    pub fn new(device_id: &'a str, record: &'a VehicleRecord) -> Self {
        Self {
            device_id,
            plate: &record.plate,
            vehicle_type: record.vehicle_type.as_str(),
            entry_time: &record.entry_time,
            exit_time: record.exit_time.as_deref(),
            db_id: record.id,
        }
    }
}

/// Target that writes each payload to the log
#[derive(Debug, Clone)]
pub struct LogSyncTarget {
    device_id: String,
}

impl LogSyncTarget {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }
}

impl SyncTarget for LogSyncTarget {
    fn push(&self, record: &VehicleRecord) -> Result<()> {
        let payload = serde_json::to_string(&SyncPayload::new(&self.device_id, record)).map_err(|e| {
            crate::error::PipelineError::Sync {
                plate: record.plate.clone(),
                reason: e.to_string(),
            }
        })?;
        info!("Syncing {}: {}", record.plate, payload);
        Ok(())
    }
}

/// Push a single closed record and mark it synced; `Ok(false)` when the
/// record is still open or has no id
pub fn sync_record(store: &dyn VehicleStore, target: &dyn SyncTarget, record: &VehicleRecord) -> Result<bool> {
    let Some(id) = record.id else {
        return Ok(false);
    };
    if record.exit_time.is_none() {
        return Ok(false);
    }
    target.push(record)?;
    store.mark_synced(id)?;
    info!("[SYNCED] {}", record.plate);
    Ok(true)
}

/// Push every pending closed record; returns how many were synced
pub fn sync_pending(store: &dyn VehicleStore, target: &dyn SyncTarget) -> Result<usize> {
    let mut synced = 0;
    for record in store.unsynced()? {
        match sync_record(store, target, &record) {
            Ok(true) => synced += 1,
            Ok(false) => {}
            Err(e) => warn!("Sync failed for {}: {}", record.plate, e),
        }
    }
    Ok(synced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::VehicleType;
    use crate::error::PipelineError;
    use crate::storage::SqliteStore;
    use parking_lot::Mutex;

    /// Records pushed plates; fails for plates listed in `reject`
    #[derive(Default)]
    struct RecordingTarget {
        pushed: Mutex<Vec<String>>,
        reject: Vec<String>,
    }

    impl SyncTarget for RecordingTarget {
        fn push(&self, record: &VehicleRecord) -> Result<()> {
            if self.reject.contains(&record.plate) {
                return Err(PipelineError::Sync {
                    plate: record.plate.clone(),
                    reason: "rejected".to_string(),
                });
            }
            self.pushed.lock().push(record.plate.clone());
            Ok(())
        }
    }

    fn store_with_visits() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let closed = store.add_entry("KA05WB1234", VehicleType::Private, "2024-01-01 10:00:00").unwrap();
        store.add_exit(closed, "2024-01-01 11:00:00").unwrap();
        store.add_entry("MH12AB1234", VehicleType::Taxi, "2024-01-01 10:05:00").unwrap();
        let rejected = store.add_entry("DL01C1234", VehicleType::Private, "2024-01-01 10:10:00").unwrap();
        store.add_exit(rejected, "2024-01-01 10:20:00").unwrap();
        store
    }

    #[test]
    fn test_only_closed_records_are_pushed() {
        let store = store_with_visits();
        let target = RecordingTarget::default();
        assert_eq!(sync_pending(&store, &target).unwrap(), 2);
        assert_eq!(*target.pushed.lock(), vec!["KA05WB1234", "DL01C1234"]);

        let pending: Vec<String> = store.unsynced().unwrap().into_iter().map(|r| r.plate).collect();
        assert_eq!(pending, vec!["MH12AB1234"]);
    }

    #[test]
    fn test_failed_push_stays_pending() {
        let store = store_with_visits();
        let target = RecordingTarget {
            reject: vec!["DL01C1234".to_string()],
            ..Default::default()
        };
        assert_eq!(sync_pending(&store, &target).unwrap(), 1);
        assert_eq!(store.unsynced().unwrap().len(), 2);
    }

    #[test]
    fn test_payload_shape() {
        let record = VehicleRecord {
            id: Some(7),
            plate: "KA05WB1234".to_string(),
            vehicle_type: VehicleType::Taxi,
            entry_time: "2024-01-01 10:00:00".to_string(),
            exit_time: None,
            synced: false,
        };
        let json = serde_json::to_value(SyncPayload::new("VEIL_01", &record)).unwrap();
        assert_eq!(json["type"], "Taxi");
        assert_eq!(json["device_id"], "VEIL_01");
        assert_eq!(json["db_id"], 7);
        assert!(json["exit_time"].is_null());

        assert!(LogSyncTarget::new("VEIL_01").push(&record).is_ok());
    }
}
