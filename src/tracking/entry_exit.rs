//! Entry/exit vehicle log
//!
//! A confirmed plate that is not on site is an entry; a confirmed plate that
//! is already on site is an exit.

use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

use super::confirm::ConfirmationTracker;
use crate::classification::VehicleType;
use crate::error::Result;
use crate::storage::{VehicleRecord, VehicleStore};

/// Timestamp format for entry and exit times
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of a confirmed sighting
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleEvent {
    Entry(VehicleRecord),
    Exit(VehicleRecord),
    /// Entry dropped because a similar plate entered recently
    Suppressed { plate: String },
}

impl VehicleEvent {
    pub fn plate(&self) -> &str {
        match self {
            VehicleEvent::Entry(record) | VehicleEvent::Exit(record) => &record.plate,
            VehicleEvent::Suppressed { plate } => plate,
        }
    }
}

/// Local wall-clock time in [`TIMESTAMP_FORMAT`]
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Vehicles currently on site, keyed by plate
#[derive(Debug, Default)]
pub struct EntryExitTracker {
    on_site: HashMap<String, VehicleRecord>,
}

impl EntryExitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on_site(&self, plate: &str) -> bool {
        self.on_site.contains_key(plate)
    }

    pub fn on_site(&self) -> impl Iterator<Item = &VehicleRecord> {
        self.on_site.values()
    }

    /// Handle a confirmed plate at the current wall-clock time
    pub fn observe(
        &mut self,
        plate: &str,
        vehicle_type: VehicleType,
        now: Instant,
        dedup: &ConfirmationTracker,
        store: &dyn VehicleStore,
    ) -> Result<VehicleEvent> {
        self.observe_at(plate, vehicle_type, now, &timestamp_now(), dedup, store)
    }

    /// Handle a confirmed plate with an explicit timestamp
    pub fn observe_at(
        &mut self,
        plate: &str,
        vehicle_type: VehicleType,
        now: Instant,
        timestamp: &str,
        dedup: &ConfirmationTracker,
        store: &dyn VehicleStore,
    ) -> Result<VehicleEvent> {
        if let Some(mut record) = self.on_site.remove(plate) {
            if let Some(id) = record.id {
                store.add_exit(id, timestamp)?;
            }
            record.exit_time = Some(timestamp.to_string());
            info!("[EXIT] {}", plate);
            return Ok(VehicleEvent::Exit(record));
        }

        if !dedup.try_admit_entry(plate, now) {
            info!("[ENTRY:DEDUP] {} ignored (similar plate seen recently)", plate);
            return Ok(VehicleEvent::Suppressed {
                plate: plate.to_string(),
            });
        }

        let id = store.add_entry(plate, vehicle_type, timestamp)?;
        let record = VehicleRecord {
            id: Some(id),
            plate: plate.to_string(),
            vehicle_type,
            entry_time: timestamp.to_string(),
            exit_time: None,
            synced: false,
        };
        self.on_site.insert(plate.to_string(), record.clone());
        info!("[ENTRY] {} ({})", plate, vehicle_type);
        Ok(VehicleEvent::Entry(record))
    }
}
