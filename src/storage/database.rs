//! SQLite database for persistent storage

use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use tracing::{debug, warn};

use super::{VehicleRecord, VehicleStore};
use crate::classification::VehicleType;
use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vehicles (
    id INTEGER PRIMARY KEY,
    plate TEXT NOT NULL,
    type TEXT NOT NULL,
    entry_time TEXT NOT NULL,
    exit_time TEXT,
    synced INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_vehicles_synced ON vehicles(synced);
";

/// Vehicle log backed by a SQLite file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create database at path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.init_schema()?;
        debug!("Opened vehicle database at {:?}", path);
        Ok(store)
    }

    /// Private database that lives as long as the store
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Every record, oldest first
    pub fn all(&self) -> Result<Vec<VehicleRecord>> {
        self.query("SELECT id, plate, type, entry_time, exit_time, synced FROM vehicles ORDER BY id")
    }

    fn query(&self, sql: &str) -> Result<Vec<VehicleRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], record_from_row)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<VehicleRecord> {
    let type_name: String = row.get(2)?;
    let vehicle_type = type_name.parse().unwrap_or_else(|e| {
        warn!("{}; treating as private", e);
        VehicleType::Private
    });
    Ok(VehicleRecord {
        id: Some(row.get(0)?),
        plate: row.get(1)?,
        vehicle_type,
        entry_time: row.get(3)?,
        exit_time: row.get(4)?,
        synced: row.get::<_, i64>(5)? != 0,
    })
}

impl VehicleStore for SqliteStore {
    fn add_entry(&self, plate: &str, vehicle_type: VehicleType, entry_time: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO vehicles (plate, type, entry_time) VALUES (?1, ?2, ?3)",
            params![plate, vehicle_type.as_str(), entry_time],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn add_exit(&self, id: i64, exit_time: &str) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE vehicles SET exit_time = ?1 WHERE id = ?2",
            params![exit_time, id],
        )?;
        Ok(())
    }

    fn unsynced(&self) -> Result<Vec<VehicleRecord>> {
        self.query(
            "SELECT id, plate, type, entry_time, exit_time, synced FROM vehicles WHERE synced = 0 ORDER BY id",
        )
    }

    fn mark_synced(&self, id: i64) -> Result<()> {
        self.conn
            .lock()
            .execute("UPDATE vehicles SET synced = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }
}
