//! Storage Layer
//!
//! Handles persistence of vehicle entry/exit records using SQLite, and
//! resolves the per-user data and configuration directories.

pub mod database;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::classification::VehicleType;

pub use database::SqliteStore;

/// Database file name inside the data directory
pub const DATABASE_FILE: &str = "vehicles.db";

/// One vehicle visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    /// Row id, once persisted
    pub id: Option<i64>,
    pub plate: String,
    pub vehicle_type: VehicleType,
    /// Local time, `%Y-%m-%d %H:%M:%S`
    pub entry_time: String,
    pub exit_time: Option<String>,
    pub synced: bool,
}

/// Persistent vehicle log
pub trait VehicleStore: Send {
    /// Insert a new visit and return its id
    fn add_entry(&self, plate: &str, vehicle_type: VehicleType, entry_time: &str) -> crate::error::Result<i64>;

    /// Close a visit
    fn add_exit(&self, id: i64, exit_time: &str) -> crate::error::Result<()>;

    /// Records not yet pushed to the sync target
    fn unsynced(&self) -> crate::error::Result<Vec<VehicleRecord>>;

    fn mark_synced(&self, id: i64) -> crate::error::Result<()>;
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "veil", "VeilAnpr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default location of the vehicle database
pub fn default_database_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DATABASE_FILE))
}
