//! VEIL ANPR - vehicle entry/exit logging from license plates
//!
//! Reads plate text from noisy camera crops, decides when a reading is stable
//! enough to act on, and keeps a persistent log of vehicle visits.

pub mod classification;
pub mod config;
pub mod error;
pub mod eval;
pub mod pipeline;
pub mod plate;
pub mod storage;
pub mod sync;
pub mod tracking;
pub mod vision;

pub use error::{PipelineError, Result};
