//! Error types for the plate pipeline

use std::time::Duration;
use thiserror::Error;

/// Errors raised inside the recognition pipeline
///
/// Most of these never leave the pipeline: OCR failures and timeouts are
/// downgraded to "no hits" at the reader boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("OCR engine failed: {0}")]
    Ocr(String),

    #[error("OCR call timed out after {0:?}")]
    Timeout(Duration),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid plate pattern: {0}")]
    Grammar(#[from] regex::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync failed for {plate}: {reason}")]
    Sync { plate: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
