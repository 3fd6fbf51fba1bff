//! Application Configuration
//!
//! Pipeline settings stored in TOML format. Every field has a default so a
//! partial file (or no file at all) is always usable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR and variant settings
    pub ocr: OcrSettings,
    /// Plate grammar and validity rules
    pub plate: PlateRules,
    /// Confirmation and dedup settings
    pub tracking: TrackingSettings,
    /// Storage settings
    pub storage: StorageSettings,
    /// Remote sync settings
    pub sync: SyncSettings,
}

/// OCR-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Hits at or above this confidence are accepted as-is
    pub min_confidence: f32,
    /// Multiplier applied to accepted below-floor hits
    pub low_confidence_penalty: f32,
    /// Minimum length for a below-floor hit to be kept
    pub low_confidence_min_len: usize,
    /// Fixed confidence given to paragraph-mode reads
    pub paragraph_confidence: f32,
    /// Line gap as a fraction of the variant height (multi-line merge)
    pub line_gap_fraction: f32,
    /// Number of variants in the fast tier
    pub fast_variant_count: usize,
    /// Stop evaluating once this many valid candidates were found
    pub max_valid_candidates: usize,
    /// Shortest side is upscaled towards this size
    pub min_variant_dim: u32,
    /// Longest side is downscaled to this size
    pub max_variant_dim: u32,
    /// Upper bound on the upscale factor
    pub max_upscale: f32,
    /// Per-call OCR timeout in milliseconds (0 = unbounded)
    pub timeout_ms: u64,
    /// Path to the tesseract executable
    pub tesseract_path: String,
    /// Tesseract language
    pub language: String,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            low_confidence_penalty: 0.85,
            low_confidence_min_len: 4,
            paragraph_confidence: 0.45,
            line_gap_fraction: 0.2,
            fast_variant_count: 2,
            max_valid_candidates: 8,
            min_variant_dim: 96,
            max_variant_dim: 320,
            max_upscale: 1.5,
            timeout_ms: 2000,
            tesseract_path: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }
}

impl OcrSettings {
    /// Absolute floor below which hits are always dropped
    pub fn low_confidence_floor(&self) -> f32 {
        (self.min_confidence - 0.2).max(0.2)
    }
}

/// Default grammar for Indian registration plates
pub const DEFAULT_PLATE_PATTERN: &str = r"^[A-Z]{2}[0-9]{1,2}[A-Z]{1,3}[0-9]{3,4}$";

const DEFAULT_REGION_CODES: &[&str] = &[
    "AN", "AP", "AR", "AS", "BR", "CG", "CH", "DD", "DL", "GA", "GJ", "HP", "HR", "JH", "JK", "KA",
    "KL", "LA", "LD", "MH", "ML", "MN", "MP", "MZ", "NL", "OD", "PB", "PY", "RJ", "SK", "TN", "TS",
    "TR", "UK", "UP", "WB",
];

const DEFAULT_NOISE_TOKENS: &[&str] = &["INDIAN", "INDIAH", "INDIA", "IND1A", "IND", "BHARATH", "BHARAT"];

/// Plate grammar and validity rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateRules {
    /// Full-match pattern for a well-formed plate (empty disables grammar steps)
    pub pattern: Option<String>,
    /// Require the pattern for validity instead of falling back to heuristics
    pub require_pattern: bool,
    /// Minimum candidate length
    pub min_length: usize,
    /// Maximum candidate length
    pub max_length: usize,
    /// Minimum number of digits in a candidate
    pub min_digits: usize,
    /// Typical plate length, used by the length penalty
    pub expected_length: usize,
    /// Known two-character region codes
    pub region_codes: Vec<String>,
    /// Direct rewrites for commonly misread region codes
    pub region_overrides: BTreeMap<String, String>,
    /// Substrings stripped before correction (country-name artifacts)
    pub noise_tokens: Vec<String>,
}

impl Default for PlateRules {
    fn default() -> Self {
        let region_overrides = [("HB", "WB"), ("IH", "HR"), ("NH", "MH")]
            .into_iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();

        Self {
            pattern: Some(DEFAULT_PLATE_PATTERN.to_string()),
            require_pattern: false,
            min_length: 6,
            max_length: 10,
            min_digits: 3,
            expected_length: 10,
            region_codes: DEFAULT_REGION_CODES.iter().map(|s| s.to_string()).collect(),
            region_overrides,
            noise_tokens: DEFAULT_NOISE_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Confirmation and dedup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// Votes required before a plate is trusted
    pub min_hits: u32,
    /// Trailing window for entry dedup, in seconds (<= 0 disables dedup)
    pub dedup_window_secs: f64,
    /// Similarity at or above which a new entry counts as a duplicate
    pub dedup_similarity: f64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            min_hits: 2,
            dedup_window_secs: 10.0,
            dedup_similarity: 0.85,
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database path (defaults to the data directory)
    pub database_path: Option<PathBuf>,
}

/// Remote sync settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Push completed records after each exit
    pub enabled: bool,
    /// Identifier attached to every pushed record
    pub device_id: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: "VEIL_01".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!((config.ocr.min_confidence - 0.4).abs() < 0.001);
        assert!((config.ocr.low_confidence_floor() - 0.2).abs() < 0.001);
        assert_eq!(config.ocr.fast_variant_count, 2);
        assert_eq!(config.ocr.max_valid_candidates, 8);

        assert_eq!(config.plate.pattern.as_deref(), Some(DEFAULT_PLATE_PATTERN));
        assert!(!config.plate.require_pattern);
        assert_eq!(config.plate.region_codes.len(), 36);
        assert_eq!(config.plate.region_overrides.get("HB").map(String::as_str), Some("WB"));

        assert_eq!(config.tracking.min_hits, 2);
        assert!(config.storage.database_path.is_none());
        assert!(!config.sync.enabled);
    }

    #[test]
    fn test_low_confidence_floor_tracks_min_confidence() {
        let mut ocr = OcrSettings::default();
        ocr.min_confidence = 0.7;
        assert!((ocr.low_confidence_floor() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = AppConfig::default();
        config.tracking.min_hits = 3;
        config.plate.pattern = Some(String::new());

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.tracking.min_hits, 3);
        assert_eq!(parsed.plate.pattern.as_deref(), Some(""));
        assert_eq!(parsed.plate.region_overrides, config.plate.region_overrides);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: AppConfig = toml::from_str("[tracking]\nmin_hits = 1\n").unwrap();
        assert_eq!(parsed.tracking.min_hits, 1);
        assert!((parsed.tracking.dedup_similarity - 0.85).abs() < 0.001);
        assert_eq!(parsed.plate.max_length, 10);
    }

    #[test]
    fn test_save_and_load_config() {
        let config = AppConfig::default();
        let temp_file = NamedTempFile::new().unwrap();

        save_config(&config, temp_file.path()).unwrap();
        let loaded = load_config(temp_file.path()).unwrap();

        assert_eq!(config.plate.min_digits, loaded.plate.min_digits);
        assert_eq!(config.ocr.timeout_ms, loaded.ocr.timeout_ms);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
