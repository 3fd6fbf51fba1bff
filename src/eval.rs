//! Labelled dataset evaluation
//!
//! Runs detection and resolution over a folder of images and compares each
//! prediction with its ground-truth plate. Labels come from a CSV or JSON file
//! keyed by file name, or from the file stem.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;
use walkdir::WalkDir;

use crate::pipeline::{PlateDetector, PlateResolver};
use crate::plate::clean_text;
use crate::tracking::plate_similarity;

/// Image extensions picked up by [`collect_images`]
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Evaluation run parameters
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub images: PathBuf,
    pub labels: Option<PathBuf>,
    /// Column/field holding the image file name
    pub image_field: String,
    /// Column/field holding the plate text
    pub label_field: String,
    pub output: Option<PathBuf>,
    /// 0 means no limit
    pub limit: usize,
    /// Use the file stem as the label when none is given
    pub fallback_stem: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            images: PathBuf::new(),
            labels: None,
            image_field: "image".to_string(),
            label_field: "plate".to_string(),
            output: None,
            limit: 0,
            fallback_stem: false,
        }
    }
}

/// Per-image result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalRow {
    pub image: String,
    pub ground_truth: Option<String>,
    pub prediction: Option<String>,
    pub confidence: f32,
    pub detected: bool,
    pub exact_match: bool,
    pub similarity: f64,
}

impl EvalRow {
    /// Compare the best of `predictions` against `ground_truth`
    pub fn new(
        image: impl Into<String>,
        detections: usize,
        predictions: &[(String, f32)],
        ground_truth: Option<&str>,
    ) -> Self {
        let mut best: Option<(String, f32)> = None;
        for (text, confidence) in predictions {
            if best.as_ref().map_or(true, |(_, c)| confidence > c) {
                best = Some((clean_text(text), *confidence));
            }
        }
        let (prediction, confidence) = match best {
            Some((text, conf)) => (Some(text), conf),
            None => (None, 0.0),
        };

        let ground_truth = ground_truth.map(clean_text).filter(|gt| !gt.is_empty());
        let exact_match = matches!((&prediction, &ground_truth), (Some(p), Some(g)) if p == g);
        let similarity = plate_similarity(
            prediction.as_deref().unwrap_or(""),
            ground_truth.as_deref().unwrap_or(""),
        );

        Self {
            image: image.into(),
            ground_truth,
            prediction,
            confidence,
            detected: detections > 0,
            exact_match,
            similarity,
        }
    }
}

/// Aggregate metrics over all evaluated images
#[derive(Debug, Clone, PartialEq)]
pub struct EvalSummary {
    pub images: usize,
    pub detection_rate: f64,
    pub exact_rate: f64,
    pub mean_similarity: f64,
}

impl EvalSummary {
    pub fn from_rows(rows: &[EvalRow]) -> Self {
        if rows.is_empty() {
            return Self {
                images: 0,
                detection_rate: 0.0,
                exact_rate: 0.0,
                mean_similarity: 0.0,
            };
        }
        let n = rows.len() as f64;
        Self {
            images: rows.len(),
            detection_rate: rows.iter().filter(|r| r.detected).count() as f64 / n,
            exact_rate: rows.iter().filter(|r| r.exact_match).count() as f64 / n,
            mean_similarity: rows.iter().map(|r| r.similarity).sum::<f64>() / n,
        }
    }
}

impl fmt::Display for EvalSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Evaluation Summary =====")?;
        writeln!(f, "Images evaluated    : {}", self.images)?;
        writeln!(f, "Detection hit rate  : {:.2}%", self.detection_rate * 100.0)?;
        writeln!(f, "Exact OCR match rate: {:.2}%", self.exact_rate * 100.0)?;
        write!(f, "Avg. similarity     : {:.3}", self.mean_similarity)
    }
}

/// Lookup key for a label: forward slashes, lower case
fn label_key(name: &str) -> String {
    name.replace('\\', "/").to_lowercase()
}

/// Load a CSV or JSON label map keyed by lower-cased file name
pub fn load_labels(path: &Path, image_field: &str, label_field: &str) -> Result<HashMap<String, String>> {
    if !path.exists() {
        bail!("Label file not found at {:?}", path);
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => load_labels_csv(path, image_field, label_field),
        "json" => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read label file: {:?}", path))?;
            parse_labels_json(&content, image_field, label_field)
        }
        other => bail!("Unsupported label format: .{}", other),
    }
}

fn load_labels_csv(path: &Path, image_field: &str, label_field: &str) -> Result<HashMap<String, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open label file: {:?}", path))?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let (Some(image_col), Some(label_col)) = (column(image_field), column(label_field)) else {
        bail!(
            "CSV must contain '{}' and '{}' columns. Found: {:?}",
            image_field,
            label_field,
            headers.iter().collect::<Vec<_>>()
        );
    };

    let mut labels = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let image = record.get(image_col).unwrap_or("");
        let plate = record.get(label_col).unwrap_or("");
        if !image.is_empty() && !plate.is_empty() {
            labels.insert(label_key(image), clean_text(plate));
        }
    }
    Ok(labels)
}

/// Parse JSON labels: either `{file: plate}` or `[{image_field: .., label_field: ..}]`
pub fn parse_labels_json(content: &str, image_field: &str, label_field: &str) -> Result<HashMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(content).context("Failed to parse JSON labels")?;

    let as_text = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    let mut labels = HashMap::new();
    match value {
        serde_json::Value::Object(map) => {
            for (key, plate) in &map {
                labels.insert(label_key(key), clean_text(&as_text(plate)));
            }
        }
        serde_json::Value::Array(entries) => {
            for entry in &entries {
                if let (Some(image), Some(plate)) = (entry.get(image_field), entry.get(label_field)) {
                    labels.insert(label_key(&as_text(image)), clean_text(&as_text(plate)));
                }
            }
        }
        _ => bail!("JSON labels must be an object or a list of objects"),
    }
    Ok(labels)
}

/// Recursively collect image files under `folder`, sorted by path
pub fn collect_images(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        bail!("Image folder not found: {:?}", folder);
    }

    let mut images: Vec<PathBuf> = WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        })
        .collect();
    images.sort();
    Ok(images)
}

/// Detect and resolve every plate in one image file
pub fn evaluate_image(
    resolver: &PlateResolver,
    detector: &dyn PlateDetector,
    path: &Path,
    ground_truth: Option<&str>,
) -> Result<EvalRow> {
    let frame = image::open(path)
        .with_context(|| format!("Failed to load image: {:?}", path))?
        .to_rgb8();

    let crops = detector.detect(&frame);
    let predictions: Vec<(String, f32)> = crops
        .iter()
        .filter_map(|crop| resolver.resolve(crop))
        .map(|plate| (plate.text, plate.confidence))
        .collect();

    Ok(EvalRow::new(
        path.to_string_lossy().replace('\\', "/"),
        crops.len(),
        &predictions,
        ground_truth,
    ))
}

/// Write per-image rows as CSV
pub fn save_report(rows: &[EvalRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create report: {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Evaluate a labelled folder end to end
pub fn run_evaluation(
    resolver: &PlateResolver,
    detector: &dyn PlateDetector,
    options: &EvalOptions,
) -> Result<(Vec<EvalRow>, EvalSummary)> {
    let labels = match &options.labels {
        Some(path) => load_labels(path, &options.image_field, &options.label_field)?,
        None => HashMap::new(),
    };

    let mut files = collect_images(&options.images)?;
    if options.limit > 0 {
        files.truncate(options.limit);
    }
    if files.is_empty() {
        bail!("No images found under {:?}", options.images);
    }

    let mut rows = Vec::with_capacity(files.len());
    for (idx, path) in files.iter().enumerate() {
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let mut ground_truth = labels.get(&label_key(&name)).cloned();
        if ground_truth.is_none() && options.fallback_stem {
            ground_truth = path.file_stem().map(|s| clean_text(&s.to_string_lossy()));
        }

        rows.push(evaluate_image(resolver, detector, path, ground_truth.as_deref())?);

        let done = idx + 1;
        if done % 25 == 0 || done == files.len() {
            info!("Processed {}/{} images...", done, files.len());
        }
    }

    if let Some(output) = &options.output {
        save_report(&rows, output)?;
        info!("Report written to {:?}", output);
    }

    let summary = EvalSummary::from_rows(&rows);
    Ok((rows, summary))
}
