//! OCR (Optical Character Recognition) module
//!
//! The text-recognition engine is a black box behind [`TextRecognizer`]. It
//! offers a word/line mode that returns boxes and confidences, and a paragraph
//! mode that returns whole blocks of text.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use image::GrayImage;

use crate::error::{PipelineError, Result};

/// Characters a plate may contain
pub const PLATE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Single OCR detection result
#[derive(Debug, Clone)]
pub struct OcrResult {
    /// Recognized text
    pub text: String,
    /// Bounding polygon points (may be empty)
    pub polygon: Vec<(f32, f32)>,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl OcrResult {
    pub fn new(text: impl Into<String>, polygon: Vec<(f32, f32)>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            polygon,
            confidence,
        }
    }

    /// Result with an axis-aligned box given as (x, y, width, height)
    pub fn from_bounds(text: impl Into<String>, bounds: (f32, f32, f32, f32), confidence: f32) -> Self {
        let (x, y, w, h) = bounds;
        Self::new(text, vec![(x, y), (x + w, y), (x + w, y + h), (x, y + h)], confidence)
    }

    /// Mean of the polygon points
    pub fn center(&self) -> Option<(f32, f32)> {
        if self.polygon.is_empty() {
            return None;
        }
        let n = self.polygon.len() as f32;
        let (sx, sy) = self
            .polygon
            .iter()
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        Some((sx / n, sy / n))
    }
}

/// External text-recognition engine
pub trait TextRecognizer: Send + Sync {
    /// Per-word read restricted to `allowlist`
    fn recognize(&self, image: &GrayImage, allowlist: &str) -> Result<Vec<OcrResult>>;

    /// Whole-image read as blocks of text, without boxes
    fn recognize_paragraph(&self, image: &GrayImage) -> Result<Vec<String>>;
}

/// Bounds every call of an inner recognizer by a timeout
///
/// Each call runs on its own worker thread. A call that times out keeps
/// running in the background and its result is discarded, so engines that
/// own external processes should also enforce the deadline themselves (see
/// [`TesseractCli::with_deadline`](super::TesseractCli::with_deadline)).
pub struct TimeoutRecognizer {
    inner: Arc<dyn TextRecognizer>,
    timeout: Duration,
}

impl TimeoutRecognizer {
    pub fn new(inner: Arc<dyn TextRecognizer>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn run<T, F>(&self, image: &GrayImage, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TextRecognizer, &GrayImage) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let inner = Arc::clone(&self.inner);
        let image = image.clone();

        std::thread::Builder::new()
            .name("ocr-call".to_string())
            .spawn(move || {
                let _ = tx.send(call(inner.as_ref(), &image));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(PipelineError::Ocr("OCR worker exited without a result".to_string()))
            }
        }
    }
}

impl TextRecognizer for TimeoutRecognizer {
    fn recognize(&self, image: &GrayImage, allowlist: &str) -> Result<Vec<OcrResult>> {
        let allowlist = allowlist.to_string();
        self.run(image, move |ocr, img| ocr.recognize(img, &allowlist))
    }

    fn recognize_paragraph(&self, image: &GrayImage) -> Result<Vec<String>> {
        self.run(image, |ocr, img| ocr.recognize_paragraph(img))
    }
}

/// Wrap `recognizer` in a [`TimeoutRecognizer`] unless `timeout_ms` is 0
pub fn with_timeout(recognizer: Arc<dyn TextRecognizer>, timeout_ms: u64) -> Arc<dyn TextRecognizer> {
    if timeout_ms == 0 {
        recognizer
    } else {
        Arc::new(TimeoutRecognizer::new(recognizer, Duration::from_millis(timeout_ms)))
    }
}
