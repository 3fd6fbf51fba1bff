//! Hypothesis reader
//!
//! Runs the recognizer over one variant and turns its raw hits into cleaned
//! plate candidates. Three sources feed the list: per-word hits, a two-line
//! merge of those hits, and a paragraph-mode fallback.

use image::GrayImage;
use tracing::{debug, warn};

use super::ocr::{OcrResult, TextRecognizer, PLATE_ALPHABET};
use crate::config::OcrSettings;
use crate::plate::{clean_text, PlateGrammar};

/// Minimum vertical gap between two plate lines, in pixels
const MIN_LINE_GAP: f32 = 12.0;
/// Floor for the merge threshold, in pixels
const MIN_MERGE_GAP: f32 = 10.0;

/// A cleaned plate reading
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Upper-case alphanumeric text, never empty
    pub text: String,
    pub confidence: f32,
    /// Passes the plate validity predicate
    pub valid: bool,
}

/// Cleaned hit with its box center, kept for the line merge
#[derive(Debug, Clone)]
struct LineEntry {
    text: String,
    confidence: f32,
    x: f32,
    y: f32,
}

/// Reads candidate hypotheses from a single variant
pub struct HypothesisReader<'a> {
    recognizer: &'a dyn TextRecognizer,
    grammar: &'a PlateGrammar,
    settings: &'a OcrSettings,
}

impl<'a> HypothesisReader<'a> {
    pub fn new(recognizer: &'a dyn TextRecognizer, grammar: &'a PlateGrammar, settings: &'a OcrSettings) -> Self {
        Self {
            recognizer,
            grammar,
            settings,
        }
    }

    /// Read candidates from `variant`, sorted by descending confidence
    ///
    /// Engine failures and timeouts count as zero hits.
    pub fn read(&self, variant: &GrayImage) -> Vec<Candidate> {
        if variant.width() == 0 || variant.height() == 0 {
            return Vec::new();
        }

        let hits = match self.recognizer.recognize(variant, PLATE_ALPHABET) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("OCR read failed: {}", e);
                Vec::new()
            }
        };

        let mut candidates = Vec::new();
        let mut lines = Vec::new();
        for hit in &hits {
            if let Some(entry) = self.admit(hit) {
                candidates.push(self.candidate(entry.text.clone(), entry.confidence));
                if let Some((x, y)) = hit.center() {
                    lines.push(LineEntry { x, y, ..entry });
                }
            }
        }

        let line_gap = MIN_LINE_GAP.max(variant.height() as f32 * self.settings.line_gap_fraction);
        if let Some((text, confidence)) = merge_lines(lines, line_gap) {
            debug!("Merged two-line reading {}", text);
            candidates.push(self.candidate(text, confidence));
        }

        if !self.grammar.is_strict() {
            self.read_paragraph(variant, &mut candidates);
        }

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        candidates
    }

    fn read_paragraph(&self, variant: &GrayImage, candidates: &mut Vec<Candidate>) {
        match self.recognizer.recognize_paragraph(variant) {
            Ok(blocks) => {
                for block in blocks {
                    let text = clean_text(&block);
                    if !text.is_empty() {
                        candidates.push(self.candidate(text, self.settings.paragraph_confidence));
                    }
                }
            }
            Err(e) => warn!("Paragraph OCR failed: {}", e),
        }
    }

    /// Clean a raw hit and apply confidence admission
    fn admit(&self, hit: &OcrResult) -> Option<LineEntry> {
        let text = clean_text(&hit.text);
        if text.is_empty() {
            return None;
        }
        let confidence = admitted_confidence(hit.confidence, text.len(), self.settings)?;
        Some(LineEntry {
            text,
            confidence,
            x: 0.0,
            y: 0.0,
        })
    }

    fn candidate(&self, text: String, confidence: f32) -> Candidate {
        let valid = self.grammar.is_valid(&text);
        Candidate { text, confidence, valid }
    }
}

/// Effective confidence of a hit, or `None` when it is rejected
///
/// Hits at or above the minimum pass unchanged. Hits of plate-like length
/// between the low floor and the minimum pass with a penalty.
pub fn admitted_confidence(confidence: f32, len: usize, settings: &OcrSettings) -> Option<f32> {
    if confidence >= settings.min_confidence {
        Some(confidence)
    } else if len >= settings.low_confidence_min_len && confidence >= settings.low_confidence_floor() {
        Some(confidence * settings.low_confidence_penalty)
    } else {
        None
    }
}

/// Join hits split across two stacked lines into one reading
///
/// Hits are split at the median center height. When the gap between the
/// lowest top-line center and the highest bottom-line center is large
/// enough, each line is ordered left to right and the lines are concatenated
/// top first. Confidence is the weakest of the joined hits.
fn merge_lines(mut entries: Vec<LineEntry>, line_gap: f32) -> Option<(String, f32)> {
    if entries.len() < 2 {
        return None;
    }

    entries.sort_by(|a, b| a.y.total_cmp(&b.y));
    let n = entries.len();
    let median = if n % 2 == 0 {
        (entries[n / 2 - 1].y + entries[n / 2].y) / 2.0
    } else {
        entries[n / 2].y
    };

    let (mut top, mut bottom): (Vec<LineEntry>, Vec<LineEntry>) =
        entries.into_iter().partition(|e| e.y <= median);
    if top.is_empty() || bottom.is_empty() {
        return None;
    }

    let top_max = top.iter().map(|e| e.y).fold(f32::MIN, f32::max);
    let bottom_min = bottom.iter().map(|e| e.y).fold(f32::MAX, f32::min);
    if bottom_min - top_max < MIN_MERGE_GAP.max(line_gap) {
        return None;
    }

    top.sort_by(|a, b| a.x.total_cmp(&b.x));
    bottom.sort_by(|a, b| a.x.total_cmp(&b.x));

    let confidence = top
        .iter()
        .chain(bottom.iter())
        .map(|e| e.confidence)
        .fold(f32::MAX, f32::min);
    let text: String = top.iter().chain(bottom.iter()).map(|e| e.text.as_str()).collect();

    Some((text, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlateRules;
    use crate::error::{PipelineError, Result};
    use std::time::Duration;

    struct FixedOcr {
        hits: Vec<OcrResult>,
        paragraph: Vec<String>,
    }

    impl TextRecognizer for FixedOcr {
        fn recognize(&self, _image: &GrayImage, _allowlist: &str) -> Result<Vec<OcrResult>> {
            Ok(self.hits.clone())
        }

        fn recognize_paragraph(&self, _image: &GrayImage) -> Result<Vec<String>> {
            Ok(self.paragraph.clone())
        }
    }

    struct FailingOcr;

    impl TextRecognizer for FailingOcr {
        fn recognize(&self, _image: &GrayImage, _allowlist: &str) -> Result<Vec<OcrResult>> {
            Err(PipelineError::Timeout(Duration::from_millis(10)))
        }

        fn recognize_paragraph(&self, _image: &GrayImage) -> Result<Vec<String>> {
            Err(PipelineError::Ocr("engine down".to_string()))
        }
    }

    fn read_with(ocr: &dyn TextRecognizer, rules: &PlateRules, height: u32) -> Vec<Candidate> {
        let grammar = PlateGrammar::new(rules).unwrap();
        let settings = OcrSettings::default();
        let reader = HypothesisReader::new(ocr, &grammar, &settings);
        reader.read(&GrayImage::new(200, height))
    }

    fn hit_at(text: &str, x: f32, y: f32, confidence: f32) -> OcrResult {
        OcrResult::from_bounds(text, (x - 5.0, y - 5.0, 10.0, 10.0), confidence)
    }

    #[test]
    fn test_admitted_confidence() {
        let settings = OcrSettings::default();
        assert_eq!(admitted_confidence(0.9, 2, &settings), Some(0.9));
        assert_eq!(admitted_confidence(0.4, 2, &settings), Some(0.4));

        let penalized = admitted_confidence(0.3, 4, &settings).unwrap();
        assert!((penalized - 0.3 * 0.85).abs() < 1e-6);

        assert_eq!(admitted_confidence(0.3, 3, &settings), None);
        assert_eq!(admitted_confidence(0.1, 10, &settings), None);
    }

    #[test]
    fn test_hits_are_cleaned_and_sorted() {
        let ocr = FixedOcr {
            hits: vec![
                OcrResult::new("ka-05 wb", vec![], 0.5),
                OcrResult::new("MH12AB1234", vec![], 0.9),
                OcrResult::new("--", vec![], 0.99),
            ],
            paragraph: vec![],
        };
        let candidates = read_with(&ocr, &PlateRules::default(), 60);
        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["MH12AB1234", "KA05WB"]);
        assert!(candidates[0].valid);
    }

    #[test]
    fn test_two_line_plate_is_merged() {
        let ocr = FixedOcr {
            hits: vec![
                hit_at("WB1234", 40.0, 40.0, 0.8),
                hit_at("KA05", 10.0, 5.0, 0.9),
            ],
            paragraph: vec![],
        };
        let candidates = read_with(&ocr, &PlateRules::default(), 60);
        let merged = candidates.iter().find(|c| c.text == "KA05WB1234").unwrap();
        assert!((merged.confidence - 0.8).abs() < 1e-6);
        assert!(merged.valid);
    }

    #[test]
    fn test_single_line_is_not_merged() {
        let ocr = FixedOcr {
            hits: vec![hit_at("KA05", 10.0, 5.0, 0.9), hit_at("WB1234", 80.0, 10.0, 0.8)],
            paragraph: vec![],
        };
        let candidates = read_with(&ocr, &PlateRules::default(), 60);
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| c.text != "KA05WB1234"));
    }

    #[test]
    fn test_merge_orders_each_line_left_to_right() {
        let entries = vec![
            LineEntry { text: "05".into(), confidence: 0.9, x: 50.0, y: 5.0 },
            LineEntry { text: "KA".into(), confidence: 0.7, x: 10.0, y: 6.0 },
            LineEntry { text: "1234".into(), confidence: 0.9, x: 60.0, y: 40.0 },
            LineEntry { text: "WB".into(), confidence: 0.8, x: 10.0, y: 41.0 },
        ];
        let (text, confidence) = merge_lines(entries, 12.0).unwrap();
        assert_eq!(text, "KA05WB1234");
        assert!((confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_paragraph_fallback() {
        let ocr = FixedOcr {
            hits: vec![],
            paragraph: vec!["KA 05 WB 1234".to_string(), "  ".to_string()],
        };
        let candidates = read_with(&ocr, &PlateRules::default(), 60);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].text, "KA05WB1234");
        assert!((candidates[0].confidence - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_strict_mode_skips_paragraph() {
        let ocr = FixedOcr {
            hits: vec![],
            paragraph: vec!["KA05WB1234".to_string()],
        };
        let rules = PlateRules {
            require_pattern: true,
            ..PlateRules::default()
        };
        assert!(read_with(&ocr, &rules, 60).is_empty());
    }

    #[test]
    fn test_engine_failure_yields_no_hits() {
        assert!(read_with(&FailingOcr, &PlateRules::default(), 60).is_empty());
    }

    #[test]
    fn test_empty_variant_is_skipped() {
        let ocr = FixedOcr {
            hits: vec![OcrResult::new("KA05WB1234", vec![], 0.9)],
            paragraph: vec![],
        };
        let grammar = PlateGrammar::new(&PlateRules::default()).unwrap();
        let settings = OcrSettings::default();
        let reader = HypothesisReader::new(&ocr, &grammar, &settings);
        assert!(reader.read(&GrayImage::new(0, 0)).is_empty());
    }
}
