//! Candidate evaluator
//!
//! Runs the hypothesis reader over the variants in two tiers. The fast tier
//! covers the first few unrotated variants; the remaining variants are only
//! read when the fast tier did not already yield enough valid candidates.

use tracing::debug;

use super::reader::{Candidate, HypothesisReader};
use super::variants::Variant;

/// Candidates collected from a set of variants
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Valid candidates in collection order, capped
    pub valid: Vec<Candidate>,
    /// Every candidate read, valid or not
    pub all: Vec<Candidate>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    /// Valid candidates when any exist, otherwise everything read
    pub fn candidates(&self) -> &[Candidate] {
        if self.valid.is_empty() {
            &self.all
        } else {
            &self.valid
        }
    }
}

/// Evaluate `variants` fast tier first, stopping once `max_valid` valid
/// candidates have been collected
pub fn evaluate(reader: &HypothesisReader<'_>, variants: &[Variant], fast_count: usize, max_valid: usize) -> Evaluation {
    let split = fast_count.min(variants.len());
    let (fast, slow) = variants.split_at(split);

    let mut evaluation = Evaluation::default();
    evaluate_tier(reader, fast, max_valid, &mut evaluation);
    if evaluation.valid.len() < max_valid {
        evaluate_tier(reader, slow, max_valid, &mut evaluation);
    }

    evaluation.valid.truncate(max_valid);
    debug!(
        "Evaluated variants: {} candidates, {} valid",
        evaluation.all.len(),
        evaluation.valid.len()
    );
    evaluation
}

fn evaluate_tier(reader: &HypothesisReader<'_>, variants: &[Variant], max_valid: usize, evaluation: &mut Evaluation) {
    for variant in variants {
        for candidate in reader.read(&variant.image) {
            if candidate.valid {
                evaluation.valid.push(candidate.clone());
            }
            evaluation.all.push(candidate);
        }
        if evaluation.valid.len() >= max_valid {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OcrSettings, PlateRules};
    use crate::error::Result;
    use crate::plate::PlateGrammar;
    use crate::vision::ocr::{OcrResult, TextRecognizer};
    use crate::vision::variants::VariantKind;
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the same hits on every call and counts word-mode calls
    struct CountingOcr {
        hits: Vec<OcrResult>,
        calls: AtomicUsize,
    }

    impl CountingOcr {
        fn new(hits: Vec<OcrResult>) -> Self {
            Self {
                hits,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TextRecognizer for CountingOcr {
        fn recognize(&self, _image: &GrayImage, _allowlist: &str) -> Result<Vec<OcrResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }

        fn recognize_paragraph(&self, _image: &GrayImage) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn variants(count: usize) -> Vec<Variant> {
        (0..count)
            .map(|_| Variant {
                image: GrayImage::new(20, 10),
                kind: VariantKind::Grayscale,
                angle: 0.0,
            })
            .collect()
    }

    fn run(ocr: &CountingOcr, count: usize) -> Evaluation {
        let grammar = PlateGrammar::new(&PlateRules::default()).unwrap();
        let settings = OcrSettings::default();
        let reader = HypothesisReader::new(ocr, &grammar, &settings);
        evaluate(&reader, &variants(count), 2, 8)
    }

    #[test]
    fn test_stops_once_enough_valid() {
        let hits = (0..5)
            .map(|i| OcrResult::new(format!("KA0{}WB1234", i), vec![], 0.9))
            .collect();
        let ocr = CountingOcr::new(hits);
        let evaluation = run(&ocr, 42);

        // two fast variants give ten valid hits, the slow tier never runs
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
        assert_eq!(evaluation.valid.len(), 8);
        assert_eq!(evaluation.all.len(), 10);
    }

    #[test]
    fn test_slow_tier_runs_when_short() {
        let ocr = CountingOcr::new(vec![OcrResult::new("KA05WB1234", vec![], 0.9)]);
        let evaluation = run(&ocr, 42);

        // one valid hit per variant, the cap is reached on the eighth
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 8);
        assert_eq!(evaluation.valid.len(), 8);
    }

    #[test]
    fn test_invalid_only_falls_back_to_all() {
        let ocr = CountingOcr::new(vec![OcrResult::new("XYZ", vec![], 0.9)]);
        let evaluation = run(&ocr, 4);

        assert_eq!(ocr.calls.load(Ordering::SeqCst), 4);
        assert!(evaluation.valid.is_empty());
        assert_eq!(evaluation.candidates().len(), 4);
    }

    #[test]
    fn test_no_variants() {
        let ocr = CountingOcr::new(vec![]);
        let evaluation = run(&ocr, 0);
        assert!(evaluation.is_empty());
        assert!(evaluation.candidates().is_empty());
    }
}
