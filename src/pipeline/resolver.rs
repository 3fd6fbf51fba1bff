//! Plate resolver
//!
//! Orchestrates variant generation, tiered reading, correction and pairwise
//! combination to turn one crop into at most one plate string.

use std::sync::Arc;

use tracing::debug;

use crate::config::{AppConfig, OcrSettings};
use crate::error::Result;
use crate::plate::{correct, score, PlateGrammar, PlateScore};
use crate::vision::{evaluate, generate_variants, Candidate, Evaluation, HypothesisReader, PlateCrop, TextRecognizer};

/// Number of top-scoring candidates considered for combination
const COMBINATION_POOL: usize = 5;

/// Final reading of one crop
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlate {
    /// Corrected plate text, never empty
    pub text: String,
    pub confidence: f32,
}

/// Resolves plate crops into plate strings
pub struct PlateResolver {
    recognizer: Arc<dyn TextRecognizer>,
    grammar: PlateGrammar,
    settings: OcrSettings,
}

impl PlateResolver {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, grammar: PlateGrammar, settings: OcrSettings) -> Self {
        Self {
            recognizer,
            grammar,
            settings,
        }
    }

    /// Build a resolver from the application configuration
    pub fn with_config(recognizer: Arc<dyn TextRecognizer>, config: &AppConfig) -> Result<Self> {
        let grammar = PlateGrammar::new(&config.plate)?;
        Ok(Self::new(recognizer, grammar, config.ocr.clone()))
    }

    pub fn grammar(&self) -> &PlateGrammar {
        &self.grammar
    }

    /// Resolve one crop. Empty crops never reach the recognizer.
    pub fn resolve(&self, crop: &PlateCrop) -> Option<ResolvedPlate> {
        if crop.is_empty() {
            return None;
        }

        let variants = generate_variants(crop, &self.settings);
        let reader = HypothesisReader::new(self.recognizer.as_ref(), &self.grammar, &self.settings);
        let evaluation = evaluate(
            &reader,
            &variants,
            self.settings.fast_variant_count,
            self.settings.max_valid_candidates,
        );

        self.resolve_evaluation(&evaluation)
    }

    /// Pick, correct and possibly combine the collected candidates
    pub fn resolve_evaluation(&self, evaluation: &Evaluation) -> Option<ResolvedPlate> {
        let candidates = evaluation.candidates();
        let valid: Vec<&Candidate> = candidates.iter().filter(|c| c.valid).collect();

        let Some(choice) = self.select_best(&valid) else {
            let combined = self.combine(candidates);
            if let Some(plate) = &combined {
                debug!("No valid candidate, combined reading {}", plate.text);
            }
            return combined;
        };

        let corrected = correct(&self.grammar, &choice.text);
        let single = ResolvedPlate {
            text: corrected,
            confidence: choice.confidence,
        };
        debug!("Best candidate {} corrected to {}", choice.text, single.text);

        if self.grammar.has_pattern() && !self.grammar.matches(&single.text) {
            if let Some(combined) = self.combine(candidates) {
                if self.rank(&combined).compare(&self.rank(&single)).is_gt() {
                    debug!("Combined reading {} beats {}", combined.text, single.text);
                    return Some(combined);
                }
            }
        }

        (!single.text.is_empty()).then_some(single)
    }

    fn rank(&self, plate: &ResolvedPlate) -> PlateScore {
        score(&self.grammar, &plate.text, plate.confidence)
    }

    /// Highest-scoring candidate; the earliest wins ties
    fn select_best<'c>(&self, candidates: &[&'c Candidate]) -> Option<&'c Candidate> {
        let mut best: Option<(&Candidate, PlateScore)> = None;
        for &candidate in candidates {
            let s = score(&self.grammar, &candidate.text, candidate.confidence);
            if best.as_ref().map_or(true, |(_, b)| s.compare(b).is_gt()) {
                best = Some((candidate, s));
            }
        }
        best.map(|(c, _)| c)
    }

    /// Try every ordered pair of the top candidates as one concatenated plate
    fn combine(&self, candidates: &[Candidate]) -> Option<ResolvedPlate> {
        let mut ranked: Vec<(&Candidate, PlateScore)> = candidates
            .iter()
            .map(|c| (c, score(&self.grammar, &c.text, c.confidence)))
            .collect();
        ranked.sort_by(|a, b| b.1.compare(&a.1));
        ranked.truncate(COMBINATION_POOL);

        let mut best: Option<(ResolvedPlate, PlateScore)> = None;
        for (i, (first, _)) in ranked.iter().enumerate() {
            for (j, (second, _)) in ranked.iter().enumerate() {
                if i == j {
                    continue;
                }
                let joined = format!("{}{}", first.text, second.text);
                if joined.len() > self.grammar.max_length() || !self.grammar.is_valid(&joined) {
                    continue;
                }
                let plate = ResolvedPlate {
                    text: correct(&self.grammar, &joined),
                    confidence: first.confidence.min(second.confidence),
                };
                let s = self.rank(&plate);
                if best.as_ref().map_or(true, |(_, b)| s.compare(b).is_gt()) {
                    best = Some((plate, s));
                }
            }
        }
        best.map(|(plate, _)| plate)
    }
}
