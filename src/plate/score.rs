//! Candidate scoring
//!
//! A single lexicographic score ranks every plate string regardless of where
//! it came from (single read, merged lines, paragraph read, combination).
//! Earlier fields dominate later ones, so a plausible region code outweighs
//! any difference in OCR confidence.

use std::cmp::Ordering;

use super::rules::{has_digit_suffix, has_letter_prefix, PlateGrammar};

/// Lexicographically ordered plate score (field order is significant)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PlateScore {
    /// First two characters are a known region code
    pub region: bool,
    /// District block has two digits
    pub district: bool,
    /// Series block has one or two letters
    pub series: bool,
    /// Full pattern match
    pub grammar: bool,
    /// Letter prefix + digit suffix (0..=2)
    pub shape: u8,
    /// OCR confidence
    pub confidence: f32,
    /// Negative distance from the expected plate length
    pub length_penalty: i32,
}

impl PlateScore {
    /// Total order for selection; NaN confidences compare equal
    pub fn compare(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

/// Score a plate string at the given confidence
pub fn score(grammar: &PlateGrammar, text: &str, confidence: f32) -> PlateScore {
    let region = text.len() >= 2 && text.is_char_boundary(2) && grammar.is_region_code(&text[..2]);

    let (district, series) = match grammar.segments(text) {
        Some(seg) => (seg.district.len() == 2, (1..=2).contains(&seg.series.len())),
        None => (false, false),
    };

    let shape = has_letter_prefix(text) as u8 + has_digit_suffix(text) as u8;
    let length = text.chars().count() as i32;

    PlateScore {
        region,
        district,
        series,
        grammar: grammar.matches(text),
        shape,
        confidence,
        length_penalty: -(length - grammar.expected_length() as i32).abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlateRules;

    fn grammar() -> PlateGrammar {
        PlateGrammar::new(&PlateRules::default()).unwrap()
    }

    #[test]
    fn test_full_plate_scores_every_field() {
        let s = score(&grammar(), "KA05WB1234", 0.9);
        assert!(s.region && s.district && s.series && s.grammar);
        assert_eq!(s.shape, 2);
        assert_eq!(s.length_penalty, 0);
    }

    #[test]
    fn test_region_dominates_confidence() {
        let g = grammar();
        let known = score(&g, "KA05WB1234", 0.3);
        let unknown = score(&g, "XY05WB1234", 0.99);
        assert!(known > unknown);
    }

    #[test]
    fn test_confidence_breaks_ties() {
        let g = grammar();
        assert!(score(&g, "KA05WB1234", 0.8) > score(&g, "KA05WB1235", 0.7));
    }

    #[test]
    fn test_length_penalty_is_last() {
        let g = grammar();
        let a = score(&g, "KA05W1234", 0.5);
        let b = score(&g, "KA05WB1234", 0.5);
        assert_eq!(a.length_penalty, -1);
        assert!(b > a);
        assert!(score(&g, "KA05W1234", 0.6) > b);
    }

    #[test]
    fn test_short_text() {
        let s = score(&grammar(), "K", 1.0);
        assert!(!s.region);
        assert_eq!(s.shape, 0);
    }
}
