//! Compiled plate grammar and candidate validity checks

use regex::Regex;
use std::collections::BTreeMap;

use crate::config::PlateRules;
use crate::error::Result;

/// Four-group layout: region, district digits, series letters, serial digits
const GROUP_PATTERN: &str = r"^([A-Z]{2})([0-9]{1,2})([A-Z]{1,3})([0-9]{3,4})$";

/// The four segments of a grouped plate string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateSegments<'a> {
    pub region: &'a str,
    pub district: &'a str,
    pub series: &'a str,
    pub serial: &'a str,
}

/// Plate rules with the configured pattern compiled
#[derive(Debug, Clone)]
pub struct PlateGrammar {
    pattern: Option<Regex>,
    groups: Option<Regex>,
    require_pattern: bool,
    min_length: usize,
    max_length: usize,
    min_digits: usize,
    expected_length: usize,
    region_codes: Vec<String>,
    region_overrides: BTreeMap<String, String>,
    noise_tokens: Vec<String>,
}

impl PlateGrammar {
    /// Compile the rules. An absent or empty pattern disables every grammar step.
    pub fn new(rules: &PlateRules) -> Result<Self> {
        let pattern = match rules.pattern.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => Some(Regex::new(p)?),
            _ => None,
        };
        let groups = match pattern {
            Some(_) => Some(Regex::new(GROUP_PATTERN)?),
            None => None,
        };

        // Longer tokens first so "INDIAN" is stripped before "INDIA"
        let mut noise_tokens: Vec<String> = rules
            .noise_tokens
            .iter()
            .map(|t| t.to_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        noise_tokens.sort_by(|a, b| b.len().cmp(&a.len()));

        Ok(Self {
            pattern,
            groups,
            require_pattern: rules.require_pattern,
            min_length: rules.min_length,
            max_length: rules.max_length,
            min_digits: rules.min_digits,
            expected_length: rules.expected_length,
            region_codes: rules.region_codes.iter().map(|c| c.to_uppercase()).collect(),
            region_overrides: rules
                .region_overrides
                .iter()
                .map(|(k, v)| (k.to_uppercase(), v.to_uppercase()))
                .collect(),
            noise_tokens,
        })
    }

    /// Whether a plate pattern is configured
    pub fn has_pattern(&self) -> bool {
        self.pattern.is_some()
    }

    /// Strict-grammar mode: pattern configured and required
    pub fn is_strict(&self) -> bool {
        self.require_pattern && self.pattern.is_some()
    }

    /// Full match against the configured pattern (false when none is configured)
    pub fn matches(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(text))
    }

    /// True when no pattern is configured or the text matches it
    pub fn satisfies(&self, text: &str) -> bool {
        self.pattern.as_ref().map_or(true, |re| re.is_match(text))
    }

    /// Split a plate into its four segments, if it has that layout
    pub fn segments<'a>(&self, text: &'a str) -> Option<PlateSegments<'a>> {
        let caps = self.groups.as_ref()?.captures(text)?;
        Some(PlateSegments {
            region: caps.get(1)?.as_str(),
            district: caps.get(2)?.as_str(),
            series: caps.get(3)?.as_str(),
            serial: caps.get(4)?.as_str(),
        })
    }

    pub fn is_region_code(&self, code: &str) -> bool {
        self.region_codes.iter().any(|c| c == code)
    }

    pub fn region_codes(&self) -> &[String] {
        &self.region_codes
    }

    pub fn region_override(&self, code: &str) -> Option<&str> {
        self.region_overrides.get(code).map(String::as_str)
    }

    pub fn noise_tokens(&self) -> &[String] {
        &self.noise_tokens
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn expected_length(&self) -> usize {
        self.expected_length
    }

    /// Candidate validity: length and digit bounds, then pattern or shape heuristic
    pub fn is_valid(&self, text: &str) -> bool {
        let length = text.chars().count();
        if length < self.min_length || length > self.max_length {
            return false;
        }

        let digits = text.chars().filter(char::is_ascii_digit).count();
        if digits < self.min_digits {
            return false;
        }

        if self.is_strict() {
            return self.matches(text);
        }

        self.matches(text) || plausible_shape(text, digits)
    }
}

/// Structural heuristic for plates that do not match the pattern
fn plausible_shape(text: &str, digits: usize) -> bool {
    let letters = text.chars().filter(char::is_ascii_alphabetic).count();
    if letters == 0 || digits == 0 {
        return false;
    }

    let ratio = digits as f32 / letters as f32;
    if !(0.25..=4.0).contains(&ratio) {
        return false;
    }

    has_letter_prefix(text) || has_digit_suffix(text)
}

/// First two characters are letters
pub fn has_letter_prefix(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 2 && bytes[..2].iter().all(u8::is_ascii_alphabetic)
}

/// Last two characters are digits
pub fn has_digit_suffix(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 2 && bytes[bytes.len() - 2..].iter().all(u8::is_ascii_digit)
}

/// Upper-case and strip everything outside [A-Z0-9]
pub fn clean_text(text: &str) -> String {
    text.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}
