//! Plate correction engine
//!
//! Turns a noisy OCR string into the closest plate that satisfies the
//! configured grammar. OCR confusion is modelled as a small edit problem over
//! a fixed alphabet of visually confusable glyphs rather than as generic edit
//! distance, which keeps unrelated characters from being "corrected" into a
//! plausible-looking plate.
//!
//! Steps:
//! 1. seeds: the raw text, the text with noise tokens stripped, and every
//!    cyclic rotation of both (OCR sometimes returns tokens out of order)
//! 2. breadth-first substitution search up to [`MAX_SUBSTITUTIONS`] edits
//! 3. region-prefix enforcement (override table, then nearest known code)
//! 4. segment normalization of the series and serial blocks

use std::cmp::{Ordering, Reverse};
use std::collections::{HashSet, VecDeque};

use tracing::trace;

use super::rules::PlateGrammar;
use super::score::{score, PlateScore};

/// Maximum substitution depth explored by the search
pub const MAX_SUBSTITUTIONS: usize = 4;

/// Passes tried while looking for a fixed point
pub const MAX_CORRECTION_ROUNDS: usize = 4;

/// Upper bound on generated series readings
const SERIES_OPTION_LIMIT: usize = 16;

/// Glyphs the OCR engine commonly mistakes for one another
fn confusables(c: char) -> &'static [char] {
    match c {
        'H' => &['W', 'R'],
        'W' => &['H'],
        'O' => &['0'],
        '0' => &['O', 'Q', 'D'],
        'Q' => &['O'],
        'I' => &['H', '1', 'L'],
        '1' => &['I', 'L'],
        'L' => &['4', '1'],
        '4' => &['L', 'A'],
        'B' => &['8'],
        '8' => &['B'],
        'G' => &['6'],
        '6' => &['G'],
        'S' => &['5'],
        '5' => &['S'],
        'J' => &['3'],
        '3' => &['J'],
        'Z' => &['2'],
        '2' => &['Z'],
        '7' => &['T', 'Y'],
        '9' => &['G'],
        'D' => &['0'],
        _ => &[],
    }
}

/// Letter readings for a glyph inside the series block
fn series_readings(c: char) -> Option<&'static [char]> {
    let readings: &'static [char] = match c {
        '0' => &['D', 'Q'],
        'O' => &['D', 'O', 'Q'],
        '1' => &['I'],
        '2' => &['Z'],
        '3' => &['B'],
        '4' => &['A'],
        '5' => &['S'],
        '6' => &['G'],
        '7' => &['Y', 'T'],
        '8' => &['B'],
        '9' => &['G'],
        _ => return None,
    };
    Some(readings)
}

/// Digit reading for a glyph inside the serial block
fn serial_digit(c: char) -> char {
    match c {
        'O' | 'D' | 'Q' => '0',
        'B' => '8',
        'S' => '5',
        'G' => '6',
        'Z' => '2',
        'I' | 'L' => '1',
        other => other,
    }
}

/// Correct `text` against the grammar. Identity when no pattern is configured
/// or no grammar-compliant reading is reachable.
///
/// A single pass is repeated until it reaches a fixed point, so correcting an
/// already corrected plate never changes it. If no fixed point appears within
/// [`MAX_CORRECTION_ROUNDS`], a compliant input is kept as is.
pub fn correct(grammar: &PlateGrammar, text: &str) -> String {
    if !grammar.has_pattern() {
        return text.to_string();
    }

    let first = correct_once(grammar, text);
    let mut current = first.clone();
    for _ in 0..MAX_CORRECTION_ROUNDS {
        let next = correct_once(grammar, &current);
        if next == current {
            if current != text {
                trace!("Corrected {} -> {}", text, current);
            }
            return current;
        }
        current = next;
    }

    if grammar.matches(text) {
        text.to_string()
    } else {
        first
    }
}

/// One search / prefix / segment pass. The result satisfies the grammar
/// whenever any reading was found.
fn correct_once(grammar: &PlateGrammar, text: &str) -> String {
    let seeds = correction_seeds(grammar, text);
    let Some(found) = search_substitutions(grammar, &seeds) else {
        return text.to_string();
    };

    let enforced = enforce_region_prefix(grammar, &found);
    let normalized = normalize_segments(grammar, &enforced);
    if grammar.satisfies(&normalized) {
        normalized
    } else {
        enforced
    }
}

fn strip_noise(grammar: &PlateGrammar, text: &str) -> String {
    grammar
        .noise_tokens()
        .iter()
        .fold(text.to_string(), |acc, token| acc.replace(token.as_str(), ""))
}

fn seed_priority(text: &str) -> (bool, bool, Reverse<usize>) {
    let chars: Vec<char> = text.chars().collect();
    let letter_prefix = chars.len() >= 2 && chars[..2].iter().all(char::is_ascii_alphabetic);
    let district_digits = chars.len() >= 4 && chars[2..4].iter().all(char::is_ascii_digit);
    (letter_prefix, district_digits, Reverse(chars.len()))
}

/// Raw and noise-stripped text plus all their rotations, best-looking first
pub fn correction_seeds(grammar: &PlateGrammar, text: &str) -> Vec<String> {
    let stripped = strip_noise(grammar, text);
    let mut seeds: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for base in [text, stripped.as_str()] {
        if base.is_empty() {
            continue;
        }
        let chars: Vec<char> = base.chars().collect();
        for shift in 0..chars.len() {
            let rotated: String = chars[shift..].iter().chain(&chars[..shift]).collect();
            if seen.insert(rotated.clone()) {
                seeds.push(rotated);
            }
        }
    }

    // Stable sort keeps the raw text ahead of equally ranked rotations
    seeds.sort_by(|a, b| seed_priority(b).cmp(&seed_priority(a)));
    seeds
}

/// Breadth-first search over confusable substitutions. Returns the best
/// grammar match across all depths; shallower edits win ties.
pub fn search_substitutions(grammar: &PlateGrammar, seeds: &[String]) -> Option<String> {
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    let mut seen: HashSet<String> = HashSet::new();

    for seed in seeds {
        if seen.insert(seed.clone()) {
            queue.push_back((seed.clone(), 0));
        }
    }

    let mut best: Option<(String, PlateScore, usize)> = None;

    while let Some((current, depth)) = queue.pop_front() {
        if grammar.matches(&current) {
            let current_score = score(grammar, &current, 1.0);
            let better = match &best {
                None => true,
                Some((_, best_score, best_depth)) => match current_score.compare(best_score) {
                    Ordering::Greater => true,
                    Ordering::Equal => depth < *best_depth,
                    Ordering::Less => false,
                },
            };
            if better {
                best = Some((current.clone(), current_score, depth));
            }
        }

        if depth >= MAX_SUBSTITUTIONS {
            continue;
        }

        let chars: Vec<char> = current.chars().collect();
        for (idx, &ch) in chars.iter().enumerate() {
            for &replacement in confusables(ch) {
                let mut next = chars.clone();
                next[idx] = replacement;
                let next: String = next.into_iter().collect();
                if seen.insert(next.clone()) {
                    queue.push_back((next, depth + 1));
                }
            }
        }
    }

    best.map(|(text, _, _)| text)
}

/// Replace an unknown region prefix via the override table or the nearest
/// known code (at most two differing positions), keeping grammar compliance.
pub fn enforce_region_prefix(grammar: &PlateGrammar, text: &str) -> String {
    if text.chars().count() < 2 || grammar.region_codes().is_empty() {
        return text.to_string();
    }

    let split = text.char_indices().nth(2).map_or(text.len(), |(i, _)| i);
    let (prefix, rest) = text.split_at(split);

    if let Some(replacement) = grammar.region_override(prefix) {
        let candidate = format!("{}{}", replacement, rest);
        if grammar.satisfies(&candidate) {
            return candidate;
        }
    }

    if grammar.is_region_code(prefix) {
        return text.to_string();
    }

    let mut best_code: Option<&str> = None;
    let mut best_diff = 3;
    for code in grammar.region_codes() {
        let diff = prefix.chars().zip(code.chars()).filter(|(a, b)| a != b).count();
        if diff < best_diff {
            best_diff = diff;
            best_code = Some(code.as_str());
        }
    }

    match best_code {
        Some(code) if code != prefix && best_diff <= 2 => {
            let candidate = format!("{}{}", code, rest);
            if grammar.satisfies(&candidate) {
                candidate
            } else {
                text.to_string()
            }
        }
        _ => text.to_string(),
    }
}

/// Re-read the series and serial blocks of a four-group plate and keep the
/// best-scoring reconstruction.
pub fn normalize_segments(grammar: &PlateGrammar, text: &str) -> String {
    let Some(seg) = grammar.segments(text) else {
        return text.to_string();
    };

    let mut district = seg.district.to_string();
    let mut series = seg.series;

    // "KA5OAB1234": the district lost a zero that was read as a letter
    if district.len() == 1 && series.len() > 1 && series.starts_with(['O', 'Q']) {
        district.push('0');
        series = &series[1..];
    }

    let options = expand_series(series);
    let serial: String = seg.serial.chars().map(serial_digit).collect();
    let rebuild = |option: &str| format!("{}{}{}{}", seg.region, district, option, serial);

    let mut best_text = rebuild(&options[0]);
    let mut best_score = score(grammar, &best_text, 1.0);

    for option in options.iter().skip(1).take(SERIES_OPTION_LIMIT - 1) {
        let candidate = rebuild(option);
        let candidate_score = score(grammar, &candidate, 1.0);
        if candidate_score > best_score {
            best_text = candidate;
            best_score = candidate_score;
        }
    }

    best_text
}

/// Bounded list of alternative series readings, plus each reading with its
/// last letter dropped. Never empty.
pub fn expand_series(series: &str) -> Vec<String> {
    if series.is_empty() {
        return vec![String::new()];
    }

    let mut options = vec![String::new()];
    for ch in series.chars() {
        let readings = series_readings(ch);
        let mut next = Vec::with_capacity(options.len() * 3);
        for base in &options {
            match readings {
                Some(alts) => {
                    for &alt in alts {
                        next.push(format!("{}{}", base, alt));
                    }
                }
                None => next.push(format!("{}{}", base, ch)),
            }
        }
        next.truncate(SERIES_OPTION_LIMIT);
        options = next;
    }

    let shortened: Vec<String> = options
        .iter()
        .filter(|o| o.chars().count() > 1)
        .map(|o| {
            let mut s = o.clone();
            s.pop();
            s
        })
        .collect();

    let mut seen = HashSet::new();
    let deduped: Vec<String> = options
        .into_iter()
        .chain(shortened)
        .filter(|o| !o.is_empty() && seen.insert(o.clone()))
        .collect();

    if deduped.is_empty() {
        vec![series.to_string()]
    } else {
        deduped
    }
}
