//! Confirmation and dedup tracking
//!
//! A resolved plate string only becomes a vehicle event after it has been
//! seen a minimum number of times. Separately, a new entry is suppressed when
//! a similar string was admitted within a trailing time window, since one
//! physical plate tends to produce several near-identical reads before the
//! OCR settles.
//!
//! The vote table and the recent-entry queue share one mutex: both are
//! read-then-written per plate string.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::TrackingSettings;

/// Accumulated hits for one plate string
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateVote {
    pub count: u32,
    pub best_confidence: f32,
}

/// Result of registering one hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoteOutcome {
    /// Not enough hits yet
    Pending { count: u32, required: u32 },
    /// Threshold reached; the vote record has been cleared
    Confirmed { count: u32, best_confidence: f32 },
}

impl VoteOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, VoteOutcome::Confirmed { .. })
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    votes: HashMap<String, PlateVote>,
    recent: VecDeque<(String, Instant)>,
}

/// Vote table and recent-entry queue
#[derive(Debug)]
pub struct ConfirmationTracker {
    state: Mutex<TrackerState>,
    min_hits: u32,
    /// `None` disables dedup
    dedup_window: Option<Duration>,
    dedup_similarity: f64,
}

impl ConfirmationTracker {
    pub fn new(settings: &TrackingSettings) -> Self {
        let dedup_window = (settings.dedup_window_secs > 0.0)
            .then(|| Duration::try_from_secs_f64(settings.dedup_window_secs).ok())
            .flatten();

        Self {
            state: Mutex::new(TrackerState::default()),
            min_hits: settings.min_hits.max(1),
            dedup_window,
            dedup_similarity: settings.dedup_similarity,
        }
    }

    pub fn min_hits(&self) -> u32 {
        self.min_hits
    }

    /// Register one hit for `plate` against the configured threshold
    pub fn register_vote(&self, plate: &str, confidence: f32) -> VoteOutcome {
        self.register_vote_with(plate, confidence, None)
    }

    /// Register one hit with an optional per-call threshold override
    pub fn register_vote_with(&self, plate: &str, confidence: f32, required_hits: Option<u32>) -> VoteOutcome {
        let required = required_hits.unwrap_or(self.min_hits).max(1);
        let mut state = self.state.lock();

        let vote = state.votes.entry(plate.to_string()).or_insert(PlateVote {
            count: 0,
            best_confidence: 0.0,
        });
        vote.count += 1;
        vote.best_confidence = vote.best_confidence.max(confidence);
        let vote = *vote;

        if vote.count >= required {
            state.votes.remove(plate);
            debug!("Plate {} confirmed after {} hits", plate, vote.count);
            VoteOutcome::Confirmed {
                count: vote.count,
                best_confidence: vote.best_confidence,
            }
        } else {
            VoteOutcome::Pending {
                count: vote.count,
                required,
            }
        }
    }

    /// Current vote for `plate`, if it is still being voted on
    pub fn vote(&self, plate: &str) -> Option<PlateVote> {
        self.state.lock().votes.get(plate).copied()
    }

    /// Drop the vote record for `plate`
    pub fn clear_vote(&self, plate: &str) {
        self.state.lock().votes.remove(plate);
    }

    /// Whether an entry for `plate` at `now` would be suppressed
    pub fn is_duplicate(&self, plate: &str, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.prune(&mut state, now);
        self.similar_recent(&state, plate)
    }

    /// Record an admitted entry for later dedup checks
    pub fn remember_entry(&self, plate: &str, now: Instant) {
        let mut state = self.state.lock();
        self.prune(&mut state, now);
        if self.dedup_window.is_some() {
            state.recent.push_back((plate.to_string(), now));
        }
    }

    /// Check and remember in one step; `false` means the entry is suppressed
    pub fn try_admit_entry(&self, plate: &str, now: Instant) -> bool {
        let mut state = self.state.lock();
        self.prune(&mut state, now);
        if self.similar_recent(&state, plate) {
            return false;
        }
        if self.dedup_window.is_some() {
            state.recent.push_back((plate.to_string(), now));
        }
        true
    }

    /// Number of entries still inside the dedup window as of the last access
    pub fn recent_len(&self) -> usize {
        self.state.lock().recent.len()
    }

    fn prune(&self, state: &mut TrackerState, now: Instant) {
        let Some(window) = self.dedup_window else {
            state.recent.clear();
            return;
        };
        while let Some((_, seen)) = state.recent.front() {
            if now.saturating_duration_since(*seen) > window {
                state.recent.pop_front();
            } else {
                break;
            }
        }
    }

    fn similar_recent(&self, state: &TrackerState, plate: &str) -> bool {
        state
            .recent
            .iter()
            .any(|(recent, _)| plate_similarity(plate, recent) >= self.dedup_similarity)
    }
}

/// Matching-block ratio in `[0, 1]`: twice the matched characters over the
/// combined length. A read shifted by one glyph still scores high. Empty
/// strings only match themselves.
pub fn plate_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    2.0 * matched_chars(&a, &b) as f64 / (a.len() + b.len()) as f64
}

/// Characters covered by recursively taking the longest common block and
/// matching what lies on either side of it
fn matched_chars(a: &[char], b: &[char]) -> usize {
    let (start_a, start_b, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matched_chars(&a[..start_a], &b[..start_b])
        + matched_chars(&a[start_a + len..], &b[start_b + len..])
}

/// Longest common substring; ties go to the earliest start in `a`, then in `b`
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    // run[j + 1]: length of the common run ending at a[i], b[j]
    let mut prev = vec![0usize; b.len() + 1];
    let mut run = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            run[j + 1] = if ca == cb { prev[j] + 1 } else { 0 };
            if run[j + 1] > best.2 {
                best = (i + 1 - run[j + 1], j + 1 - run[j + 1], run[j + 1]);
            }
        }
        std::mem::swap(&mut prev, &mut run);
    }
    best
}
