//! Plate text rules
//!
//! Grammar, validity checks, scoring and fuzzy correction of plate strings.
//! Everything here is pure string logic; no image or OCR types leak in.

pub mod correction;
pub mod rules;
pub mod score;

pub use correction::correct;
pub use rules::{clean_text, PlateGrammar, PlateSegments};
pub use score::{score, PlateScore};
