//! Vision/OCR Layer
//!
//! Turns a plate crop into scored text candidates:
//! - `variants`: rotated and processed renderings of the crop
//! - `reader`: OCR hits from one variant, cleaned into candidates
//! - `evaluator`: tiered reading across all variants
//!
//! The recognition engine itself sits behind [`TextRecognizer`]; the
//! `tesseract` module provides a command-line backend.

pub mod crop;
pub mod evaluator;
pub mod ocr;
pub mod reader;
pub mod tesseract;
pub mod variants;

pub use crop::PlateCrop;
pub use evaluator::{evaluate, Evaluation};
pub use ocr::{with_timeout, OcrResult, TextRecognizer, TimeoutRecognizer, PLATE_ALPHABET};
pub use reader::{Candidate, HypothesisReader};
pub use tesseract::TesseractCli;
pub use variants::{generate_variants, Variant, VariantKind};

