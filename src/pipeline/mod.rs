//! Plate identity pipeline
//!
//! `resolver` turns a crop into one plate string; `frame` drives whole frames
//! from detection through to the vehicle log.

pub mod frame;
pub mod resolver;

pub use frame::{ContourPlateDetector, FrameProcessor, PlateDetector, WholeFrameDetector};
pub use resolver::{PlateResolver, ResolvedPlate};
