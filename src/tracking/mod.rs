//! Temporal tracking of resolved plates
//!
//! `confirm` decides when a plate string is stable enough to act on;
//! `entry_exit` turns confirmed plates into entry and exit events.

pub mod confirm;
pub mod entry_exit;

pub use confirm::{plate_similarity, ConfirmationTracker, PlateVote, VoteOutcome};
pub use entry_exit::{timestamp_now, EntryExitTracker, VehicleEvent};
