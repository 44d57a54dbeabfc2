//! Domain data for the crab counter: class labels and the species roster.
//!
//! Kept free of any vision dependency so drivers and reports can use it
//! without linking OpenCV.

pub mod species;

pub use species::{ClassLabel, Roster, Species};
