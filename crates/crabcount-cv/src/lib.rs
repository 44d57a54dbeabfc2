//! Crab counting vision library
//!
//! Finds the reference board in a photo, segments dark candidate blobs on it
//! and classifies each blob against a fixed set of reference photos with ORB
//! feature matching. Built on OpenCV.

pub mod annotate;
pub mod bbox;
pub mod board;
pub mod classify;
pub mod detection;
pub mod error;
pub mod localize;
pub mod reference;
pub mod segment;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use annotate::{Annotator, DetectionReport};
pub use bbox::BBox;
pub use board::{BoardRegion, LargestBrightRegion};
pub use classify::{ClassScores, Classifier, RejectReason, Verdict};
pub use detection::{
    CrabDetector, Detection, DetectionConfig, DetectionMode, DetectionRun, DetectionSource,
    RunStage,
};
pub use error::CrabError;
pub use localize::FeatureLocalizer;
pub use reference::{FeatureConfig, ReferenceAppearance, ReferenceLibrary};
pub use segment::{Candidate, CandidateSegmenter};

pub use crabcount_core::{ClassLabel, Roster, Species};

pub type Result<T> = std::result::Result<T, CrabError>;

/// Seams where a policy can be swapped without touching the pipeline.
pub mod traits {
    use super::*;
    use opencv::core::Mat;

    /// Decides which part of a grayscale frame is the reference board.
    pub trait BoardLocator: Send + Sync {
        fn locate(&self, gray: &Mat) -> Result<Option<BoardRegion>>;
    }
}
