//! Per-run detection records

use crate::bbox::BBox;
use crate::board::BoardRegion;
use crate::classify::{ClassScores, Verdict};
use crabcount_core::ClassLabel;
use serde::Serialize;

/// Which pipeline produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    /// Board segmentation followed by per-candidate classification
    Segmentation,
    /// Whole-frame homography search for a reference
    Localization,
}

/// One classified region, in original-image coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    /// `confidence` carries the match score, `label` the accepted class
    pub bbox: BBox,
    pub verdict: Verdict,
    /// Per-class good-match counts, when the candidate was scored
    pub scores: Option<ClassScores>,
    pub source: DetectionSource,
}

impl Detection {
    pub fn label(&self) -> Option<ClassLabel> {
        match self.verdict {
            Verdict::Accepted { label, .. } => Some(label),
            Verdict::Rejected(_) => None,
        }
    }

    pub fn score(&self) -> f64 {
        self.bbox.confidence
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.verdict, Verdict::Accepted { .. })
    }

    /// Accepted as the counted species
    pub fn is_target(&self) -> bool {
        self.label().is_some_and(|label| label.is_target())
    }
}

/// Steps of one detection run, recorded in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Start,
    BoardLocated,
    /// No board: segmentation covers the whole frame
    NoBoardFallback,
    /// Board pipeline not run in this mode
    BoardSkipped,
    Localized,
    Segmented,
    Classified,
    Reported,
    Done,
}

/// Everything one run found, before rendering
#[derive(Debug, Clone, Serialize)]
pub struct DetectionRun {
    /// Every classified region, accepted or not, ordered top to bottom
    pub detections: Vec<Detection>,
    pub board: Option<BoardRegion>,
    pub stages: Vec<RunStage>,
    /// Number of segmented candidates
    pub candidates: usize,
}

impl DetectionRun {
    pub fn accepted(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(|d| d.is_accepted())
    }

    pub fn targets(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(|d| d.is_target())
    }

    pub fn fell_back(&self) -> bool {
        self.stages.contains(&RunStage::NoBoardFallback)
    }
}
