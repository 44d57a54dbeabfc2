//! High-level detection module

pub mod config;
pub mod detector;
pub mod result;

pub use config::{
    BoardConfig, ClassifierConfig, DetectionConfig, DetectionMode, LocalizationConfig,
    SegmentationConfig, VisualizationConfig,
};
pub use detector::CrabDetector;
pub use result::{Detection, DetectionRun, DetectionSource, RunStage};
