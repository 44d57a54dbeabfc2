//! Detection configuration

use crate::error::CrabError;
use crate::reference::FeatureConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which pipelines a run executes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Board locator, segmenter and classifier
    #[default]
    Board,
    /// Whole-frame feature localization only
    Features,
    /// Feature localization plus the board pipeline when a board is found
    Auto,
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionMode::Board => "board",
            DetectionMode::Features => "features",
            DetectionMode::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl FromStr for DetectionMode {
    type Err = CrabError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "board" => Ok(DetectionMode::Board),
            "features" => Ok(DetectionMode::Features),
            "auto" => Ok(DetectionMode::Auto),
            other => Err(CrabError::Config(format!("unknown detection mode '{other}'"))),
        }
    }
}

/// Main detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub mode: DetectionMode,
    pub board: BoardConfig,
    pub segmentation: SegmentationConfig,
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
    pub localization: LocalizationConfig,
    /// IoU above which the lower-scored of two detections is dropped
    pub nms_iou_threshold: f64,
    pub visualization: VisualizationConfig,
}

/// Board locator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Luminance at or below which a pixel is not board
    pub brightness_threshold: f64,
    pub close_kernel: i32,
    pub close_iterations: i32,
    /// Smallest share of the frame a board may cover
    pub min_area_fraction: f64,
}

/// Candidate segmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Side of the black-hat kernel; blobs wider than this fade out
    pub blackhat_kernel: i32,
    pub blur_kernel: i32,
    pub open_kernel: i32,
    pub close_kernel: i32,
    pub close_iterations: i32,
    pub min_area: f64,
    pub max_area: f64,
    pub max_aspect_ratio: f64,
    pub min_fill_ratio: f64,
    /// Blobs closer than this to the region border are dropped
    pub edge_margin: i32,
    /// Padding added around each kept blob
    pub box_margin: i32,
}

/// Classifier decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub min_candidate_keypoints: usize,
    /// Good matches the best class needs to be accepted
    pub min_matches: usize,
    /// A Target win is rejected when the strongest confusable reaches
    /// `(1 - tie_margin) * target`
    pub tie_margin: f64,
}

/// Whole-frame feature localization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    /// Frames with a longer side are downscaled first
    pub max_dim: i32,
    pub frame_features: i32,
    pub min_frame_keypoints: usize,
    pub min_good_matches: usize,
    pub min_inliers: usize,
    pub ransac_reproj_threshold: f64,
    /// Instances searched per reference
    pub max_instances: usize,
    pub min_box_area: f64,
    /// Boxes covering more than this share of the frame are dropped
    pub max_box_fraction: f64,
}

/// Annotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub box_rgb: (u8, u8, u8),
    pub thickness: i32,
    pub count_label: String,
    pub show_scores: bool,
    pub font_scale: f64,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            brightness_threshold: 200.0,
            close_kernel: 15,
            close_iterations: 2,
            min_area_fraction: 0.12,
        }
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            blackhat_kernel: 41,
            blur_kernel: 5,
            open_kernel: 7,
            close_kernel: 19,
            close_iterations: 2,
            min_area: 7000.0,
            max_area: 140000.0,
            max_aspect_ratio: 4.0,
            min_fill_ratio: 0.2,
            edge_margin: 8,
            box_margin: 10,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_candidate_keypoints: 20,
            min_matches: 12,
            tie_margin: 0.15,
        }
    }
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            max_dim: 1600,
            frame_features: 2000,
            min_frame_keypoints: 30,
            min_good_matches: 16,
            min_inliers: 12,
            ransac_reproj_threshold: 6.0,
            max_instances: 10,
            min_box_area: 2500.0,
            max_box_fraction: 0.5,
        }
    }
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            box_rgb: (0, 255, 0),
            thickness: 3,
            count_label: "GREEN CRABS".to_string(),
            show_scores: false,
            font_scale: 1.2,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Board,
            board: BoardConfig::default(),
            segmentation: SegmentationConfig::default(),
            features: FeatureConfig::default(),
            classifier: ClassifierConfig::default(),
            localization: LocalizationConfig::default(),
            nms_iou_threshold: 0.30,
            visualization: VisualizationConfig::default(),
        }
    }
}

impl DetectionConfig {
    /// Board pipeline only
    pub fn board_only() -> Self {
        Self::default()
    }

    /// Feature localization only, for photos without a board
    pub fn features_only() -> Self {
        Self {
            mode: DetectionMode::Features,
            ..Self::default()
        }
    }

    pub fn auto() -> Self {
        Self {
            mode: DetectionMode::Auto,
            ..Self::default()
        }
    }

    /// Load a possibly partial JSON config; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.board;
        positive("board.close_kernel", b.close_kernel)?;
        if b.close_iterations < 0 {
            return Err(CrabError::Config("board.close_iterations must not be negative".into()));
        }
        unit_interval("board.min_area_fraction", b.min_area_fraction)?;

        let s = &self.segmentation;
        positive("segmentation.blackhat_kernel", s.blackhat_kernel)?;
        odd_positive("segmentation.blur_kernel", s.blur_kernel)?;
        positive("segmentation.open_kernel", s.open_kernel)?;
        positive("segmentation.close_kernel", s.close_kernel)?;
        if s.min_area < 0.0 || s.min_area > s.max_area {
            return Err(CrabError::Config(format!(
                "segmentation area bounds are inverted: {} > {}",
                s.min_area, s.max_area
            )));
        }
        if s.max_aspect_ratio < 1.0 {
            return Err(CrabError::Config(
                "segmentation.max_aspect_ratio must be at least 1".into(),
            ));
        }
        unit_interval("segmentation.min_fill_ratio", s.min_fill_ratio)?;
        if s.edge_margin < 0 || s.box_margin < 0 {
            return Err(CrabError::Config("segmentation margins must not be negative".into()));
        }

        self.features.validate()?;

        let c = &self.classifier;
        if c.min_matches == 0 {
            return Err(CrabError::Config("classifier.min_matches must be positive".into()));
        }
        unit_interval("classifier.tie_margin", c.tie_margin)?;

        let l = &self.localization;
        positive("localization.max_dim", l.max_dim)?;
        positive("localization.frame_features", l.frame_features)?;
        if l.min_inliers < 4 {
            return Err(CrabError::Config("localization.min_inliers must be at least 4".into()));
        }
        if l.min_good_matches < l.min_inliers {
            return Err(CrabError::Config(
                "localization.min_good_matches must be at least min_inliers".into(),
            ));
        }
        if l.ransac_reproj_threshold <= 0.0 {
            return Err(CrabError::Config(
                "localization.ransac_reproj_threshold must be positive".into(),
            ));
        }
        unit_interval("localization.max_box_fraction", l.max_box_fraction)?;

        unit_interval("nms_iou_threshold", self.nms_iou_threshold)?;
        positive("visualization.thickness", self.visualization.thickness)?;
        Ok(())
    }
}

fn positive(name: &str, value: i32) -> Result<()> {
    if value <= 0 {
        return Err(CrabError::Config(format!("{name} must be positive, got {value}")));
    }
    Ok(())
}

fn odd_positive(name: &str, value: i32) -> Result<()> {
    if value <= 0 || value % 2 == 0 {
        return Err(CrabError::Config(format!("{name} must be odd and positive, got {value}")));
    }
    Ok(())
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CrabError::Config(format!("{name} must be in [0, 1], got {value}")));
    }
    Ok(())
}
