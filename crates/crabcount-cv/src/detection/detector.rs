//! The per-image pipeline: board, candidates, classification, report

use super::config::{DetectionConfig, DetectionMode};
use super::result::{Detection, DetectionRun, DetectionSource, RunStage};
use crate::annotate::{Annotator, DetectionReport};
use crate::board::{BoardRegion, LargestBrightRegion};
use crate::classify::{Classifier, RejectReason, Verdict};
use crate::localize::FeatureLocalizer;
use crate::reference::ReferenceLibrary;
use crate::segment::CandidateSegmenter;
use crate::traits::BoardLocator;
use crate::utils::{nms, ImageUtils};
use crate::{CrabError, Result};
use log::{debug, info, warn};
use opencv::core::Mat;
use std::path::Path;
use std::sync::Arc;

/// Counts target crabs in single images.
///
/// Holds no per-image state, so one detector can serve many threads; each
/// call builds its own feature extractors and shares only the library.
pub struct CrabDetector {
    config: DetectionConfig,
    library: Arc<ReferenceLibrary>,
    locator: Box<dyn BoardLocator>,
    segmenter: CandidateSegmenter,
    annotator: Annotator,
}

impl CrabDetector {
    pub fn new(config: DetectionConfig, library: Arc<ReferenceLibrary>) -> Result<Self> {
        config.validate()?;
        if config.features != *library.feature_config() {
            return Err(CrabError::Config(
                "features must match the settings the reference library was built with".into(),
            ));
        }
        Ok(Self {
            locator: Box::new(LargestBrightRegion::new(config.board.clone())),
            segmenter: CandidateSegmenter::new(config.segmentation.clone()),
            annotator: Annotator::new(config.visualization.clone()),
            config,
            library,
        })
    }

    /// Replace the board policy
    pub fn with_locator<L: BoardLocator + 'static>(mut self, locator: L) -> Self {
        self.locator = Box::new(locator);
        self
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn library(&self) -> &ReferenceLibrary {
        &self.library
    }

    /// Run every configured pipeline on one image.
    ///
    /// Returns all classified regions, rejected ones included, after
    /// consolidation. Finding nothing is not an error.
    pub fn detect_mat(&self, image: &Mat) -> Result<DetectionRun> {
        let gray = ImageUtils::to_gray(image)?;
        let mode = self.config.mode;
        let mut stages = vec![RunStage::Start];
        let mut detections = Vec::new();
        let mut candidates = 0;
        let mut board = None;

        if mode != DetectionMode::Board {
            let mut localizer = FeatureLocalizer::new(&self.library, &self.config.localization)?;
            detections = localizer.localize(&gray)?;
            stages.push(RunStage::Localized);
        }

        if mode == DetectionMode::Features {
            stages.push(RunStage::BoardSkipped);
        } else {
            board = self.locator.locate(&gray)?;
            let search = match (&board, mode) {
                (Some(region), _) => {
                    debug!(
                        "Board at ({}, {}) {}x{}, {:.0}% of frame",
                        region.bounds.x,
                        region.bounds.y,
                        region.bounds.width,
                        region.bounds.height,
                        region.area_fraction * 100.0
                    );
                    stages.push(RunStage::BoardLocated);
                    Self::restrict_to_board(&mut detections, region);
                    true
                }
                (None, DetectionMode::Auto) => {
                    debug!("No board found, keeping feature localization only");
                    stages.push(RunStage::BoardSkipped);
                    false
                }
                (None, _) => {
                    warn!(
                        "No board found, segmenting the full image; \
                         expect more background false positives"
                    );
                    stages.push(RunStage::NoBoardFallback);
                    true
                }
            };

            if search {
                let found = self.segmenter.segment(&gray, board.as_ref())?;
                stages.push(RunStage::Segmented);
                candidates = found.len();

                let mut classifier = Classifier::new(&self.library, &self.config.classifier)?;
                for candidate in &found {
                    detections.push(classifier.classify(candidate)?);
                }
                stages.push(RunStage::Classified);
            }
        }

        Ok(DetectionRun {
            detections: self.consolidate(detections),
            board,
            stages,
            candidates,
        })
    }

    /// Detect, then render the report
    pub fn report_mat(&self, image: &Mat) -> Result<DetectionReport> {
        let run = self.detect_mat(image)?;
        let report = self.annotator.render(image, &run.detections)?;
        info!(
            "Counted {} target(s) from {} candidate(s), {} detection(s) total",
            report.total_count(),
            run.candidates,
            run.detections.len()
        );

        let mut stages = run.stages;
        stages.extend([RunStage::Reported, RunStage::Done]);
        Ok(report.with_run(run.board, stages))
    }

    pub fn report_rgb(&self, image: &image::RgbImage) -> Result<DetectionReport> {
        let mat = ImageUtils::rgb_to_mat(image)?;
        self.report_mat(&mat)
    }

    /// Decode `path` and report on it; undecodable files are `Decode` errors
    pub fn report_file<P: AsRef<Path>>(&self, path: P) -> Result<DetectionReport> {
        let mat = ImageUtils::load_color(path)?;
        self.report_mat(&mat)
    }

    /// Keep localized boxes inside the board once one is known
    fn restrict_to_board(detections: &mut Vec<Detection>, board: &BoardRegion) {
        for detection in detections.iter_mut() {
            detection.bbox = detection.bbox.clamp_to(&board.bounds);
        }
        detections.retain(|d| !d.bbox.is_empty());
    }

    /// Class-agnostic NMS over accepted detections, then reading order.
    ///
    /// A localized target sitting on a candidate the classifier found
    /// ambiguous is dropped before suppression, so Auto mode never counts a
    /// specimen the board pass refused to call.
    fn consolidate(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let threshold = self.config.nms_iou_threshold;
        let (accepted, rejected): (Vec<_>, Vec<_>) =
            detections.into_iter().partition(|d| d.is_accepted());

        let ambiguous: Vec<_> = rejected
            .iter()
            .filter(|d| matches!(d.verdict, Verdict::Rejected(RejectReason::Ambiguous { .. })))
            .map(|d| &d.bbox)
            .collect();
        let accepted: Vec<_> = accepted
            .into_iter()
            .filter(|d| {
                let contested = d.source == DetectionSource::Localization
                    && d.is_target()
                    && ambiguous.iter().any(|b| d.bbox.overlaps(b, threshold));
                if contested {
                    debug!(
                        "Dropping localized target at ({}, {}): ambiguous candidate",
                        d.bbox.x, d.bbox.y
                    );
                }
                !contested
            })
            .collect();

        let mut kept = nms::suppress(accepted, |d| &d.bbox, threshold);
        kept.extend(rejected);
        kept.sort_by_key(|d| (d.bbox.y, d.bbox.x));
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;
    use crate::reference::FeatureConfig;
    use crate::test_support::{flat, library};
    use crabcount_core::ClassLabel;

    /// Treats the whole frame as the board
    struct WholeFrame;

    impl BoardLocator for WholeFrame {
        fn locate(&self, gray: &Mat) -> Result<Option<BoardRegion>> {
            Ok(Some(BoardRegion {
                bounds: ImageUtils::bounds(gray),
                outline: Vec::new(),
                area_fraction: 1.0,
                brightness_score: 0.0,
            }))
        }
    }

    fn detector(config: DetectionConfig) -> Result<CrabDetector> {
        CrabDetector::new(config, Arc::new(library()?))
    }

    fn accepted(x: i32, y: i32, label: ClassLabel, score: usize) -> Detection {
        Detection {
            bbox: BBox::new(x, y, 100, 100, score as f64).with_label(label),
            verdict: Verdict::Accepted { label, score },
            scores: None,
            source: DetectionSource::Segmentation,
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() -> Result<()> {
        let mut config = DetectionConfig::default();
        config.nms_iou_threshold = 2.0;
        assert!(detector(config).is_err());
        Ok(())
    }

    #[test]
    fn test_dark_image_takes_fallback_path() -> Result<()> {
        let detector = detector(DetectionConfig::default())?;
        let report = detector.report_mat(&flat(300, 400, 15))?;

        assert_eq!(report.total_count(), 0);
        assert!(report.board().is_none());
        assert_eq!(
            report.stages(),
            &[
                RunStage::Start,
                RunStage::NoBoardFallback,
                RunStage::Segmented,
                RunStage::Classified,
                RunStage::Reported,
                RunStage::Done
            ]
        );
        Ok(())
    }

    #[test]
    fn test_features_mode_skips_board() -> Result<()> {
        let detector = detector(DetectionConfig::features_only())?;
        let run = detector.detect_mat(&flat(300, 400, 230))?;
        assert!(run.detections.is_empty());
        assert_eq!(run.stages, vec![RunStage::Start, RunStage::Localized, RunStage::BoardSkipped]);
        Ok(())
    }

    #[test]
    fn test_auto_mode_without_board_only_localizes() -> Result<()> {
        let detector = detector(DetectionConfig::auto())?;
        let run = detector.detect_mat(&flat(300, 400, 15))?;
        assert!(!run.fell_back());
        assert_eq!(run.stages.last(), Some(&RunStage::BoardSkipped));
        Ok(())
    }

    #[test]
    fn test_custom_locator_is_used() -> Result<()> {
        let detector = detector(DetectionConfig::default())?.with_locator(WholeFrame);
        let run = detector.detect_mat(&flat(200, 300, 15))?;
        assert_eq!(run.stages[1], RunStage::BoardLocated);
        assert_eq!(run.board.map(|b| b.bounds), Some(BBox::new(0, 0, 300, 200, 0.0)));
        Ok(())
    }

    #[test]
    fn test_consolidation_suppresses_overlaps_and_orders_by_position() -> Result<()> {
        let detector = detector(DetectionConfig::default())?;
        let rejected = Detection {
            bbox: BBox::new(5, 5, 50, 50, 3.0),
            verdict: Verdict::Rejected(RejectReason::BelowMinimum { best: 3 }),
            scores: None,
            source: DetectionSource::Segmentation,
        };

        let consolidated = detector.consolidate(vec![
            accepted(300, 40, ClassLabel::Target, 30),
            accepted(10, 40, ClassLabel::Target, 30),
            // Overlaps the first target with a stronger score
            accepted(310, 45, ClassLabel::Confusable1, 50),
            rejected,
        ]);

        let labels: Vec<_> = consolidated.iter().map(|d| (d.bbox.x, d.label())).collect();
        assert_eq!(
            labels,
            vec![
                (5, None),
                (10, Some(ClassLabel::Target)),
                (310, Some(ClassLabel::Confusable1))
            ]
        );
        Ok(())
    }

    #[test]
    fn test_ambiguous_candidate_vetoes_localized_target() -> Result<()> {
        let detector = detector(DetectionConfig::auto())?;
        let localized = Detection {
            source: DetectionSource::Localization,
            ..accepted(100, 100, ClassLabel::Target, 25)
        };
        let ambiguous = Detection {
            bbox: BBox::new(110, 110, 100, 100, 40.0),
            verdict: Verdict::Rejected(RejectReason::Ambiguous {
                target: 40,
                confusable: 35,
            }),
            scores: None,
            source: DetectionSource::Segmentation,
        };

        let consolidated = detector.consolidate(vec![localized, ambiguous]);
        assert_eq!(consolidated.iter().filter(|d| d.is_target()).count(), 0);
        assert_eq!(consolidated.len(), 1);
        assert!(!consolidated[0].is_accepted());
        Ok(())
    }

    #[test]
    fn test_far_ambiguous_candidate_leaves_localized_target() -> Result<()> {
        let detector = detector(DetectionConfig::auto())?;
        let localized = Detection {
            source: DetectionSource::Localization,
            ..accepted(100, 100, ClassLabel::Target, 25)
        };
        let ambiguous = Detection {
            bbox: BBox::new(400, 100, 100, 100, 40.0),
            verdict: Verdict::Rejected(RejectReason::Ambiguous {
                target: 40,
                confusable: 35,
            }),
            scores: None,
            source: DetectionSource::Segmentation,
        };

        let consolidated = detector.consolidate(vec![localized, ambiguous]);
        assert_eq!(consolidated.iter().filter(|d| d.is_target()).count(), 1);
        Ok(())
    }

    #[test]
    fn test_feature_settings_must_match_library() -> Result<()> {
        let mut config = DetectionConfig::default();
        config.features = FeatureConfig {
            orb_features: 500,
            ..Default::default()
        };
        let err = detector(config).err().expect("mismatch rejected");
        assert!(matches!(err, CrabError::Config(_)));
        Ok(())
    }
}
