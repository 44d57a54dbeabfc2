//! Candidate classification by feature matching against the reference library
//!
//! Each reference's descriptors are matched to the candidate's with a ratio
//! test; the number of surviving matches is that class's score. The decision
//! itself is a pure function of the scores so it can be tested without images.

use crate::detection::config::ClassifierConfig;
use crate::detection::{Detection, DetectionSource};
use crate::reference::{FeatureExtractor, ReferenceLibrary};
use crate::segment::Candidate;
use crate::Result;
use crabcount_core::ClassLabel;
use log::debug;
use opencv::{core::Mat, prelude::*};
use serde::Serialize;

/// Good-match count per class, indexed by [`ClassLabel::index`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassScores(pub [usize; 3]);

impl ClassScores {
    pub fn get(&self, label: ClassLabel) -> usize {
        self.0[label.index()]
    }

    /// Highest-scoring class. On equal scores a confusable wins over Target.
    pub fn best(&self) -> (ClassLabel, usize) {
        let mut best = (ClassLabel::Target, self.get(ClassLabel::Target));
        for label in ClassLabel::CONFUSABLES {
            let score = self.get(label);
            if score > best.1 || (score == best.1 && best.0.is_target()) {
                best = (label, score);
            }
        }
        best
    }

    pub fn strongest_confusable(&self) -> (ClassLabel, usize) {
        let [a, b] = ClassLabel::CONFUSABLES;
        if self.get(b) > self.get(a) { (b, self.get(b)) } else { (a, self.get(a)) }
    }
}

/// Why a candidate was not assigned a class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// The patch has too little texture to be compared at all
    TooFewKeypoints { found: usize },
    /// No class reached the minimum match count
    BelowMinimum { best: usize },
    /// Target won, but a confusable species came too close
    Ambiguous { target: usize, confusable: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted { label: ClassLabel, score: usize },
    Rejected(RejectReason),
}

/// Apply the acceptance rules to one candidate's scores
pub fn decide(scores: &ClassScores, keypoints: usize, config: &ClassifierConfig) -> Verdict {
    if keypoints < config.min_candidate_keypoints {
        return Verdict::Rejected(RejectReason::TooFewKeypoints { found: keypoints });
    }

    let (label, best) = scores.best();
    if best < config.min_matches {
        return Verdict::Rejected(RejectReason::BelowMinimum { best });
    }

    if label.is_target() {
        let (_, confusable) = scores.strongest_confusable();
        if confusable as f64 >= (1.0 - config.tie_margin) * best as f64 {
            return Verdict::Rejected(RejectReason::Ambiguous {
                target: best,
                confusable,
            });
        }
    }

    Verdict::Accepted { label, score: best }
}

/// Scores candidates against a shared reference library.
///
/// Holds its own ORB extractor, so create one per detection run.
pub struct Classifier<'a> {
    library: &'a ReferenceLibrary,
    extractor: FeatureExtractor,
    config: ClassifierConfig,
}

impl<'a> Classifier<'a> {
    pub fn new(library: &'a ReferenceLibrary, config: &ClassifierConfig) -> Result<Self> {
        let features = library.feature_config();
        let extractor = FeatureExtractor::new(features, features.orb_features)?;
        Ok(Self {
            library,
            extractor,
            config: config.clone(),
        })
    }

    /// Per-class scores of a grayscale patch and its keypoint count
    pub fn score(&mut self, patch: &Mat) -> Result<(ClassScores, usize)> {
        if patch.empty() {
            return Ok((ClassScores::default(), 0));
        }

        let prepared = self.extractor.preprocess(patch)?;
        let features = self.extractor.extract(&prepared)?;

        let mut scores = ClassScores::default();
        for appearance in self.library.iter() {
            let matches = self.extractor.ratio_matches(&appearance.features, &features)?;
            scores.0[appearance.label.index()] = matches.len();
        }
        Ok((scores, features.len()))
    }

    pub fn classify(&mut self, candidate: &Candidate) -> Result<Detection> {
        let (scores, keypoints) = self.score(&candidate.patch)?;
        let verdict = decide(&scores, keypoints, &self.config);

        let bbox = candidate.image_bbox();
        let bbox = match verdict {
            Verdict::Accepted { label, score } => {
                bbox.with_label(label).with_confidence(score as f64)
            }
            Verdict::Rejected(_) => bbox.with_confidence(scores.best().1 as f64),
        };

        debug!(
            "Candidate at ({}, {}): {} keypoints, scores {:?} -> {:?}",
            bbox.x, bbox.y, keypoints, scores.0, verdict
        );

        Ok(Detection {
            bbox,
            verdict,
            scores: Some(scores),
            source: DetectionSource::Segmentation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{flat, library, specimen, JONAH_SEED, ROCK_SEED, TARGET_SEED};

    fn scores(target: usize, rock: usize, jonah: usize) -> ClassScores {
        ClassScores([target, rock, jonah])
    }

    #[test]
    fn test_best_prefers_confusable_on_ties() {
        assert_eq!(scores(30, 30, 5).best(), (ClassLabel::Confusable1, 30));
        assert_eq!(scores(30, 4, 30).best(), (ClassLabel::Confusable2, 30));
        assert_eq!(scores(31, 30, 5).best(), (ClassLabel::Target, 31));
        assert_eq!(scores(1, 9, 9).strongest_confusable(), (ClassLabel::Confusable1, 9));
    }

    #[test]
    fn test_decision_rules() {
        let config = ClassifierConfig::default();

        assert_eq!(
            decide(&scores(100, 0, 0), 5, &config),
            Verdict::Rejected(RejectReason::TooFewKeypoints { found: 5 })
        );
        assert_eq!(
            decide(&scores(11, 3, 2), 200, &config),
            Verdict::Rejected(RejectReason::BelowMinimum { best: 11 })
        );
        assert_eq!(
            decide(&scores(40, 35, 2), 200, &config),
            Verdict::Rejected(RejectReason::Ambiguous { target: 40, confusable: 35 })
        );
        assert_eq!(
            decide(&scores(40, 20, 33), 200, &config),
            Verdict::Accepted { label: ClassLabel::Target, score: 40 }
        );
        // A confusable win never needs a margin
        assert_eq!(
            decide(&scores(39, 40, 2), 200, &config),
            Verdict::Accepted { label: ClassLabel::Confusable1, score: 40 }
        );
    }

    #[test]
    fn test_rotated_target_is_accepted() -> Result<()> {
        let library = library()?;
        let mut classifier = Classifier::new(&library, &ClassifierConfig::default())?;

        let (scores, keypoints) = classifier.score(&specimen(TARGET_SEED, true))?;
        assert!(keypoints >= 20);
        assert!(scores.get(ClassLabel::Target) > scores.get(ClassLabel::Confusable1));
        assert!(scores.get(ClassLabel::Target) > scores.get(ClassLabel::Confusable2));

        let verdict = decide(&scores, keypoints, &ClassifierConfig::default());
        assert!(matches!(verdict, Verdict::Accepted { label: ClassLabel::Target, .. }));
        Ok(())
    }

    #[test]
    fn test_confusables_are_never_target() -> Result<()> {
        let library = library()?;
        let mut classifier = Classifier::new(&library, &ClassifierConfig::default())?;

        let confusables = [
            (ROCK_SEED, ClassLabel::Confusable1),
            (JONAH_SEED, ClassLabel::Confusable2),
        ];
        for (seed, label) in confusables {
            let (scores, keypoints) = classifier.score(&specimen(seed, false))?;
            let verdict = decide(&scores, keypoints, &ClassifierConfig::default());
            assert_eq!(scores.best().0, label);
            assert!(!matches!(verdict, Verdict::Accepted { label: ClassLabel::Target, .. }));
        }
        Ok(())
    }

    #[test]
    fn test_blank_patch_is_rejected() -> Result<()> {
        let library = library()?;
        let mut classifier = Classifier::new(&library, &ClassifierConfig::default())?;

        let (scores, keypoints) = classifier.score(&flat(200, 200, 230))?;
        assert_eq!(keypoints, 0);
        assert_eq!(scores, ClassScores::default());
        assert_eq!(
            decide(&scores, keypoints, &ClassifierConfig::default()),
            Verdict::Rejected(RejectReason::TooFewKeypoints { found: 0 })
        );
        Ok(())
    }
}
