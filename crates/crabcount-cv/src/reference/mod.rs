//! Reference library: one labeled photo per class with precomputed features

pub mod features;
pub mod loader;

pub use features::{FeatureExtractor, Features};
pub use loader::ReferenceLoader;

use crate::error::CrabError;
use crate::utils::ImageUtils;
use crate::Result;
use crabcount_core::{ClassLabel, Roster};
use log::debug;
use opencv::core::Mat;
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contrast normalization applied before keypoint extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preprocessing {
    /// No preprocessing
    None,
    /// Global histogram equalization
    HistogramEqualization,
    /// Adaptive histogram equalization (CLAHE)
    Clahe,
}

/// Keypoint extraction and matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// ORB keypoint budget per reference photo and per candidate patch
    pub orb_features: i32,
    /// Lowe ratio: best match must be closer than `match_ratio` times the second best
    pub match_ratio: f32,
    pub preprocessing: Preprocessing,
    pub clahe_clip_limit: f64,
    pub clahe_tile_size: (i32, i32),
    /// Laplacian variance under which the image is sharpened
    pub blur_variance_threshold: f64,
    pub min_reference_keypoints: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            orb_features: 1200,
            match_ratio: 0.75,
            preprocessing: Preprocessing::Clahe,
            clahe_clip_limit: 2.0,
            clahe_tile_size: (8, 8),
            blur_variance_threshold: 40.0,
            min_reference_keypoints: 20,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.orb_features <= 0 {
            return Err(CrabError::Config("orb_features must be positive".into()));
        }
        if !(self.match_ratio > 0.0 && self.match_ratio < 1.0) {
            return Err(CrabError::Config("match_ratio must be in (0, 1)".into()));
        }
        if self.clahe_tile_size.0 <= 0 || self.clahe_tile_size.1 <= 0 {
            return Err(CrabError::Config("clahe_tile_size must be positive".into()));
        }
        Ok(())
    }
}

/// A labeled reference photo and its descriptors. Read-only once built.
#[derive(Debug)]
pub struct ReferenceAppearance {
    pub label: ClassLabel,
    pub name: String,
    pub source: Option<PathBuf>,
    /// Preprocessed grayscale image the features were computed on
    pub image: Mat,
    pub features: Features,
}

impl ReferenceAppearance {
    pub fn width(&self) -> i32 {
        self.image.cols()
    }

    pub fn height(&self) -> i32 {
        self.image.rows()
    }
}

/// The fixed reference set, loaded once and shared by every detection run.
#[derive(Debug)]
pub struct ReferenceLibrary {
    appearances: Vec<ReferenceAppearance>,
    config: FeatureConfig,
}

impl ReferenceLibrary {
    /// Load the three reference photos named by `roster` from `dir`
    pub fn load<P: AsRef<Path>>(dir: P, roster: &Roster, config: &FeatureConfig) -> Result<Self> {
        ReferenceLoader::new(dir).load_library(roster, config)
    }

    /// Build a library from in-memory images, one per label
    pub fn from_images<I>(images: I, roster: &Roster, config: &FeatureConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (ClassLabel, Mat)>,
    {
        let entries = images.into_iter().map(|(label, image)| (label, image, None));
        Self::build(entries, roster, config)
    }

    pub(crate) fn build<I>(entries: I, roster: &Roster, config: &FeatureConfig) -> Result<Self>
    where
        I: IntoIterator<Item = (ClassLabel, Mat, Option<PathBuf>)>,
    {
        config.validate()?;
        let mut extractor = FeatureExtractor::new(config, config.orb_features)?;
        let mut slots: [Option<ReferenceAppearance>; 3] = [None, None, None];

        for (label, image, source) in entries {
            let fail = |reason: String| CrabError::ReferenceLoad {
                label,
                path: source.clone().unwrap_or_default(),
                reason,
            };

            if slots[label.index()].is_some() {
                return Err(fail("reference given more than once".to_string()));
            }
            if image.empty() {
                return Err(fail("image is empty".to_string()));
            }

            let gray = ImageUtils::to_gray(&image)?;
            let prepared = extractor.preprocess(&gray)?;
            let features = extractor.extract(&prepared)?;
            if features.len() < config.min_reference_keypoints {
                return Err(fail(format!(
                    "only {} keypoints, need at least {}",
                    features.len(),
                    config.min_reference_keypoints
                )));
            }

            debug!(
                "Reference '{}' {}x{}: {} keypoints",
                label,
                prepared.cols(),
                prepared.rows(),
                features.len()
            );

            slots[label.index()] = Some(ReferenceAppearance {
                label,
                name: roster.get(label).name.clone(),
                source,
                image: prepared,
                features,
            });
        }

        let mut appearances = Vec::with_capacity(3);
        for (slot, label) in slots.into_iter().zip(ClassLabel::ALL) {
            let appearance = slot.ok_or_else(|| CrabError::ReferenceLoad {
                label,
                path: PathBuf::new(),
                reason: "no reference image provided".to_string(),
            })?;
            appearances.push(appearance);
        }

        Ok(Self {
            appearances,
            config: config.clone(),
        })
    }

    pub fn get(&self, label: ClassLabel) -> &ReferenceAppearance {
        &self.appearances[label.index()]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReferenceAppearance> {
        self.appearances.iter()
    }

    /// Feature settings the references were built with; candidates must use the same
    pub fn feature_config(&self) -> &FeatureConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{flat, specimen};

    #[test]
    fn test_library_from_images_has_all_classes() -> Result<()> {
        let library = crate::test_support::library()?;
        for label in ClassLabel::ALL {
            let appearance = library.get(label);
            assert_eq!(appearance.label, label);
            assert!(appearance.features.len() >= 20);
        }
        Ok(())
    }

    #[test]
    fn test_featureless_reference_is_a_load_error() {
        let images = vec![
            (ClassLabel::Target, specimen(1, false)),
            (ClassLabel::Confusable1, flat(240, 240, 230)),
            (ClassLabel::Confusable2, specimen(3, false)),
        ];
        let err =
            ReferenceLibrary::from_images(images, &Roster::default(), &FeatureConfig::default())
                .unwrap_err();
        assert!(matches!(err, CrabError::ReferenceLoad { label: ClassLabel::Confusable1, .. }));
    }

    #[test]
    fn test_missing_class_is_a_load_error() {
        let images = vec![
            (ClassLabel::Target, specimen(1, false)),
            (ClassLabel::Confusable1, specimen(2, false)),
        ];
        let err =
            ReferenceLibrary::from_images(images, &Roster::default(), &FeatureConfig::default())
                .unwrap_err();
        assert!(matches!(err, CrabError::ReferenceLoad { label: ClassLabel::Confusable2, .. }));
    }

    #[test]
    fn test_feature_config_validation() {
        let config = FeatureConfig {
            match_ratio: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(FeatureConfig::default().validate().is_ok());
    }
}
