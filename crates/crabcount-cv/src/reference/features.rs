//! ORB keypoints, contrast preprocessing and ratio-test matching

use super::{FeatureConfig, Preprocessing};
use crate::Result;
use opencv::{
    core::{self, DMatch, KeyPoint, Mat, Ptr, Size, Vector, CV_64F, NORM_HAMMING},
    features2d::{BFMatcher, ORB, ORB_ScoreType},
    imgproc,
    prelude::*,
};

/// Keypoints and their binary descriptors (one row per keypoint)
#[derive(Debug, Clone)]
pub struct Features {
    pub keypoints: Vector<KeyPoint>,
    pub descriptors: Mat,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty() || self.descriptors.empty()
    }
}

/// ORB detector/descriptor plus a brute-force Hamming matcher.
///
/// OpenCV detectors are stateful, so each detection run owns its extractor;
/// only the reference descriptors are shared.
pub struct FeatureExtractor {
    orb: Ptr<ORB>,
    matcher: BFMatcher,
    config: FeatureConfig,
}

impl FeatureExtractor {
    /// Create an extractor keeping at most `max_features` keypoints per image
    pub fn new(config: &FeatureConfig, max_features: i32) -> Result<Self> {
        let orb = ORB::create(
            max_features,
            1.2,
            8,
            31,
            0,
            2,
            ORB_ScoreType::HARRIS_SCORE,
            31,
            20,
        )?;
        let matcher = BFMatcher::new(NORM_HAMMING, false)?;

        Ok(Self {
            orb,
            matcher,
            config: config.clone(),
        })
    }

    /// Contrast normalization, plus a mild unsharp mask on blurry input
    pub fn preprocess(&self, gray: &Mat) -> Result<Mat> {
        let normalized = match self.config.preprocessing {
            Preprocessing::None => gray.try_clone()?,
            Preprocessing::HistogramEqualization => {
                let mut equalized = Mat::default();
                imgproc::equalize_hist(gray, &mut equalized)?;
                equalized
            }
            Preprocessing::Clahe => {
                let (tx, ty) = self.config.clahe_tile_size;
                let mut clahe =
                    imgproc::create_clahe(self.config.clahe_clip_limit, Size::new(tx, ty))?;
                let mut equalized = Mat::default();
                clahe.apply(gray, &mut equalized)?;
                equalized
            }
        };

        if Self::laplacian_variance(&normalized)? >= self.config.blur_variance_threshold {
            return Ok(normalized);
        }

        let mut blurred = Mat::default();
        imgproc::gaussian_blur_def(&normalized, &mut blurred, Size::new(0, 0), 1.2)?;
        let mut sharpened = Mat::default();
        core::add_weighted(&normalized, 1.6, &blurred, -0.6, 0.0, &mut sharpened, -1)?;
        Ok(sharpened)
    }

    /// Variance of the Laplacian, a cheap focus measure
    pub fn laplacian_variance(gray: &Mat) -> Result<f64> {
        let mut laplacian = Mat::default();
        imgproc::laplacian(gray, &mut laplacian, CV_64F, 1, 1.0, 0.0, core::BORDER_DEFAULT)?;

        let mut mean = Mat::default();
        let mut stddev = Mat::default();
        core::mean_std_dev(&laplacian, &mut mean, &mut stddev, &core::no_array())?;
        let sd = *stddev.at::<f64>(0)?;
        Ok(sd * sd)
    }

    /// Detect keypoints and compute descriptors on an already preprocessed image
    pub fn extract(&mut self, gray: &Mat) -> Result<Features> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        self.orb
            .detect_and_compute(gray, &core::no_array(), &mut keypoints, &mut descriptors, false)?;

        Ok(Features {
            keypoints,
            descriptors,
        })
    }

    /// Matches from `query` to `train` that pass the ratio test.
    ///
    /// Each query descriptor contributes at most one match, so the count is
    /// bounded by the query keypoint count.
    pub fn ratio_matches(&self, query: &Features, train: &Features) -> Result<Vec<DMatch>> {
        if query.is_empty() || train.len() < 2 {
            return Ok(Vec::new());
        }

        let mut knn = Vector::<Vector<DMatch>>::new();
        self.matcher.knn_match(
            &query.descriptors,
            &train.descriptors,
            &mut knn,
            2,
            &core::no_array(),
            false,
        )?;

        let ratio = self.config.match_ratio;
        let mut good = Vec::new();
        for pair in knn.iter() {
            if pair.len() < 2 {
                continue;
            }
            let best = pair.get(0)?;
            let second = pair.get(1)?;
            if best.distance < ratio * second.distance {
                good.push(best);
            }
        }
        Ok(good)
    }
}
