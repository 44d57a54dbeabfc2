//! Whole-frame localization of reference instances by homography
//!
//! Works without a board: every reference is matched against the features
//! of the full (possibly downscaled) frame, and instances are peeled off one
//! RANSAC homography at a time.

use crate::bbox::BBox;
use crate::classify::Verdict;
use crate::detection::config::LocalizationConfig;
use crate::detection::{Detection, DetectionSource};
use crate::reference::{FeatureExtractor, Features, ReferenceAppearance, ReferenceLibrary};
use crate::utils::ImageUtils;
use crate::Result;
use log::debug;
use opencv::{
    calib3d,
    core::{self, DMatch, Mat, Point2f, Size, Vector},
    imgproc::{self, INTER_AREA},
    prelude::*,
};

pub struct FeatureLocalizer<'a> {
    library: &'a ReferenceLibrary,
    extractor: FeatureExtractor,
    config: LocalizationConfig,
}

impl<'a> FeatureLocalizer<'a> {
    pub fn new(library: &'a ReferenceLibrary, config: &LocalizationConfig) -> Result<Self> {
        let extractor = FeatureExtractor::new(library.feature_config(), config.frame_features)?;
        Ok(Self {
            library,
            extractor,
            config: config.clone(),
        })
    }

    /// Find instances of every reference in a grayscale frame.
    ///
    /// Boxes are returned in the coordinates of `gray`, scored by inlier count.
    pub fn localize(&mut self, gray: &Mat) -> Result<Vec<Detection>> {
        let (frame, upscale) = self.downscale(gray)?;
        let prepared = self.extractor.preprocess(&frame)?;
        let features = self.extractor.extract(&prepared)?;
        if features.len() < self.config.min_frame_keypoints {
            debug!("Frame has only {} keypoints, skipping localization", features.len());
            return Ok(Vec::new());
        }

        let frame_bounds = ImageUtils::bounds(&frame);
        let full_bounds = ImageUtils::bounds(gray);
        let mut detections = Vec::new();

        for appearance in self.library.iter() {
            let matches = self.extractor.ratio_matches(&appearance.features, &features)?;
            if matches.len() < self.config.min_good_matches {
                debug!("Reference '{}': {} good matches, skipped", appearance.label, matches.len());
                continue;
            }

            for (bbox, inliers) in self.instances(appearance, &features, matches, &frame_bounds)? {
                let bbox = bbox
                    .scale(upscale)
                    .clamp_to(&full_bounds)
                    .with_label(appearance.label)
                    .with_confidence(inliers as f64);
                detections.push(Detection {
                    bbox,
                    verdict: Verdict::Accepted {
                        label: appearance.label,
                        score: inliers,
                    },
                    scores: None,
                    source: DetectionSource::Localization,
                });
            }
        }

        debug!("Localized {} instances", detections.len());
        Ok(detections)
    }

    /// Repeatedly fit a homography, keep its projected box and drop its inliers
    fn instances(
        &self,
        appearance: &ReferenceAppearance,
        frame: &Features,
        mut remaining: Vec<DMatch>,
        bounds: &BBox,
    ) -> Result<Vec<(BBox, usize)>> {
        let cfg = &self.config;
        let max_area = bounds.area() * cfg.max_box_fraction;
        let mut found = Vec::new();

        for _ in 0..cfg.max_instances {
            if remaining.len() < cfg.min_good_matches {
                break;
            }

            let mut src = Vector::<Point2f>::with_capacity(remaining.len());
            let mut dst = Vector::<Point2f>::with_capacity(remaining.len());
            for m in &remaining {
                src.push(appearance.features.keypoints.get(m.query_idx as usize)?.pt());
                dst.push(frame.keypoints.get(m.train_idx as usize)?.pt());
            }

            let mut mask = Mat::default();
            let homography = calib3d::find_homography(
                &src,
                &dst,
                &mut mask,
                calib3d::RANSAC,
                cfg.ransac_reproj_threshold,
            )?;
            if homography.empty() || mask.empty() {
                break;
            }

            let inlier_flags = mask.data_bytes()?;
            let inliers = inlier_flags.iter().filter(|&&v| v != 0).count();
            if inliers < cfg.min_inliers {
                break;
            }

            let bbox = Self::project_bounds(appearance, &homography, bounds)?;
            remaining = remaining
                .into_iter()
                .zip(inlier_flags.iter())
                .filter(|(_, flag)| **flag == 0)
                .map(|(m, _)| m)
                .collect();

            if bbox.area() < cfg.min_box_area || bbox.area() > max_area {
                debug!(
                    "Reference '{}': dropped projected box {}x{} with {} inliers",
                    appearance.label, bbox.width, bbox.height, inliers
                );
                continue;
            }
            found.push((bbox, inliers));
        }

        Ok(found)
    }

    /// Axis-aligned bounds of the reference outline mapped through `homography`,
    /// clipped to `frame`
    fn project_bounds(
        appearance: &ReferenceAppearance,
        homography: &Mat,
        frame: &BBox,
    ) -> Result<BBox> {
        let (w, h) = (appearance.width() as f32, appearance.height() as f32);
        let corners = Vector::<Point2f>::from_iter([
            Point2f::new(0.0, 0.0),
            Point2f::new(w, 0.0),
            Point2f::new(w, h),
            Point2f::new(0.0, h),
        ]);
        let mut projected = Vector::<Point2f>::new();
        core::perspective_transform(&corners, &mut projected, homography)?;
        Ok(Self::enclosing_box(projected.iter(), frame))
    }

    /// Smallest box holding `points`, clipped to `frame` before any integer
    /// conversion. Near-degenerate homographies send corners far outside the
    /// frame.
    fn enclosing_box<I: IntoIterator<Item = Point2f>>(points: I, frame: &BBox) -> BBox {
        let (mut x1, mut y1) = (f32::INFINITY, f32::INFINITY);
        let (mut x2, mut y2) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for p in points {
            x1 = x1.min(p.x);
            y1 = y1.min(p.y);
            x2 = x2.max(p.x);
            y2 = y2.max(p.y);
        }
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return BBox::new(frame.x, frame.y, 0, 0, 0.0);
        }

        let (left, top) = (frame.x as f32, frame.y as f32);
        let (right, bottom) = (frame.right() as f32, frame.bottom() as f32);
        let x = x1.floor().clamp(left, right) as i32;
        let y = y1.floor().clamp(top, bottom) as i32;
        let r = x2.ceil().clamp(left, right) as i32;
        let b = y2.ceil().clamp(top, bottom) as i32;
        BBox::new(x, y, (r - x).max(0), (b - y).max(0), 0.0)
    }

    /// Shrink frames larger than `max_dim`; returns the frame and the factor back to full size
    fn downscale(&self, gray: &Mat) -> Result<(Mat, f64)> {
        let longest = gray.cols().max(gray.rows());
        if longest <= self.config.max_dim {
            return Ok((gray.try_clone()?, 1.0));
        }

        let factor = self.config.max_dim as f64 / longest as f64;
        let size = Size::new(
            ((gray.cols() as f64 * factor).round() as i32).max(1),
            ((gray.rows() as f64 * factor).round() as i32).max(1),
        );
        let mut small = Mat::default();
        imgproc::resize(gray, &mut small, size, 0.0, 0.0, INTER_AREA)?;
        debug!(
            "Downscaled {}x{} frame to {}x{}",
            gray.cols(),
            gray.rows(),
            size.width,
            size.height
        );
        Ok((small, longest as f64 / self.config.max_dim as f64))
    }
}
