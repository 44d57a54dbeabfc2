//! Candidate segmentation: dark blobs on the bright board

use crate::bbox::BBox;
use crate::board::BoardRegion;
use crate::detection::config::SegmentationConfig;
use crate::utils::ImageUtils;
use crate::Result;
use log::debug;
use opencv::{
    core::{Mat, Point, Size, Vector, BORDER_CONSTANT},
    imgproc::{
        self, CHAIN_APPROX_SIMPLE, MORPH_BLACKHAT, MORPH_CLOSE, MORPH_ELLIPSE, MORPH_OPEN,
        MORPH_RECT, RETR_EXTERNAL, THRESH_BINARY, THRESH_OTSU,
    },
    prelude::*,
};
use serde::Serialize;

/// Shape measurements of a segmented blob
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShapeFeatures {
    /// Contour area in pixels
    pub area: f64,
    /// Long side over short side of the tight bounding box
    pub aspect_ratio: f64,
    /// Contour area over tight bounding box area
    pub fill_ratio: f64,
}

/// A region hypothesized to hold one organism
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Expanded box in region-local coordinates
    pub bbox: BBox,
    /// Top-left corner of the searched region in image coordinates
    pub origin: (i32, i32),
    pub shape: ShapeFeatures,
    /// Grayscale pixels under `bbox`
    pub patch: Mat,
}

impl Candidate {
    /// The candidate box in original-image coordinates
    pub fn image_bbox(&self) -> BBox {
        self.bbox.translate(self.origin.0, self.origin.1)
    }
}

pub struct CandidateSegmenter {
    config: SegmentationConfig,
}

impl CandidateSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    /// Segment candidates inside `region`, or the whole frame when there is none
    pub fn segment(&self, gray: &Mat, region: Option<&BoardRegion>) -> Result<Vec<Candidate>> {
        let frame = ImageUtils::bounds(gray);
        let area = match region {
            Some(board) => board.bounds.clamp_to(&frame),
            None => frame,
        };
        if area.is_empty() {
            return Ok(Vec::new());
        }

        let roi = ImageUtils::crop(gray, &area)?;
        let mask = self.dark_structure_mask(&roi)?;

        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            &mask,
            &mut contours,
            RETR_EXTERNAL,
            CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        let local = ImageUtils::bounds(&roi);
        let mut candidates = Vec::new();
        for contour in contours.iter() {
            let contour_area = imgproc::contour_area(&contour, false)?;
            let tight = BBox::from_rect(imgproc::bounding_rect(&contour)?, 0.0);
            let shape = ShapeFeatures {
                area: contour_area,
                aspect_ratio: tight.aspect_ratio(),
                fill_ratio: if tight.area() > 0.0 { contour_area / tight.area() } else { 0.0 },
            };

            if let Some(reason) = self.reject_reason(&tight, &shape, &local) {
                debug!(
                    "Dropped blob at ({}, {}) {}x{}: {}",
                    tight.x, tight.y, tight.width, tight.height, reason
                );
                continue;
            }

            let bbox = tight.expand(self.config.box_margin).clamp_to(&local);
            let patch = ImageUtils::crop(&roi, &bbox)?;
            candidates.push(Candidate {
                bbox,
                origin: (area.x, area.y),
                shape,
                patch,
            });
        }

        candidates.sort_by_key(|c| (c.bbox.y, c.bbox.x));
        debug!("Segmented {} candidates from {} blobs", candidates.len(), contours.len());
        Ok(candidates)
    }

    /// Black-hat response, blurred, Otsu-thresholded and cleaned up
    fn dark_structure_mask(&self, roi: &Mat) -> Result<Mat> {
        let cfg = &self.config;

        let blackhat_kernel = imgproc::get_structuring_element(
            MORPH_RECT,
            Size::new(cfg.blackhat_kernel, cfg.blackhat_kernel),
            Point::new(-1, -1),
        )?;
        let blackhat = Self::morph(roi, MORPH_BLACKHAT, &blackhat_kernel, 1)?;

        let mut blurred = Mat::default();
        let blur = Size::new(cfg.blur_kernel, cfg.blur_kernel);
        imgproc::gaussian_blur_def(&blackhat, &mut blurred, blur, 0.0)?;

        let mut binary = Mat::default();
        imgproc::threshold(&blurred, &mut binary, 0.0, 255.0, THRESH_BINARY | THRESH_OTSU)?;

        let open_kernel = imgproc::get_structuring_element(
            MORPH_ELLIPSE,
            Size::new(cfg.open_kernel, cfg.open_kernel),
            Point::new(-1, -1),
        )?;
        let opened = Self::morph(&binary, MORPH_OPEN, &open_kernel, 1)?;

        let close_kernel = imgproc::get_structuring_element(
            MORPH_ELLIPSE,
            Size::new(cfg.close_kernel, cfg.close_kernel),
            Point::new(-1, -1),
        )?;
        Self::morph(&opened, MORPH_CLOSE, &close_kernel, cfg.close_iterations)
    }

    fn morph(src: &Mat, op: i32, kernel: &Mat, iterations: i32) -> Result<Mat> {
        let mut dst = Mat::default();
        imgproc::morphology_ex(
            src,
            &mut dst,
            op,
            kernel,
            Point::new(-1, -1),
            iterations,
            BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;
        Ok(dst)
    }

    fn reject_reason(
        &self,
        tight: &BBox,
        shape: &ShapeFeatures,
        local: &BBox,
    ) -> Option<&'static str> {
        let cfg = &self.config;
        if shape.area < cfg.min_area {
            return Some("too small");
        }
        if shape.area > cfg.max_area {
            return Some("too large");
        }
        if shape.aspect_ratio > cfg.max_aspect_ratio {
            return Some("too elongated");
        }
        if shape.fill_ratio < cfg.min_fill_ratio {
            return Some("too sparse");
        }
        let m = cfg.edge_margin;
        if tight.x < m
            || tight.y < m
            || tight.right() > local.right() - m
            || tight.bottom() > local.bottom() - m
        {
            return Some("touches the region edge");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fill_rect, flat};
    use opencv::core::Scalar;

    fn small_blob_config() -> SegmentationConfig {
        SegmentationConfig {
            min_area: 200.0,
            max_area: 5000.0,
            box_margin: 4,
            ..Default::default()
        }
    }

    fn disc(image: &mut Mat, x: i32, y: i32, radius: i32, value: u8) {
        imgproc::circle(
            image,
            Point::new(x, y),
            radius,
            Scalar::all(value as f64),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
    }

    #[test]
    fn test_empty_board_has_no_candidates() -> Result<()> {
        let board = flat(300, 400, 220);
        let candidates = CandidateSegmenter::new(small_blob_config()).segment(&board, None)?;
        assert!(candidates.is_empty());
        Ok(())
    }

    #[test]
    fn test_separated_blobs_become_candidates() -> Result<()> {
        let mut board = flat(300, 400, 220);
        disc(&mut board, 80, 80, 15, 40);
        disc(&mut board, 200, 150, 15, 40);
        disc(&mut board, 320, 220, 15, 40);

        let candidates = CandidateSegmenter::new(small_blob_config()).segment(&board, None)?;
        assert_eq!(candidates.len(), 3);

        let first = &candidates[0];
        assert!(first.bbox.contains(&BBox::new(66, 66, 28, 28, 0.0)));
        assert!(first.shape.aspect_ratio < 1.2);
        assert!(first.shape.fill_ratio > 0.6);
        assert_eq!((first.patch.cols(), first.patch.rows()), (first.bbox.width, first.bbox.height));
        Ok(())
    }

    #[test]
    fn test_specks_and_thin_streaks_are_filtered() -> Result<()> {
        let mut board = flat(300, 400, 220);
        disc(&mut board, 200, 150, 15, 40);
        disc(&mut board, 60, 240, 3, 40);
        fill_rect(&mut board, 40, 40, 300, 6, 40);

        let candidates = CandidateSegmenter::new(small_blob_config()).segment(&board, None)?;
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].bbox.contains(&BBox::new(186, 136, 28, 28, 0.0)));
        Ok(())
    }

    #[test]
    fn test_candidates_are_local_to_the_region() -> Result<()> {
        let mut frame = flat(400, 500, 20);
        fill_rect(&mut frame, 50, 60, 400, 300, 220);
        disc(&mut frame, 250, 200, 15, 40);

        let region = BoardRegion {
            bounds: BBox::new(50, 60, 400, 300, 1.0),
            outline: Vec::new(),
            area_fraction: 0.6,
            brightness_score: 220.0,
        };
        let candidates =
            CandidateSegmenter::new(small_blob_config()).segment(&frame, Some(&region))?;
        assert_eq!(candidates.len(), 1);

        let candidate = &candidates[0];
        assert_eq!(candidate.origin, (50, 60));
        let in_image = candidate.image_bbox();
        assert!(in_image.contains(&BBox::new(236, 186, 28, 28, 0.0)));
        assert!(region.bounds.contains(&in_image));
        Ok(())
    }
}
