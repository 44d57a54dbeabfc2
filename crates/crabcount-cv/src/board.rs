//! Board location: the largest bright connected region of the frame

use crate::bbox::BBox;
use crate::detection::config::BoardConfig;
use crate::traits::BoardLocator;
use crate::utils::ImageUtils;
use crate::Result;
use log::debug;
use opencv::{
    core::{self, Mat, Point, Size, Vector, BORDER_CONSTANT},
    imgproc::{self, CHAIN_APPROX_SIMPLE, MORPH_CLOSE, MORPH_RECT, RETR_EXTERNAL, THRESH_BINARY},
    prelude::*,
};
use serde::Serialize;

/// The located board, in image coordinates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardRegion {
    /// Axis-aligned bounds of the board outline
    pub bounds: BBox,
    /// Simplified outline polygon
    pub outline: Vec<(i32, i32)>,
    /// Outline area over frame area
    pub area_fraction: f64,
    /// Mean luminance inside `bounds`
    pub brightness_score: f64,
}

impl BoardRegion {
    pub fn origin(&self) -> (i32, i32) {
        (self.bounds.x, self.bounds.y)
    }
}

/// Threshold the luminance, close small gaps, keep the biggest outline
#[derive(Debug, Clone, Default)]
pub struct LargestBrightRegion {
    config: BoardConfig,
}

impl LargestBrightRegion {
    pub fn new(config: BoardConfig) -> Self {
        Self { config }
    }

    /// Binary mask of board-bright pixels after closing
    fn bright_mask(&self, gray: &Mat) -> Result<Mat> {
        let mut bw = Mat::default();
        imgproc::threshold(gray, &mut bw, self.config.brightness_threshold, 255.0, THRESH_BINARY)?;

        let k = self.config.close_kernel;
        let kernel =
            imgproc::get_structuring_element(MORPH_RECT, Size::new(k, k), Point::new(-1, -1))?;
        let mut closed = Mat::default();
        imgproc::morphology_ex(
            &bw,
            &mut closed,
            MORPH_CLOSE,
            &kernel,
            Point::new(-1, -1),
            self.config.close_iterations,
            BORDER_CONSTANT,
            imgproc::morphology_default_border_value()?,
        )?;
        Ok(closed)
    }
}

impl BoardLocator for LargestBrightRegion {
    fn locate(&self, gray: &Mat) -> Result<Option<BoardRegion>> {
        let frame_area = (gray.rows() as f64) * (gray.cols() as f64);
        if frame_area <= 0.0 {
            return Ok(None);
        }

        let mask = self.bright_mask(gray)?;
        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            &mask,
            &mut contours,
            RETR_EXTERNAL,
            CHAIN_APPROX_SIMPLE,
            Point::new(0, 0),
        )?;

        let mut largest: Option<(f64, Vector<Point>)> = None;
        for contour in contours.iter() {
            let area = imgproc::contour_area(&contour, false)?;
            if largest.as_ref().is_none_or(|(best, _)| area > *best) {
                largest = Some((area, contour));
            }
        }

        let Some((area, contour)) = largest else {
            debug!("No bright region above {}", self.config.brightness_threshold);
            return Ok(None);
        };

        let area_fraction = area / frame_area;
        if area_fraction < self.config.min_area_fraction {
            debug!(
                "Largest bright region covers {:.1}% of the frame, below {:.1}%",
                area_fraction * 100.0,
                self.config.min_area_fraction * 100.0
            );
            return Ok(None);
        }

        let rect = imgproc::bounding_rect(&contour)?;
        let bounds = BBox::from_rect(rect, area_fraction).clamp_to(&ImageUtils::bounds(gray));
        let board_pixels = ImageUtils::crop(gray, &bounds)?;
        let brightness_score = core::mean(&board_pixels, &core::no_array())?[0];
        let outline = contour.iter().map(|p| (p.x, p.y)).collect();

        Ok(Some(BoardRegion {
            bounds,
            outline,
            area_fraction,
            brightness_score,
        }))
    }
}
