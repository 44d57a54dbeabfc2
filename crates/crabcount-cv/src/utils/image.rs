//! Image processing utilities using opencv-match conversions

use crate::bbox::BBox;
use crate::error::CrabError;
use crate::Result;
use anyhow::Context;
use opencv::{
    core::{Mat, CV_8U},
    imgproc::{self, COLOR_GRAY2RGB, COLOR_RGB2GRAY, COLOR_RGBA2GRAY, COLOR_RGBA2RGB},
    prelude::*,
};
use opencv_match::prelude::*;
use std::path::Path;

/// Image utility functions leveraging opencv-match conversions
pub struct ImageUtils;

impl ImageUtils {
    /// Decode an image file into an RGB raster
    pub fn decode_rgb<P: AsRef<Path>>(path: P) -> Result<image::RgbImage> {
        let path = path.as_ref();
        let img = image::open(path).map_err(|source| CrabError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(img.to_rgb8())
    }

    /// Load image as color Mat (RGB channel order) using opencv-match
    pub fn load_color<P: AsRef<Path>>(path: P) -> Result<Mat> {
        let rgb = Self::decode_rgb(path)?;
        Self::rgb_to_mat(&rgb)
    }

    /// Encode an RGB raster; the format follows the file extension
    pub fn save_rgb<P: AsRef<Path>>(image: &image::RgbImage, path: P) -> Result<()> {
        let path = path.as_ref();
        image.save(path).map_err(|source| CrabError::Encode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Convert image::RgbImage to OpenCV Mat using opencv-match
    pub fn rgb_to_mat(rgb_image: &image::RgbImage) -> Result<Mat> {
        let mat: Mat = rgb_image
            .try_into_cv()
            .context("Failed to convert RGB image to OpenCV Mat")?;
        Ok(mat)
    }

    /// Convert OpenCV Mat to image::RgbImage using opencv-match
    pub fn mat_to_rgb(mat: &Mat) -> Result<image::RgbImage> {
        let color = Self::to_color(mat)?;
        let rgb: image::RgbImage = color
            .try_into_cv()
            .context("Failed to convert OpenCV Mat to RGB image")?;
        Ok(rgb)
    }

    /// Single-channel 8-bit view of any 1, 3 or 4 channel image
    pub fn to_gray(image: &Mat) -> Result<Mat> {
        Self::ensure_8bit(image)?;
        let code = match image.channels() {
            1 => return Ok(image.try_clone()?),
            3 => COLOR_RGB2GRAY,
            4 => COLOR_RGBA2GRAY,
            n => return Err(CrabError::Config(format!("unsupported channel count {}", n))),
        };

        let mut gray = Mat::default();
        imgproc::cvt_color_def(image, &mut gray, code)?;
        Ok(gray)
    }

    /// Three-channel copy of any 1, 3 or 4 channel image, for drawing
    pub fn to_color(image: &Mat) -> Result<Mat> {
        Self::ensure_8bit(image)?;
        let code = match image.channels() {
            3 => return Ok(image.try_clone()?),
            1 => COLOR_GRAY2RGB,
            4 => COLOR_RGBA2RGB,
            n => return Err(CrabError::Config(format!("unsupported channel count {}", n))),
        };

        let mut color = Mat::default();
        imgproc::cvt_color_def(image, &mut color, code)?;
        Ok(color)
    }

    /// Owned copy of the pixels under `bbox`, clamped to the image
    pub fn crop(image: &Mat, bbox: &BBox) -> Result<Mat> {
        let bounds = Self::bounds(image);
        let clamped = bbox.clamp_to(&bounds);
        if clamped.is_empty() {
            return Ok(Mat::default());
        }
        let view = Mat::roi(image, clamped.to_rect())?;
        Ok(view.try_clone()?)
    }

    /// The full extent of an image as a box at the origin
    pub fn bounds(image: &Mat) -> BBox {
        BBox::new(0, 0, image.cols(), image.rows(), 0.0)
    }

    fn ensure_8bit(image: &Mat) -> Result<()> {
        if image.empty() {
            return Err(CrabError::Config("empty image".to_string()));
        }
        if image.depth() != CV_8U {
            return Err(CrabError::Config(format!(
                "expected an 8-bit image, got depth {}",
                image.depth()
            )));
        }
        Ok(())
    }
}
