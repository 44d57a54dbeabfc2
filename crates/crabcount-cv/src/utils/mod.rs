//! Utility modules

pub mod image;
pub mod nms;

pub use image::ImageUtils;
