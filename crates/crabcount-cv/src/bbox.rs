//! Axis-aligned bounding boxes
//!
//! Boxes are axis-aligned, integer pixel rectangles `(x, y, width, height)`
//! with an attached score. Every stage of the pipeline speaks in this type.

use crabcount_core::ClassLabel;
use opencv::core::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Represents a bounding box detection with associated metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f64,
    pub label: Option<ClassLabel>,
}

impl BBox {
    /// Create a new bounding box
    pub fn new(x: i32, y: i32, width: i32, height: i32, confidence: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            label: None,
        }
    }

    /// Create from OpenCV Rect
    pub fn from_rect(rect: Rect, confidence: f64) -> Self {
        Self::new(rect.x, rect.y, rect.width, rect.height, confidence)
    }

    /// Convert to OpenCV Rect
    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Calculate area of the bounding box
    pub fn area(&self) -> f64 {
        (self.width.max(0) as f64) * (self.height.max(0) as f64)
    }

    /// Calculate center point
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Long side over short side; 1.0 for squares, infinity for degenerate boxes.
    pub fn aspect_ratio(&self) -> f64 {
        let long = self.width.max(self.height) as f64;
        let short = self.width.min(self.height) as f64;
        if short <= 0.0 { f64::INFINITY } else { long / short }
    }

    /// Calculate intersection over union (IoU) with another box
    pub fn iou(&self, other: &BBox) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = ((x2 - x1) as f64) * ((y2 - y1) as f64);
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 { 0.0 } else { intersection / union }
    }

    /// Check if this box overlaps with another
    pub fn overlaps(&self, other: &BBox, threshold: f64) -> bool {
        self.iou(other) >= threshold
    }

    /// True when `other` lies entirely inside this box
    pub fn contains(&self, other: &BBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Set class information
    pub fn with_label(mut self, label: ClassLabel) -> Self {
        self.label = Some(label);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Shift by an offset, e.g. from board-local to image coordinates
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self.clone()
        }
    }

    /// Grow by `margin` pixels on every side
    pub fn expand(&self, margin: i32) -> Self {
        Self {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2 * margin,
            height: self.height + 2 * margin,
            ..self.clone()
        }
    }

    /// Intersect with `bounds`; the result may be empty (zero width or height)
    pub fn clamp_to(&self, bounds: &BBox) -> Self {
        let x1 = self.x.clamp(bounds.x, bounds.right());
        let y1 = self.y.clamp(bounds.y, bounds.bottom());
        let x2 = self.right().clamp(bounds.x, bounds.right());
        let y2 = self.bottom().clamp(bounds.y, bounds.bottom());
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            ..self.clone()
        }
    }

    /// Scale all coordinates, rounding outward so the box never shrinks
    pub fn scale(&self, factor: f64) -> Self {
        let x1 = (self.x as f64 * factor).floor() as i32;
        let y1 = (self.y as f64 * factor).floor() as i32;
        let x2 = (self.right() as f64 * factor).ceil() as i32;
        let y2 = (self.bottom() as f64 * factor).ceil() as i32;
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            ..self.clone()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}
