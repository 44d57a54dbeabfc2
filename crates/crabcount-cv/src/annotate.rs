//! Rendering of accepted target detections and the run report

use crate::board::BoardRegion;
use crate::detection::config::VisualizationConfig;
use crate::detection::{Detection, RunStage};
use crate::utils::ImageUtils;
use crate::Result;
use opencv::{
    core::{Mat, Point, Scalar},
    imgproc::{self, FONT_HERSHEY_SIMPLEX, LINE_8, LINE_AA},
    prelude::*,
};
use serde::Serialize;
use std::path::Path;

/// Terminal output of one run. Immutable once built.
#[derive(Debug, Serialize)]
pub struct DetectionReport {
    detections: Vec<Detection>,
    total_count: usize,
    #[serde(skip)]
    annotated: Mat,
    stages: Vec<RunStage>,
    board: Option<BoardRegion>,
}

impl DetectionReport {
    /// Accepted Target detections, in reading order
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// Annotated copy of the input, same size, three channels in RGB order
    pub fn annotated(&self) -> &Mat {
        &self.annotated
    }

    pub fn stages(&self) -> &[RunStage] {
        &self.stages
    }

    pub fn board(&self) -> Option<&BoardRegion> {
        self.board.as_ref()
    }

    pub fn to_rgb(&self) -> Result<image::RgbImage> {
        ImageUtils::mat_to_rgb(&self.annotated)
    }

    pub fn save_annotated<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        ImageUtils::save_rgb(&self.to_rgb()?, path)
    }

    /// Write the report, without the raster, as pretty JSON
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub(crate) fn with_run(mut self, board: Option<BoardRegion>, stages: Vec<RunStage>) -> Self {
        self.board = board;
        self.stages = stages;
        self
    }
}

pub struct Annotator {
    config: VisualizationConfig,
}

impl Annotator {
    pub fn new(config: VisualizationConfig) -> Self {
        Self { config }
    }

    /// Draw boxes for accepted Target detections on a copy of `image` and
    /// overlay their count. `image` is left untouched.
    pub fn render(&self, image: &Mat, detections: &[Detection]) -> Result<DetectionReport> {
        let targets: Vec<Detection> =
            detections.iter().filter(|d| d.is_target()).cloned().collect();
        let mut output = ImageUtils::to_color(image)?;

        let (r, g, b) = self.config.box_rgb;
        let color = Scalar::new(r as f64, g as f64, b as f64, 0.0);

        for detection in &targets {
            let bbox = &detection.bbox;
            let thickness = self.config.thickness;
            imgproc::rectangle(&mut output, bbox.to_rect(), color, thickness, LINE_8, 0)?;

            if self.config.show_scores {
                let y = if bbox.y > 30 { bbox.y - 10 } else { bbox.y + 25 };
                imgproc::put_text(
                    &mut output,
                    &format!("{:.0}", detection.score()),
                    Point::new(bbox.x, y),
                    FONT_HERSHEY_SIMPLEX,
                    self.config.font_scale * 0.6,
                    color,
                    2,
                    LINE_AA,
                    false,
                )?;
            }
        }

        let total_count = targets.len();
        imgproc::put_text(
            &mut output,
            &format!("{}: {}", self.config.count_label, total_count),
            Point::new(20, 45),
            FONT_HERSHEY_SIMPLEX,
            self.config.font_scale,
            color,
            self.config.thickness,
            LINE_AA,
            false,
        )?;

        Ok(DetectionReport {
            detections: targets,
            total_count,
            annotated: output,
            stages: Vec::new(),
            board: None,
        })
    }
}
