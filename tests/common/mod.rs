//! Synthetic boards, specimens and references shared by the integration tests
#![allow(dead_code)]

use crabcount_cv::{
    BBox, ClassLabel, CrabDetector, DetectionConfig, FeatureConfig, ReferenceLibrary, Roster,
};
use opencv::{
    core::{Mat, Rect, Scalar, CV_8UC1},
    imgproc,
    prelude::*,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::Path;
use std::sync::Arc;

pub const BOARD: u8 = 230;
pub const BACKGROUND: u8 = 20;
pub const CELL: i32 = 10;
pub const CELLS: i32 = 16;
pub const BODY: i32 = CELL * CELLS;
pub const FRAME: i32 = 40;

pub const TARGET_SEED: u64 = 1;
pub const ROCK_SEED: u64 = 2;
pub const JONAH_SEED: u64 = 3;

pub fn flat(rows: i32, cols: i32, value: u8) -> Mat {
    Mat::new_rows_cols_with_default(rows, cols, CV_8UC1, Scalar::all(value as f64)).unwrap()
}

pub fn fill_rect(image: &mut Mat, x: i32, y: i32, w: i32, h: i32, value: u8) {
    imgproc::rectangle(
        image,
        Rect::new(x, y, w, h),
        Scalar::all(value as f64),
        imgproc::FILLED,
        imgproc::LINE_8,
        0,
    )
    .unwrap();
}

/// Random dark block texture; `rotated` turns the grid 90 degrees clockwise
pub fn paint_body(image: &mut Mat, x0: i32, y0: i32, seed: u64, rotated: bool) {
    let mut rng = StdRng::seed_from_u64(seed);
    for r in 0..CELLS {
        for c in 0..CELLS {
            let value: u8 = rng.gen_range(0..=110);
            let (row, col) = if rotated { (c, CELLS - 1 - r) } else { (r, c) };
            fill_rect(image, x0 + col * CELL, y0 + row * CELL, CELL, CELL, value);
        }
    }
}

pub fn specimen(seed: u64) -> Mat {
    let side = BODY + 2 * FRAME;
    let mut image = flat(side, side, BOARD);
    paint_body(&mut image, FRAME, FRAME, seed, false);
    image
}

pub fn library() -> Arc<ReferenceLibrary> {
    let library = ReferenceLibrary::from_images(
        vec![
            (ClassLabel::Target, specimen(TARGET_SEED)),
            (ClassLabel::Confusable1, specimen(ROCK_SEED)),
            (ClassLabel::Confusable2, specimen(JONAH_SEED)),
        ],
        &Roster::default(),
        &FeatureConfig::default(),
    )
    .unwrap();
    Arc::new(library)
}

/// A 1000x800 photo: dark surroundings and a bright board at (40, 40)
pub fn empty_board() -> Mat {
    let mut scene = flat(800, 1000, BACKGROUND);
    fill_rect(&mut scene, 40, 40, 920, 720, BOARD);
    scene
}

/// Where specimens are placed on the board
pub struct Placement {
    pub x: i32,
    pub y: i32,
    pub seed: u64,
    pub rotated: bool,
}

impl Placement {
    pub fn body(&self) -> BBox {
        BBox::new(self.x, self.y, BODY, BODY, 0.0)
    }
}

/// Two targets, one of them rotated, and one rock crab
pub fn two_targets_one_rock() -> (Mat, Vec<Placement>) {
    let placements = vec![
        Placement { x: 150, y: 150, seed: TARGET_SEED, rotated: false },
        Placement { x: 600, y: 150, seed: TARGET_SEED, rotated: true },
        Placement { x: 380, y: 480, seed: ROCK_SEED, rotated: false },
    ];
    let mut scene = empty_board();
    for p in &placements {
        paint_body(&mut scene, p.x, p.y, p.seed, p.rotated);
    }
    (scene, placements)
}

/// Segmentation tuned to the synthetic specimen size
pub fn scene_config() -> DetectionConfig {
    let mut config = DetectionConfig::default();
    config.segmentation.blackhat_kernel = 181;
    config.segmentation.min_area = 10000.0;
    config.segmentation.max_area = 40000.0;
    config.segmentation.box_margin = FRAME;
    config
}

pub fn detector(config: DetectionConfig) -> CrabDetector {
    CrabDetector::new(config, library()).unwrap()
}

pub fn write_png(mat: &Mat, path: &Path) {
    let (w, h) = (mat.cols() as u32, mat.rows() as u32);
    let bytes = mat.data_bytes().unwrap().to_vec();
    image::GrayImage::from_raw(w, h, bytes).unwrap().save(path).unwrap();
}
