//! Synthetic boards and specimens for unit tests

use crate::reference::{FeatureConfig, ReferenceLibrary};
use crate::Result;
use crabcount_core::{ClassLabel, Roster};
use opencv::{
    core::{Mat, Rect, Scalar, CV_8UC1},
    imgproc,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const BOARD: u8 = 230;
pub const CELL: i32 = 10;
pub const CELLS: i32 = 16;
/// Side of the textured body of a specimen
pub const BODY: i32 = CELL * CELLS;
/// Bright border around the body in reference photos
pub const FRAME: i32 = 40;

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

/// Dark random block texture standing in for one species' carapace
pub fn paint_body(image: &mut Mat, x0: i32, y0: i32, seed: u64, rotated: bool) {
    let mut rng = StdRng::seed_from_u64(seed);
    for r in 0..CELLS {
        for c in 0..CELLS {
            let value: u8 = rng.gen_range(0..=110);
            // 90 degree clockwise turn of the cell grid
            let (row, col) = if rotated { (c, CELLS - 1 - r) } else { (r, c) };
            fill_rect(image, x0 + col * CELL, y0 + row * CELL, CELL, CELL, value);
        }
    }
}

/// A reference-style photo: one body centered on a bright frame
pub fn specimen(seed: u64, rotated: bool) -> Mat {
    let side = BODY + 2 * FRAME;
    let mut image = flat(side, side, BOARD);
    paint_body(&mut image, FRAME, FRAME, seed, rotated);
    image
}

pub const TARGET_SEED: u64 = 1;
pub const ROCK_SEED: u64 = 2;
pub const JONAH_SEED: u64 = 3;

pub fn library() -> Result<ReferenceLibrary> {
    ReferenceLibrary::from_images(
        vec![
            (ClassLabel::Target, specimen(TARGET_SEED, false)),
            (ClassLabel::Confusable1, specimen(ROCK_SEED, false)),
            (ClassLabel::Confusable2, specimen(JONAH_SEED, false)),
        ],
        &Roster::default(),
        &FeatureConfig::default(),
    )
}
