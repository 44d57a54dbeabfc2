//! Batch processing of a samples directory

use crabcount_cv::{ClassLabel, CrabDetector, CrabError};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};

const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct BatchOptions {
    pub out_dir: PathBuf,
    pub write_json: bool,
}

/// Result of one successfully processed image
#[derive(Debug)]
pub struct ImageOutcome {
    pub input: PathBuf,
    pub count: usize,
    pub annotated: PathBuf,
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub total_targets: usize,
}

/// Supported images directly inside `dir`, sorted by file name
pub fn discover_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    use anyhow::Context;

    let mut images = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read samples directory {:?}", dir))?;
    for entry in entries {
        let path = entry?.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if path.is_file() && supported {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// `<stem>_annotated.png` and `<stem>_detections.json` inside `out_dir`
pub fn output_paths(out_dir: &Path, input: &Path) -> (PathBuf, PathBuf) {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    (
        out_dir.join(format!("{stem}_annotated.png")),
        out_dir.join(format!("{stem}_detections.json")),
    )
}

pub fn process_image(
    detector: &CrabDetector,
    input: &Path,
    options: &BatchOptions,
) -> crabcount_cv::Result<ImageOutcome> {
    let report = detector.report_file(input)?;
    let (annotated, json) = output_paths(&options.out_dir, input);

    report.save_annotated(&annotated)?;
    if options.write_json {
        report.export_json(&json)?;
    }

    Ok(ImageOutcome {
        input: input.to_path_buf(),
        count: report.total_count(),
        annotated,
    })
}

/// Process every image; a failed image is logged and the batch goes on
pub fn run_batch(
    detector: &CrabDetector,
    images: &[PathBuf],
    options: &BatchOptions,
) -> BatchSummary {
    #[cfg(feature = "parallel")]
    let results: Vec<_> = {
        use rayon::prelude::*;
        images
            .par_iter()
            .map(|path| (path, process_image(detector, path, options)))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<_> = images
        .iter()
        .map(|path| (path, process_image(detector, path, options)))
        .collect();

    let mut summary = BatchSummary::default();
    for (path, result) in results {
        let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        match result {
            Ok(outcome) => {
                println!(
                    "{}: {}={} -> {}",
                    name,
                    ClassLabel::Target.key(),
                    outcome.count,
                    outcome.annotated.display()
                );
                summary.processed += 1;
                summary.total_targets += outcome.count;
            }
            Err(e) => {
                report_failure(path, &e);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Batch done: {} processed, {} failed, {} target(s)",
        summary.processed, summary.failed, summary.total_targets
    );
    summary
}

fn report_failure(path: &Path, err: &CrabError) {
    if err.is_per_image() {
        error!("Skipping {:?}: {}", path, err);
    } else {
        error!("Processing {:?} failed: {}", path, err);
    }
}
