use crabcount_core::ClassLabel;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the detection core.
///
/// Only `ReferenceLoad` (startup) and `Decode` (per image) are expected in
/// normal operation. "Nothing found" outcomes are never errors.
#[derive(Debug, Error)]
pub enum CrabError {
    #[error("Failed to load reference '{label}' from {path:?}: {reason}")]
    ReferenceLoad {
        label: ClassLabel,
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to decode image {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode image {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error(transparent)]
    Conversion(#[from] anyhow::Error),
}

impl CrabError {
    /// True for failures that only concern the current image; a batch should
    /// report them and move on.
    pub fn is_per_image(&self) -> bool {
        matches!(self, CrabError::Decode { .. } | CrabError::Encode { .. })
    }
}
