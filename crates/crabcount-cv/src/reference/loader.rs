//! Reference photo discovery and loading

use super::{FeatureConfig, ReferenceLibrary};
use crate::error::CrabError;
use crate::utils::image::ImageUtils;
use crate::Result;
use crabcount_core::{ClassLabel, Roster};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolves roster file names inside a reference directory
pub struct ReferenceLoader {
    reference_dir: PathBuf,
}

impl ReferenceLoader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            reference_dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Decode every roster reference and compute its features.
    ///
    /// Any missing or unreadable file is a `ReferenceLoad` error: without all
    /// three classes the confusable species cannot be suppressed.
    pub fn load_library(
        &self,
        roster: &Roster,
        config: &FeatureConfig,
    ) -> Result<ReferenceLibrary> {
        let mut entries = Vec::with_capacity(3);

        for species in roster.iter() {
            let path = self.find_reference_file(&species.reference_file)?.ok_or_else(|| {
                CrabError::ReferenceLoad {
                    label: species.label,
                    path: self.reference_dir.join(&species.reference_file),
                    reason: "file not found".to_string(),
                }
            })?;

            let image = ImageUtils::load_color(&path)
                .map_err(|e| Self::load_error(species.label, &path, e))?;
            entries.push((species.label, image, Some(path)));
        }

        let library = ReferenceLibrary::build(entries, roster, config)?;
        info!("Loaded {} references from {:?}", ClassLabel::ALL.len(), self.reference_dir);
        Ok(library)
    }

    /// Find a reference file, falling back to a case-insensitive directory scan
    pub fn find_reference_file(&self, file_name: &str) -> Result<Option<PathBuf>> {
        let path = self.reference_dir.join(file_name);
        if path.is_file() {
            return Ok(Some(path));
        }

        let entries = match fs::read_dir(&self.reference_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };
        let wanted = file_name.to_lowercase();
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy().to_lowercase() == wanted {
                return Ok(Some(entry.path()));
            }
        }

        Ok(None)
    }

    fn load_error(label: ClassLabel, path: &Path, err: CrabError) -> CrabError {
        CrabError::ReferenceLoad {
            label,
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }
}
