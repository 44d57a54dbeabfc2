use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::species::label::ClassLabel;

/// A species the detector knows about, and where its reference photo lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    pub label: ClassLabel,
    pub name: String,
    pub rgb: (u8, u8, u8),
    /// File name of the reference photo, relative to the reference directory.
    pub reference_file: String,
}

/// Exactly one [`Species`] per [`ClassLabel`], indexed by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    species: [Species; 3],
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            species: [
                Species {
                    label: ClassLabel::Target,
                    name: "European Green Crab".to_string(),
                    rgb: (0, 255, 0),
                    reference_file: "European Green Crab Image.jpg".to_string(),
                },
                Species {
                    label: ClassLabel::Confusable1,
                    name: "Native Rock Crab".to_string(),
                    rgb: (255, 140, 0),
                    reference_file: "Native Rock Crab.jpg".to_string(),
                },
                Species {
                    label: ClassLabel::Confusable2,
                    name: "Jonah Crab".to_string(),
                    rgb: (255, 0, 0),
                    reference_file: "Jonah crab 2.png".to_string(),
                },
            ],
        }
    }
}

impl Roster {
    /// Load a roster manifest.
    ///
    /// One species per line, `key\-Display Name\-R,G,B\-file name`. Blank
    /// lines and `#` comments are skipped; lines with the wrong number of
    /// fields are skipped with a warning. All three labels must be present.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Roster> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
        let reader = BufReader::new(file);

        let mut slots: [Option<Species>; 3] = [None, None, None];

        for (line_num, line) in reader.lines().enumerate() {
            let line = line
                .with_context(|| format!("Failed to read line {} from {:?}", line_num + 1, path))?;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = trimmed.split(r"\-").map(|s| s.trim()).collect();
            if parts.len() != 4 {
                warn!(
                    "Invalid line format at line {}: '{}' (expected 4 parts separated by \\-)",
                    line_num + 1,
                    line
                );
                continue;
            }

            let label: ClassLabel = parts[0]
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Invalid class key at line {}", line_num + 1))?;
            let rgb = parse_rgb(parts[2]).with_context(|| {
                format!("Invalid color at line {}: '{}'", line_num + 1, parts[2])
            })?;

            let slot = &mut slots[label.index()];
            if slot.is_some() {
                bail!("Species '{}' is listed twice (line {})", label, line_num + 1);
            }
            *slot = Some(Species {
                label,
                name: parts[1].to_string(),
                rgb,
                reference_file: parts[3].to_string(),
            });
        }

        let [target, rock, jonah] = slots;
        let species = [
            target.with_context(|| format!("Roster {:?} has no entry for 'green'", path))?,
            rock.with_context(|| format!("Roster {:?} has no entry for 'rock'", path))?,
            jonah.with_context(|| format!("Roster {:?} has no entry for 'jonah'", path))?,
        ];

        info!("Loaded species roster from {:?}", path);
        Ok(Roster { species })
    }

    pub fn get(&self, label: ClassLabel) -> &Species {
        &self.species[label.index()]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Species> {
        self.species.iter()
    }

    pub fn target(&self) -> &Species {
        self.get(ClassLabel::Target)
    }
}

fn parse_rgb(text: &str) -> Result<(u8, u8, u8)> {
    let channels: Vec<&str> = text.split(',').map(|s| s.trim()).collect();
    if channels.len() != 3 {
        bail!("expected R,G,B");
    }

    let red = channels[0]
        .parse::<u8>()
        .with_context(|| format!("bad red value '{}'", channels[0]))?;
    let green = channels[1]
        .parse::<u8>()
        .with_context(|| format!("bad green value '{}'", channels[1]))?;
    let blue = channels[2]
        .parse::<u8>()
        .with_context(|| format!("bad blue value '{}'", channels[2]))?;

    Ok((red, green, blue))
}
