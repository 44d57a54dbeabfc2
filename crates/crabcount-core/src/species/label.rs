use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three reference appearances known in advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassLabel {
    /// The species that gets boxed and counted.
    #[serde(rename = "green")]
    Target,
    #[serde(rename = "rock")]
    Confusable1,
    #[serde(rename = "jonah")]
    Confusable2,
}

impl ClassLabel {
    pub const ALL: [ClassLabel; 3] = [
        ClassLabel::Target,
        ClassLabel::Confusable1,
        ClassLabel::Confusable2,
    ];

    pub const CONFUSABLES: [ClassLabel; 2] = [ClassLabel::Confusable1, ClassLabel::Confusable2];

    /// Short key used in manifests, logs and JSON output.
    pub fn key(&self) -> &'static str {
        match self {
            ClassLabel::Target => "green",
            ClassLabel::Confusable1 => "rock",
            ClassLabel::Confusable2 => "jonah",
        }
    }

    pub fn is_target(&self) -> bool {
        matches!(self, ClassLabel::Target)
    }

    /// Position in [`ClassLabel::ALL`], handy for fixed-size per-class tables.
    pub fn index(&self) -> usize {
        match self {
            ClassLabel::Target => 0,
            ClassLabel::Confusable1 => 1,
            ClassLabel::Confusable2 => 2,
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ClassLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "green" | "target" => Ok(ClassLabel::Target),
            "rock" | "confusable1" => Ok(ClassLabel::Confusable1),
            "jonah" | "confusable2" => Ok(ClassLabel::Confusable2),
            other => Err(format!("unknown class label '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_round_trip_through_from_str() {
        for label in ClassLabel::ALL {
            assert_eq!(label.key().parse::<ClassLabel>().unwrap(), label);
        }
        assert_eq!("Target".parse::<ClassLabel>().unwrap(), ClassLabel::Target);
        assert!("lobster".parse::<ClassLabel>().is_err());
    }

    #[test]
    fn test_only_target_is_target() {
        assert!(ClassLabel::Target.is_target());
        assert!(ClassLabel::CONFUSABLES.iter().all(|l| !l.is_target()));
    }

    #[test]
    fn test_index_matches_all_order() {
        for (i, label) in ClassLabel::ALL.iter().enumerate() {
            assert_eq!(label.index(), i);
        }
    }
}
