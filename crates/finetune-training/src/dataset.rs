use crate::error::TrainingError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which part of a dataset an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetSplit {
    /// Used to build fine-tune snapshots.
    #[default]
    Train,
    /// Held out for evaluation.
    Test,
}

impl DatasetSplit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "TRAIN",
            Self::Test => "TEST",
        }
    }
}

impl std::fmt::Display for DatasetSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSplit {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("train") {
            Ok(Self::Train)
        } else if s.eq_ignore_ascii_case("test") {
            Ok(Self::Test)
        } else {
            Err(TrainingError::UnknownSplit(s.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parses_any_case() {
        assert_eq!("TRAIN".parse::<DatasetSplit>().unwrap(), DatasetSplit::Train);
        assert_eq!("test".parse::<DatasetSplit>().unwrap(), DatasetSplit::Test);
        assert!("holdout".parse::<DatasetSplit>().is_err());
    }
}
