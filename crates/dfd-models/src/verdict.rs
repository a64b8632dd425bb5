//! Verdict labels produced by an analysis.
//!
//! - `Fake`: the fake ratio reached the decision threshold
//! - `Real`: at least one block was scored and the ratio stayed below it
//! - `Unknown`: too few face crops to form a single temporal block

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Final label of a detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Fake,
    Real,
    /// Not enough usable faces were extracted to score the video.
    #[default]
    Unknown,
}

impl Verdict {
    /// All verdicts.
    pub const ALL: &'static [Verdict] = &[Verdict::Fake, Verdict::Real, Verdict::Unknown];

    /// Returns the label as it appears in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Fake => "FAKE",
            Verdict::Real => "REAL",
            Verdict::Unknown => "UNKNOWN",
        }
    }

    /// Returns true for the `Fake` label.
    pub fn is_fake(&self) -> bool {
        matches!(self, Verdict::Fake)
    }

    /// Returns true when the video could actually be scored.
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, Verdict::Unknown)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = VerdictParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fake" => Ok(Verdict::Fake),
            "real" => Ok(Verdict::Real),
            "unknown" => Ok(Verdict::Unknown),
            _ => Err(VerdictParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown verdict: {0}")]
pub struct VerdictParseError(String);
