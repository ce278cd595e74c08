//! Lifecycle stages and publish modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle stages for a dataset, in processing order.
///
/// The derived ordering follows declaration order, so `Raw < Profiled < ... < Published`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LifecycleStage {
    /// Raw ingestion - immutable original data
    Raw,
    /// Profiled - analysis complete, data usually unchanged
    Profiled,
    /// Cleaned - deterministic text/type transformations applied
    Cleaned,
    /// Advanced - ML preprocessing (imputation, outliers, encoding)
    Advanced,
    /// Validated - QA gates passed
    Validated,
    /// Published - finalized as view or snapshot
    Published,
}

impl LifecycleStage {
    pub const ALL: [Self; 6] = [
        Self::Raw,
        Self::Profiled,
        Self::Cleaned,
        Self::Advanced,
        Self::Validated,
        Self::Published,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "Raw",
            Self::Profiled => "Profiled",
            Self::Cleaned => "Cleaned",
            Self::Advanced => "Advanced",
            Self::Validated => "Validated",
            Self::Published => "Published",
        }
    }

    /// Case-insensitive parse
    pub fn parse_stage(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Get the next logical stage in the pipeline
    pub fn next_stage(self) -> Option<Self> {
        match self {
            Self::Raw => Some(Self::Profiled),
            Self::Profiled => Some(Self::Cleaned),
            Self::Cleaned => Some(Self::Advanced),
            Self::Advanced => Some(Self::Validated),
            Self::Validated => Some(Self::Published),
            Self::Published => None,
        }
    }

    /// Whether a child at `target` may be derived from a version at this stage.
    ///
    /// Children never go back in the lifecycle, but may stay at the same stage
    /// (e.g. a second `Cleaned` variant of a `Cleaned` version). `Raw` only
    /// exists as the root of a dataset.
    pub fn can_branch_to(self, target: Self) -> bool {
        target != Self::Raw && target >= self
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_stage(s).ok_or_else(|| {
            format!(
                "unknown stage '{s}', expected one of: {}",
                Self::ALL.map(Self::as_str).join(", ")
            )
        })
    }
}

/// Publish mode - view vs snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// View - points at the source version's data, no copy
    View,
    /// Snapshot - independent copy materialized at publish time
    Snapshot,
}

impl PublishMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "View",
            Self::Snapshot => "Snapshot",
        }
    }
}

impl FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "view" => Ok(Self::View),
            "snapshot" => Ok(Self::Snapshot),
            _ => Err(format!("unknown publish mode '{s}', expected view or snapshot")),
        }
    }
}
