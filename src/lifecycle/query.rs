//! Query interface for version selection

use super::stages::LifecycleStage;
use super::version::{Dataset, DatasetVersion};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query builder for selecting dataset versions.
///
/// Priority when several selectors are set: `version_id`, then `raw`, then
/// `stage` (latest version in that stage). With none set the latest version
/// of the dataset is selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionQuery {
    pub version_id: Option<Uuid>,
    pub stage: Option<LifecycleStage>,
    #[serde(default)]
    pub raw: bool,
}

impl VersionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version_id(mut self, id: Uuid) -> Self {
        self.version_id = Some(id);
        self
    }

    pub fn stage(mut self, stage: LifecycleStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    /// Execute the query against a dataset
    pub fn execute(&self, dataset: &Dataset) -> Result<DatasetVersion> {
        if let Some(id) = self.version_id {
            return dataset.get_version(&id);
        }

        if self.raw {
            return dataset.get_version(&dataset.raw_version_id());
        }

        let found = match self.stage {
            Some(stage) => dataset.versions.latest_in_stage(stage),
            None => dataset.versions.latest(),
        };

        found.cloned().ok_or_else(|| {
            Error::Stage(format!(
                "no version of dataset {} in stage {}",
                dataset.id(),
                self.stage.map_or("any", LifecycleStage::as_str)
            ))
        })
    }
}
