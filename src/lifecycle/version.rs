//! Version records and the per-dataset lineage tree.

use super::stages::{LifecycleStage, PublishMode};
use super::storage::DataLocation;
use crate::error::{Error, Result};
use crate::pipeline::{GateResult, PipelineSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use uuid::Uuid;

/// Metadata associated with a dataset version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub row_count: Option<usize>,
    pub column_count: Option<usize>,
    pub file_size_bytes: Option<u64>,
    pub created_by: String,
    /// Warnings the executor raised while producing this version
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Gate results recorded when the version entered the Validated stage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_gates: Vec<GateResult>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, serde_json::Value>,
}

impl Default for VersionMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            tags: Vec::new(),
            row_count: None,
            column_count: None,
            file_size_bytes: None,
            created_by: "system".to_owned(),
            warnings: Vec::new(),
            quality_gates: Vec::new(),
            custom_fields: BTreeMap::new(),
        }
    }
}

/// A specific, immutable version of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub id: Uuid,
    pub dataset_id: Uuid,
    /// `None` only for the raw root
    pub parent_id: Option<Uuid>,
    pub stage: LifecycleStage,
    /// Pipeline that produced this version from its parent
    pub pipeline: PipelineSpec,
    pub data_location: DataLocation,
    /// Set on versions created by publishing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_mode: Option<PublishMode>,
    pub metadata: VersionMetadata,
    pub created_at: DateTime<Utc>,
}

impl DatasetVersion {
    pub fn new_raw(id: Uuid, dataset_id: Uuid, data_location: DataLocation) -> Self {
        Self {
            id,
            dataset_id,
            parent_id: None,
            stage: LifecycleStage::Raw,
            pipeline: PipelineSpec::new("raw ingestion"),
            data_location,
            publish_mode: None,
            metadata: VersionMetadata {
                description: "Raw ingestion".to_owned(),
                ..Default::default()
            },
            created_at: Utc::now(),
        }
    }

    pub fn new_derived(
        id: Uuid,
        parent: &Self,
        stage: LifecycleStage,
        pipeline: PipelineSpec,
        data_location: DataLocation,
    ) -> Self {
        Self {
            id,
            dataset_id: parent.dataset_id,
            parent_id: Some(parent.id),
            stage,
            pipeline,
            data_location,
            publish_mode: None,
            metadata: VersionMetadata {
                description: format!("Stage: {}", stage.as_str()),
                ..Default::default()
            },
            created_at: Utc::now(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether children may be derived from this version at all.
    /// A published view is a pointer, not a version to build on.
    pub fn is_branchable(&self) -> bool {
        self.stage != LifecycleStage::Published || self.publish_mode == Some(PublishMode::Snapshot)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Tree structure tracking version lineage.
///
/// Exactly one version (the raw root) has no parent, and every other version's
/// parent is in the tree, so no version can be its own ancestor.
#[derive(Debug, Clone)]
pub struct VersionTree {
    dataset_id: Uuid,
    versions: HashMap<Uuid, DatasetVersion>,
    /// Registration order
    order: Vec<Uuid>,
    root_id: Uuid,
}

impl VersionTree {
    pub fn new(root_version: DatasetVersion) -> Self {
        let root_id = root_version.id;
        let dataset_id = root_version.dataset_id;
        let mut versions = HashMap::new();
        versions.insert(root_id, root_version);

        Self {
            dataset_id,
            versions,
            order: vec![root_id],
            root_id,
        }
    }

    /// Rebuild a tree from persisted versions in any order.
    pub fn from_versions(dataset_id: Uuid, mut versions: Vec<DatasetVersion>) -> Result<Self> {
        versions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut roots = versions.iter().filter(|v| v.is_root());
        let root = match (roots.next(), roots.next()) {
            (Some(root), None) => root.clone(),
            (None, _) => return Err(Error::lineage(dataset_id, "no root version found")),
            (Some(_), Some(_)) => {
                return Err(Error::lineage(dataset_id, "more than one root version"));
            }
        };

        let mut pending: Vec<DatasetVersion> =
            versions.into_iter().filter(|v| !v.is_root()).collect();
        let mut tree = Self::new(root);

        // parents first; a pass that places nothing means orphans or a cycle
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for version in pending {
                if version.parent_id.is_some_and(|p| tree.contains(&p)) {
                    tree.add_version(version)?;
                } else {
                    deferred.push(version);
                }
            }
            if deferred.len() == before {
                let ids: Vec<String> = deferred.iter().map(|v| v.id.to_string()).collect();
                return Err(Error::lineage(
                    dataset_id,
                    format!("versions not connected to the root: {}", ids.join(", ")),
                ));
            }
            pending = deferred;
        }

        Ok(tree)
    }

    /// Append a version below an existing parent.
    pub fn add_version(&mut self, version: DatasetVersion) -> Result<()> {
        if version.dataset_id != self.dataset_id {
            return Err(Error::lineage(
                self.dataset_id,
                format!("version {} belongs to dataset {}", version.id, version.dataset_id),
            ));
        }
        if self.versions.contains_key(&version.id) {
            return Err(Error::lineage(
                self.dataset_id,
                format!("version {} already exists", version.id),
            ));
        }
        let Some(parent_id) = version.parent_id else {
            return Err(Error::lineage(
                self.dataset_id,
                "a dataset has exactly one root version",
            ));
        };
        if !self.versions.contains_key(&parent_id) {
            return Err(Error::lineage(
                self.dataset_id,
                format!("parent version {parent_id} not found in tree"),
            ));
        }

        self.order.push(version.id);
        self.versions.insert(version.id, version);
        Ok(())
    }

    pub fn dataset_id(&self) -> Uuid {
        self.dataset_id
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.versions.contains_key(id)
    }

    pub fn get_version(&self, id: &Uuid) -> Option<&DatasetVersion> {
        self.versions.get(id)
    }

    pub fn root_id(&self) -> Uuid {
        self.root_id
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All versions in registration order
    pub fn list_all(&self) -> Vec<&DatasetVersion> {
        self.order
            .iter()
            .filter_map(|id| self.versions.get(id))
            .collect()
    }

    /// Most recently registered version
    pub fn latest(&self) -> Option<&DatasetVersion> {
        self.order.last().and_then(|id| self.versions.get(id))
    }

    pub fn latest_in_stage(&self, stage: LifecycleStage) -> Option<&DatasetVersion> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.versions.get(id))
            .find(|v| v.stage == stage)
    }

    /// Path from the root down to `version_id`, both included
    pub fn get_lineage(&self, version_id: &Uuid) -> Vec<&DatasetVersion> {
        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.versions.get(version_id);

        while let Some(version) = current {
            if !seen.insert(version.id) {
                break;
            }
            lineage.push(version);
            current = version.parent_id.and_then(|p| self.versions.get(&p));
        }

        lineage.reverse();
        lineage
    }

    pub fn get_children(&self, version_id: &Uuid) -> Vec<&DatasetVersion> {
        self.list_all()
            .into_iter()
            .filter(|v| v.parent_id == Some(*version_id))
            .collect()
    }
}

/// Persisted dataset header (`dataset.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: Uuid,
    pub name: String,
    pub source_path: PathBuf,
    pub raw_version_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Top-level dataset containing all versions
#[derive(Debug, Clone)]
pub struct Dataset {
    pub record: DatasetRecord,
    pub versions: VersionTree,
}

impl Dataset {
    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn raw_version_id(&self) -> Uuid {
        self.record.raw_version_id
    }

    pub fn get_version(&self, version_id: &Uuid) -> Result<DatasetVersion> {
        self.versions
            .get_version(version_id)
            .cloned()
            .ok_or(Error::VersionNotFound {
                dataset_id: self.id(),
                version_id: *version_id,
            })
    }

    pub fn list_versions(&self) -> Vec<DatasetVersion> {
        self.versions.list_all().into_iter().cloned().collect()
    }
}

/// Read model combining a dataset's lineage with the caller's active pointer.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentDataset {
    pub id: Uuid,
    pub name: String,
    pub raw_version_id: Uuid,
    pub active_version_id: Uuid,
    pub active_version: DatasetVersion,
    pub versions: Vec<DatasetVersion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(name: &str) -> DataLocation {
        DataLocation::ParquetFile(PathBuf::from(format!("{name}.parquet")))
    }

    fn raw() -> DatasetVersion {
        DatasetVersion::new_raw(Uuid::new_v4(), Uuid::new_v4(), location("raw"))
    }

    fn child(parent: &DatasetVersion, stage: LifecycleStage) -> DatasetVersion {
        DatasetVersion::new_derived(
            Uuid::new_v4(),
            parent,
            stage,
            PipelineSpec::new("step"),
            location("child"),
        )
    }

    #[test]
    fn test_lineage_and_children() -> Result<()> {
        let root = raw();
        let cleaned = child(&root, LifecycleStage::Cleaned);
        let advanced = child(&cleaned, LifecycleStage::Advanced);
        let sibling = child(&cleaned, LifecycleStage::Cleaned);

        let mut tree = VersionTree::new(root.clone());
        tree.add_version(cleaned.clone())?;
        tree.add_version(advanced.clone())?;
        tree.add_version(sibling.clone())?;

        let lineage: Vec<Uuid> = tree.get_lineage(&advanced.id).iter().map(|v| v.id).collect();
        assert_eq!(lineage, vec![root.id, cleaned.id, advanced.id]);

        let children: Vec<Uuid> = tree.get_children(&cleaned.id).iter().map(|v| v.id).collect();
        assert_eq!(children, vec![advanced.id, sibling.id]);

        assert_eq!(tree.latest().map(|v| v.id), Some(sibling.id));
        assert_eq!(
            tree.latest_in_stage(LifecycleStage::Advanced).map(|v| v.id),
            Some(advanced.id)
        );
        Ok(())
    }

    #[test]
    fn test_rejects_second_root_and_orphans() {
        let root = raw();
        let mut tree = VersionTree::new(root.clone());

        let mut second_root = child(&root, LifecycleStage::Profiled);
        second_root.parent_id = None;
        let err = tree.add_version(second_root).expect_err("second root");
        assert_eq!(err.code(), "LINEAGE_ERROR");

        let mut orphan = child(&root, LifecycleStage::Profiled);
        orphan.parent_id = Some(Uuid::new_v4());
        assert!(tree.add_version(orphan).is_err());

        let mut self_parent = child(&root, LifecycleStage::Profiled);
        self_parent.parent_id = Some(self_parent.id);
        assert!(tree.add_version(self_parent).is_err());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_from_versions_any_order() -> Result<()> {
        let root = raw();
        let a = child(&root, LifecycleStage::Profiled);
        let b = child(&a, LifecycleStage::Cleaned);

        let tree = VersionTree::from_versions(root.dataset_id, vec![b.clone(), root.clone(), a])?;
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.root_id(), root.id);
        assert_eq!(tree.get_lineage(&b.id).len(), 3);
        Ok(())
    }

    #[test]
    fn test_from_versions_rejects_cycle() {
        let root = raw();
        let mut a = child(&root, LifecycleStage::Profiled);
        let mut b = child(&root, LifecycleStage::Profiled);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);

        let err = VersionTree::from_versions(root.dataset_id, vec![root, a, b])
            .expect_err("cycle must be rejected");
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_version_json_round_trip() -> Result<()> {
        let version = child(&raw(), LifecycleStage::Cleaned);
        assert_eq!(DatasetVersion::from_json(&version.to_json()?)?, version);
        Ok(())
    }
}
