//! Dataset lifecycle management.
//!
//! Every dataset is an append-only tree of immutable versions rooted at its
//! raw ingestion. Versions move through six stages:
//! - **Raw**: the ingested source, never modified
//! - **Profiled**: inspected, usually with the data unchanged
//! - **Cleaned**: deterministic text/type fixes (trim, cast, rename)
//! - **Advanced**: ML preprocessing (imputation, normalisation, outliers, encoding)
//! - **Validated**: quality gates passed
//! - **Published**: exposed as a view (shared data) or a snapshot (own copy)
//!
//! A new version is produced by [`DatasetRegistry::advance`]: the pipeline is
//! validated against the parent's schema, run against the parent's data, the
//! result written to a fresh location, and only then is the version
//! registered. A failure at any point leaves the tree untouched.
//!
//! The active version is a per-registry pointer layered on top of the tree;
//! it is not persisted.
//!
//! ```no_run
//! use brisket::cancel::CancellationToken;
//! use brisket::lifecycle::{DatasetRegistry, LifecycleStage};
//! use brisket::pipeline::{PipelineSpec, Step};
//! use std::path::Path;
//!
//! let registry = DatasetRegistry::in_dir("/srv/brisket")?;
//! let dataset_id = registry.create_dataset("Sales", Path::new("sales.csv"))?;
//! let raw_id = registry.get_dataset(&dataset_id)?.raw_version_id();
//!
//! let clean = PipelineSpec::new("Trim").with_step(Step::TrimWhitespace { columns: vec![] });
//! let cleaned = registry.advance(
//!     &dataset_id,
//!     &raw_id,
//!     clean,
//!     LifecycleStage::Cleaned,
//!     &CancellationToken::new(),
//! )?;
//!
//! let diff = registry.compute_diff(&dataset_id, &raw_id, &cleaned.id)?;
//! println!("{}", diff.summary_text());
//! # Ok::<(), brisket::error::Error>(())
//! ```

pub mod diff;
pub mod lock;
pub mod query;
pub mod stages;
pub mod storage;
pub mod version;

pub use diff::{DiffSummary, compute_version_diff};
pub use lock::{DatasetLockGuard, DatasetLocks};
pub use query::VersionQuery;
pub use stages::{LifecycleStage, PublishMode};
pub use storage::{DataLocation, DatasetStorageStats, VersionStore};
pub use version::{
    CurrentDataset, Dataset, DatasetRecord, DatasetVersion, VersionMetadata, VersionTree,
};

use crate::cancel::CancellationToken;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::frame;
use crate::pipeline::{PipelineSpec, all_passed, apply_pipeline, evaluate_gates, validate_pipeline};
use polars::prelude::{LazyFrame, SchemaRef};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Central registry for all datasets and their versions.
///
/// Cheap to clone; clones share state, locks and the store.
#[derive(Debug, Clone)]
pub struct DatasetRegistry {
    datasets: Arc<RwLock<HashMap<Uuid, Dataset>>>,
    active: Arc<RwLock<HashMap<Uuid, Uuid>>>,
    store: Arc<VersionStore>,
    locks: DatasetLocks,
    settings: Arc<Settings>,
}

impl DatasetRegistry {
    /// Open the store under `settings.home` and load every dataset found there.
    ///
    /// A dataset whose persisted versions do not form a valid tree is skipped
    /// with a warning rather than failing the whole registry.
    pub fn open(settings: Settings) -> Result<Self> {
        let store = VersionStore::new(settings.paths(), settings.execution.parquet_row_group_size)?;

        let mut datasets = HashMap::new();
        for id in store.list_dataset_ids()? {
            match load_dataset(&store, &id) {
                Ok(dataset) => {
                    datasets.insert(id, dataset);
                }
                Err(e) => {
                    tracing::warn!(dataset_id = %id, error = %e, "Skipping unreadable dataset");
                }
            }
        }
        tracing::debug!(home = %settings.home.display(), datasets = datasets.len(), "Registry opened");

        Ok(Self {
            datasets: Arc::new(RwLock::new(datasets)),
            active: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(store),
            locks: DatasetLocks::new(settings.lock.clone()),
            settings: Arc::new(settings),
        })
    }

    /// [`Self::open`] with default settings rooted at `home`.
    pub fn in_dir(home: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Settings::with_home(home))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Ingest `source` as the raw root of a new dataset.
    pub fn create_dataset(&self, name: &str, source: &Path) -> Result<Uuid> {
        if !source.is_file() {
            return Err(Error::io_at(
                "read",
                source,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        let dataset_id = Uuid::new_v4();
        match self.ingest(dataset_id, name, source) {
            Ok(dataset) => {
                tracing::info!(
                    %dataset_id,
                    name,
                    source = %source.display(),
                    "Dataset created"
                );
                self.write_datasets().insert(dataset_id, dataset);
                Ok(dataset_id)
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete_dataset(&dataset_id) {
                    tracing::warn!(%dataset_id, error = %cleanup, "Failed to clean up partial dataset");
                }
                Err(e)
            }
        }
    }

    fn ingest(&self, dataset_id: Uuid, name: &str, source: &Path) -> Result<Dataset> {
        let location = self
            .store
            .store_raw_data(&dataset_id, source, self.settings.ingest.copy_raw)?;

        let mut lf = self.store.load_version_data(&location)?;
        let column_count = lf.collect_schema()?.len();
        let row_count = frame::count_rows(&lf)?;

        let mut raw = DatasetVersion::new_raw(Uuid::new_v4(), dataset_id, location);
        raw.metadata.row_count = Some(row_count);
        raw.metadata.column_count = Some(column_count);
        raw.metadata.file_size_bytes = frame::file_size(raw.data_location.path());
        raw.metadata.created_by.clone_from(&self.settings.created_by);
        self.store.save_version_metadata(&raw)?;

        let record = DatasetRecord {
            id: dataset_id,
            name: name.to_owned(),
            source_path: source.to_path_buf(),
            raw_version_id: raw.id,
            created_at: raw.created_at,
        };
        // the record makes the dataset visible, so it goes last
        self.store.save_dataset_record(&record)?;

        Ok(Dataset {
            record,
            versions: VersionTree::new(raw),
        })
    }

    /// Get a dataset by ID
    pub fn get_dataset(&self, id: &Uuid) -> Result<Dataset> {
        self.read_datasets()
            .get(id)
            .cloned()
            .ok_or(Error::DatasetNotFound(*id))
    }

    /// Dataset headers, oldest first
    pub fn list_datasets(&self) -> Vec<DatasetRecord> {
        let mut records: Vec<DatasetRecord> = self
            .read_datasets()
            .values()
            .map(|d| d.record.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
    }

    /// List all versions for a dataset in registration order
    pub fn list_versions(&self, dataset_id: &Uuid) -> Result<Vec<DatasetVersion>> {
        Ok(self.get_dataset(dataset_id)?.list_versions())
    }

    pub fn get_version(&self, dataset_id: &Uuid, version_id: &Uuid) -> Result<DatasetVersion> {
        self.get_dataset(dataset_id)?.get_version(version_id)
    }

    pub fn find_version(&self, dataset_id: &Uuid, query: &VersionQuery) -> Result<DatasetVersion> {
        query.execute(&self.get_dataset(dataset_id)?)
    }

    /// Path from the root down to `version_id`
    pub fn lineage(&self, dataset_id: &Uuid, version_id: &Uuid) -> Result<Vec<DatasetVersion>> {
        let dataset = self.get_dataset(dataset_id)?;
        dataset.get_version(version_id)?;
        Ok(dataset
            .versions
            .get_lineage(version_id)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn children(&self, dataset_id: &Uuid, version_id: &Uuid) -> Result<Vec<DatasetVersion>> {
        let dataset = self.get_dataset(dataset_id)?;
        dataset.get_version(version_id)?;
        Ok(dataset
            .versions
            .get_children(version_id)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Derive a new version from `parent_id` by running `pipeline`.
    ///
    /// Holds the dataset lock for validate + execute + register. An empty
    /// pipeline creates a version that shares the parent's data.
    ///
    /// # Errors
    ///
    /// - [`Error::LockContention`] if another execution holds the dataset
    /// - [`Error::Stage`] if `target` is not reachable from the parent
    /// - [`Error::Validation`] if the pipeline does not fit the parent's schema
    /// - [`Error::Execution`] or [`Error::Aborted`] from the executor
    /// - [`Error::QualityGate`] if `target` is Validated and a gate fails
    ///
    /// In every error case no version is created.
    pub fn advance(
        &self,
        dataset_id: &Uuid,
        parent_id: &Uuid,
        pipeline: PipelineSpec,
        target: LifecycleStage,
        cancel: &CancellationToken,
    ) -> Result<DatasetVersion> {
        let _guard = self.lock_dataset(dataset_id)?;
        let parent = self.get_version(dataset_id, parent_id)?;

        if target == LifecycleStage::Published {
            return Err(Error::Stage(
                "versions reach Published through publishing, not through a pipeline".to_owned(),
            ));
        }
        check_branch(&parent, target)?;

        let mut parent_data = self.store.load_version_data(&parent.data_location)?;
        let schema = parent_data.collect_schema()?;
        let problems = validate_pipeline(&pipeline, &schema);
        if !problems.is_empty() {
            tracing::warn!(
                %dataset_id,
                pipeline = %pipeline.name,
                problems = problems.len(),
                "Pipeline rejected by validation"
            );
            return Err(Error::Validation(problems));
        }

        let version_id = Uuid::new_v4();
        let (output, warnings) = if pipeline.is_noop() {
            (None, Vec::new())
        } else {
            let output = apply_pipeline(
                &pipeline,
                parent_data.clone().collect()?,
                cancel,
                &self.settings.execution,
            )?;
            (Some(output.frame), output.warnings)
        };

        let gate_results = if target == LifecycleStage::Validated {
            let results = match &output {
                Some(df) => evaluate_gates(df, &pipeline.quality_gates)?,
                None => evaluate_gates(&parent_data.collect()?, &pipeline.quality_gates)?,
            };
            if !all_passed(&results) {
                tracing::warn!(
                    %dataset_id,
                    pipeline = %pipeline.name,
                    failed = results.iter().filter(|r| !r.passed).count(),
                    "Quality gates failed"
                );
                return Err(Error::QualityGate(results));
            }
            results
        } else {
            Vec::new()
        };

        let (location, wrote_data, rows, columns) = match output {
            None => (
                parent.data_location.clone(),
                false,
                parent.metadata.row_count,
                parent.metadata.column_count,
            ),
            Some(mut df) => {
                let location = self
                    .store
                    .store_version_data(dataset_id, &version_id, &mut df)?;
                (location, true, Some(df.height()), Some(df.width()))
            }
        };

        let mut version =
            DatasetVersion::new_derived(version_id, &parent, target, pipeline, location);
        if let Some(description) = version.pipeline.description.clone() {
            version.metadata.description = description;
        }
        version.metadata.row_count = rows;
        version.metadata.column_count = columns;
        version.metadata.file_size_bytes = frame::file_size(version.data_location.path());
        version.metadata.warnings = warnings;
        version.metadata.quality_gates = gate_results;
        version.metadata.created_by.clone_from(&self.settings.created_by);

        let version = self.register(version, wrote_data)?;
        tracing::info!(
            %dataset_id,
            version_id = %version.id,
            parent_id = %parent.id,
            from = %parent.stage,
            to = %version.stage,
            steps = version.pipeline.len(),
            "Version created"
        );
        Ok(version)
    }

    /// Advance from the active version and make the result active.
    pub fn apply_transforms(
        &self,
        dataset_id: &Uuid,
        pipeline: PipelineSpec,
        target: LifecycleStage,
    ) -> Result<Uuid> {
        let parent = self.active_version(dataset_id)?;
        let version = self.advance(
            dataset_id,
            &parent.id,
            pipeline,
            target,
            &CancellationToken::new(),
        )?;
        self.set_active_version(dataset_id, &version.id)?;
        Ok(version.id)
    }

    /// Append a Published child of `version_id`.
    ///
    /// A view shares the parent's data and disappears with the dataset; a
    /// snapshot is copied under the published directory and survives it.
    pub fn publish_version(
        &self,
        dataset_id: &Uuid,
        version_id: &Uuid,
        mode: PublishMode,
    ) -> Result<DatasetVersion> {
        let _guard = self.lock_dataset(dataset_id)?;
        let parent = self.get_version(dataset_id, version_id)?;
        check_branch(&parent, LifecycleStage::Published)?;

        let published_id = Uuid::new_v4();
        let (location, wrote_data) = match mode {
            PublishMode::View => (parent.data_location.clone(), false),
            PublishMode::Snapshot => {
                let mut df = self.store.load_version_data(&parent.data_location)?.collect()?;
                let location = self
                    .store
                    .store_snapshot(dataset_id, &published_id, &mut df)?;
                (location, true)
            }
        };

        let mut version = DatasetVersion::new_derived(
            published_id,
            &parent,
            LifecycleStage::Published,
            PipelineSpec::new(format!("publish {}", mode.as_str())),
            location,
        );
        version.publish_mode = Some(mode);
        version.metadata.description = format!("Published as {}", mode.as_str());
        version.metadata.row_count = parent.metadata.row_count;
        version.metadata.column_count = parent.metadata.column_count;
        version.metadata.file_size_bytes = frame::file_size(version.data_location.path());
        version.metadata.created_by.clone_from(&self.settings.created_by);

        let version = self.register(version, wrote_data)?;
        tracing::info!(
            %dataset_id,
            version_id = %version.id,
            parent_id = %parent.id,
            mode = mode.as_str(),
            "Version published"
        );
        Ok(version)
    }

    /// Point the dataset's active pointer at `version_id`.
    pub fn set_active_version(&self, dataset_id: &Uuid, version_id: &Uuid) -> Result<()> {
        self.get_version(dataset_id, version_id)?;
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*dataset_id, *version_id);
        tracing::debug!(%dataset_id, %version_id, "Active version set");
        Ok(())
    }

    /// The active version, or the latest version if none was set.
    pub fn active_version(&self, dataset_id: &Uuid) -> Result<DatasetVersion> {
        let dataset = self.get_dataset(dataset_id)?;
        let active_id = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dataset_id)
            .copied();

        match active_id {
            Some(id) => dataset.get_version(&id),
            None => VersionQuery::new().execute(&dataset),
        }
    }

    /// Lineage plus the active pointer, as one read model.
    pub fn current(&self, dataset_id: &Uuid) -> Result<CurrentDataset> {
        let dataset = self.get_dataset(dataset_id)?;
        let active_version = self.active_version(dataset_id)?;
        Ok(CurrentDataset {
            id: dataset.id(),
            name: dataset.name().to_owned(),
            raw_version_id: dataset.raw_version_id(),
            active_version_id: active_version.id,
            active_version,
            versions: dataset.list_versions(),
        })
    }

    pub fn version_schema(&self, dataset_id: &Uuid, version_id: &Uuid) -> Result<SchemaRef> {
        Ok(self.load_version_data(dataset_id, version_id)?.collect_schema()?)
    }

    pub fn load_version_data(&self, dataset_id: &Uuid, version_id: &Uuid) -> Result<LazyFrame> {
        let version = self.get_version(dataset_id, version_id)?;
        self.store.load_version_data(&version.data_location)
    }

    /// Get the active version `LazyFrame` for consumption
    pub fn get_active_data(&self, dataset_id: &Uuid) -> Result<LazyFrame> {
        let version = self.active_version(dataset_id)?;
        self.store.load_version_data(&version.data_location)
    }

    /// Compute diff between two versions
    pub fn compute_diff(
        &self,
        dataset_id: &Uuid,
        version1_id: &Uuid,
        version2_id: &Uuid,
    ) -> Result<DiffSummary> {
        let dataset = self.get_dataset(dataset_id)?;
        let v1 = dataset.get_version(version1_id)?;
        let v2 = dataset.get_version(version2_id)?;

        compute_version_diff(&v1, &v2, &self.store)
    }

    pub fn storage_stats(&self, dataset_id: &Uuid) -> Result<DatasetStorageStats> {
        self.get_dataset(dataset_id)?;
        self.store.get_dataset_stats(dataset_id)
    }

    /// Remove a dataset and every version stored inside it.
    ///
    /// Published snapshots are kept.
    pub fn delete_dataset(&self, dataset_id: &Uuid) -> Result<()> {
        let guard = self.lock_dataset(dataset_id)?;
        self.store.delete_dataset(dataset_id)?;
        self.write_datasets().remove(dataset_id);
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dataset_id);
        drop(guard);

        tracing::info!(%dataset_id, "Dataset deleted");
        Ok(())
    }

    /// Take the dataset lock, then reload the dataset from disk so versions
    /// registered by other processes are visible.
    fn lock_dataset(&self, dataset_id: &Uuid) -> Result<DatasetLockGuard> {
        if !self.store.dataset_dir(dataset_id).is_dir() {
            return Err(Error::DatasetNotFound(*dataset_id));
        }

        let guard = self
            .locks
            .acquire(*dataset_id, &self.store.lock_path(dataset_id))?;
        let dataset = load_dataset(&self.store, dataset_id)?;
        self.write_datasets().insert(*dataset_id, dataset);
        Ok(guard)
    }

    /// Persist then publish `version` in memory; undo on failure.
    fn register(&self, version: DatasetVersion, wrote_data: bool) -> Result<DatasetVersion> {
        if let Err(e) = self.store.save_version_metadata(&version) {
            if wrote_data {
                self.store.discard_data(&version.data_location);
            }
            return Err(e);
        }

        let added = match self.write_datasets().get_mut(&version.dataset_id) {
            Some(dataset) => dataset.versions.add_version(version.clone()),
            None => Err(Error::DatasetNotFound(version.dataset_id)),
        };

        if let Err(e) = added {
            if let Err(cleanup) = self.store.delete_version(&version.dataset_id, &version.id) {
                tracing::warn!(version_id = %version.id, error = %cleanup, "Failed to roll back version");
            }
            if wrote_data {
                self.store.discard_data(&version.data_location);
            }
            return Err(e);
        }

        Ok(version)
    }

    fn read_datasets(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Dataset>> {
        // the map is only ever replaced entry by entry, so it is usable after a panic
        self.datasets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_datasets(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Dataset>> {
        self.datasets.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_branch(parent: &DatasetVersion, target: LifecycleStage) -> Result<()> {
    if !parent.is_branchable() {
        return Err(Error::Stage(format!(
            "version {} is a published view and cannot be branched",
            parent.id
        )));
    }
    if !parent.stage.can_branch_to(target) {
        return Err(Error::Stage(format!(
            "cannot derive a {target} version from a {} version",
            parent.stage
        )));
    }
    Ok(())
}

fn load_dataset(store: &VersionStore, dataset_id: &Uuid) -> Result<Dataset> {
    let record = store.load_dataset_record(dataset_id)?;
    let versions = VersionTree::from_versions(*dataset_id, store.load_versions(dataset_id)?)?;
    if versions.root_id() != record.raw_version_id {
        return Err(Error::lineage(
            *dataset_id,
            format!(
                "root version {} does not match recorded raw version {}",
                versions.root_id(),
                record.raw_version_id
            ),
        ));
    }
    Ok(Dataset { record, versions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Step;
    use tempfile::TempDir;

    fn registry_with_csv() -> Result<(TempDir, DatasetRegistry, Uuid)> {
        let temp = TempDir::new()?;
        let source = temp.path().join("people.csv");
        std::fs::write(&source, "id,name,age\n1, ann ,30\n2,bob,41\n3,cy,\n")?;

        let registry = DatasetRegistry::in_dir(temp.path().join("home"))?;
        let dataset_id = registry.create_dataset("people", &source)?;
        Ok((temp, registry, dataset_id))
    }

    #[test]
    fn test_registry_creation() -> Result<()> {
        let temp = TempDir::new()?;
        let registry = DatasetRegistry::in_dir(temp.path())?;
        assert!(registry.list_datasets().is_empty());
        Ok(())
    }

    #[test]
    fn test_create_dataset_records_raw_counts() -> Result<()> {
        let (_temp, registry, dataset_id) = registry_with_csv()?;
        let dataset = registry.get_dataset(&dataset_id)?;
        let raw = dataset.get_version(&dataset.raw_version_id())?;

        assert_eq!(raw.stage, LifecycleStage::Raw);
        assert_eq!(raw.metadata.row_count, Some(3));
        assert_eq!(raw.metadata.column_count, Some(3));
        assert!(raw.data_location.path().starts_with(registry.store().dataset_dir(&dataset_id)));
        Ok(())
    }

    #[test]
    fn test_backwards_transition_is_rejected() -> Result<()> {
        let (_temp, registry, dataset_id) = registry_with_csv()?;
        let raw_id = registry.get_dataset(&dataset_id)?.raw_version_id();
        let cancel = CancellationToken::new();

        let cleaned = registry.advance(
            &dataset_id,
            &raw_id,
            PipelineSpec::new("noop"),
            LifecycleStage::Cleaned,
            &cancel,
        )?;
        let err = registry
            .advance(
                &dataset_id,
                &cleaned.id,
                PipelineSpec::new("back"),
                LifecycleStage::Profiled,
                &cancel,
            )
            .expect_err("backwards transition must fail");
        assert_eq!(err.code(), "STAGE_ERROR");

        // lateral branch is fine
        registry.advance(
            &dataset_id,
            &cleaned.id,
            PipelineSpec::new("again"),
            LifecycleStage::Cleaned,
            &cancel,
        )?;
        assert_eq!(registry.list_versions(&dataset_id)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_apply_transforms_moves_active_pointer() -> Result<()> {
        let (_temp, registry, dataset_id) = registry_with_csv()?;
        let raw_id = registry.get_dataset(&dataset_id)?.raw_version_id();
        registry.set_active_version(&dataset_id, &raw_id)?;

        let pipeline = PipelineSpec::new("trim").with_step(Step::TrimWhitespace {
            columns: vec!["name".to_owned()],
        });
        let new_id = registry.apply_transforms(&dataset_id, pipeline, LifecycleStage::Cleaned)?;

        let current = registry.current(&dataset_id)?;
        assert_eq!(current.active_version_id, new_id);
        assert_eq!(current.active_version.parent_id, Some(raw_id));
        assert_eq!(current.versions.len(), 2);

        let names = registry.get_active_data(&dataset_id)?.collect()?;
        let first = names.column("name")?.str()?.get(0).map(str::to_owned);
        assert_eq!(first.as_deref(), Some("ann"));
        Ok(())
    }

    #[test]
    fn test_published_view_is_not_branchable() -> Result<()> {
        let (_temp, registry, dataset_id) = registry_with_csv()?;
        let raw_id = registry.get_dataset(&dataset_id)?.raw_version_id();

        let view = registry.publish_version(&dataset_id, &raw_id, PublishMode::View)?;
        assert_eq!(view.data_location, registry.get_version(&dataset_id, &raw_id)?.data_location);

        let err = registry
            .publish_version(&dataset_id, &view.id, PublishMode::Snapshot)
            .expect_err("views cannot be branched");
        assert_eq!(err.code(), "STAGE_ERROR");
        Ok(())
    }

    #[test]
    fn test_unknown_dataset() -> Result<()> {
        let temp = TempDir::new()?;
        let registry = DatasetRegistry::in_dir(temp.path())?;
        let id = Uuid::new_v4();

        let err = registry
            .advance(
                &id,
                &Uuid::new_v4(),
                PipelineSpec::new("x"),
                LifecycleStage::Cleaned,
                &CancellationToken::new(),
            )
            .expect_err("unknown dataset");
        assert_eq!(err.code(), "DATASET_NOT_FOUND");
        Ok(())
    }
}
