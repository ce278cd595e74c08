//! Storage backend for dataset versions
//!
//! ```text
//! <home>/datasets/<dataset_id>/dataset.json
//! <home>/datasets/<dataset_id>/versions/<version_id>.meta.json
//! <home>/datasets/<dataset_id>/data/<version_id>.parquet
//! <home>/datasets/<dataset_id>/data/source.<ext>
//! <home>/published/<dataset_id>/<version_id>.parquet
//! <home>/locks/<dataset_id>.lock
//! ```
//!
//! Data files are always complete before the metadata that points at them is
//! written, and metadata is written with a temp file + rename, so a version
//! file on disk always refers to complete data.

use super::version::{DatasetRecord, DatasetVersion};
use crate::config::StandardPaths;
use crate::error::{Error, IoResultExt as _, Result};
use crate::frame::{self, FileFormat};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Location of version data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataLocation {
    /// Stored as parquet file
    ParquetFile(PathBuf),
    /// The ingested source file, in its original format
    OriginalFile(PathBuf),
}

impl DataLocation {
    pub fn path(&self) -> &Path {
        match self {
            Self::ParquetFile(p) | Self::OriginalFile(p) => p,
        }
    }
}

/// Storage backend for dataset versions
#[derive(Debug)]
pub struct VersionStore {
    paths: StandardPaths,
    row_group_size: Option<usize>,
}

impl VersionStore {
    pub fn new(paths: StandardPaths, row_group_size: Option<usize>) -> Result<Self> {
        for dir in [&paths.datasets_dir, &paths.published_dir, &paths.locks_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        }
        Ok(Self {
            paths,
            row_group_size,
        })
    }

    pub fn paths(&self) -> &StandardPaths {
        &self.paths
    }

    /// Get the directory path for a dataset
    pub fn dataset_dir(&self, dataset_id: &Uuid) -> PathBuf {
        self.paths.datasets_dir.join(dataset_id.to_string())
    }

    fn versions_dir(&self, dataset_id: &Uuid) -> PathBuf {
        self.dataset_dir(dataset_id).join("versions")
    }

    fn data_dir(&self, dataset_id: &Uuid) -> PathBuf {
        self.dataset_dir(dataset_id).join("data")
    }

    fn record_path(&self, dataset_id: &Uuid) -> PathBuf {
        self.dataset_dir(dataset_id).join("dataset.json")
    }

    /// Advisory lock file guarding executions on a dataset.
    ///
    /// Kept outside the dataset directory so deleting a dataset never removes
    /// a file another process may hold open.
    pub fn lock_path(&self, dataset_id: &Uuid) -> PathBuf {
        self.paths.locks_dir.join(format!("{dataset_id}.lock"))
    }

    /// Get the path for a version's data file
    pub fn version_data_path(&self, dataset_id: &Uuid, version_id: &Uuid) -> PathBuf {
        self.data_dir(dataset_id).join(format!("{version_id}.parquet"))
    }

    /// Get the path for a version's metadata file
    pub fn version_metadata_path(&self, dataset_id: &Uuid, version_id: &Uuid) -> PathBuf {
        self.versions_dir(dataset_id)
            .join(format!("{version_id}.meta.json"))
    }

    pub fn snapshot_path(&self, dataset_id: &Uuid, version_id: &Uuid) -> PathBuf {
        self.paths
            .published_dir
            .join(dataset_id.to_string())
            .join(format!("{version_id}.parquet"))
    }

    /// Register the raw source of a new dataset.
    ///
    /// With `copy` the file is copied into the store, so later changes to the
    /// source do not leak into the raw version; otherwise it is referenced in place.
    pub fn store_raw_data(
        &self,
        dataset_id: &Uuid,
        source_path: &Path,
        copy: bool,
    ) -> Result<DataLocation> {
        if !copy {
            tracing::debug!(source = %source_path.display(), "Referencing raw source in place");
            return Ok(DataLocation::OriginalFile(source_path.to_path_buf()));
        }

        let format = FileFormat::resolve(source_path, None)?;
        let data_dir = self.data_dir(dataset_id);
        fs::create_dir_all(&data_dir).context("Failed to create dataset data directory")?;
        let dest = data_dir.join(format!("source.{}", format.extension()));

        let mut tmp = tempfile::NamedTempFile::new_in(&data_dir)
            .context("Failed to create temp file for raw copy")?;
        let mut source = fs::File::open(source_path).map_err(|e| Error::io_at("open", source_path, e))?;
        std::io::copy(&mut source, tmp.as_file_mut())
            .with_context(|| format!("Failed to copy {}", source_path.display()))?;
        tmp.as_file_mut()
            .sync_all()
            .context("Failed to sync raw copy")?;
        tmp.persist(&dest)
            .map_err(|e| Error::io_at("move raw copy into", &dest, e.error))?;

        Ok(DataLocation::OriginalFile(dest))
    }

    /// Store transformed version data
    pub fn store_version_data(
        &self,
        dataset_id: &Uuid,
        version_id: &Uuid,
        df: &mut DataFrame,
    ) -> Result<DataLocation> {
        let dest = self.version_data_path(dataset_id, version_id);
        frame::write_frame(df, &dest, FileFormat::Parquet, self.row_group_size)?;
        Ok(DataLocation::ParquetFile(dest))
    }

    /// Materialize a published snapshot outside the dataset directory.
    pub fn store_snapshot(
        &self,
        dataset_id: &Uuid,
        version_id: &Uuid,
        df: &mut DataFrame,
    ) -> Result<DataLocation> {
        let dest = self.snapshot_path(dataset_id, version_id);
        frame::write_frame(df, &dest, FileFormat::Parquet, self.row_group_size)?;
        Ok(DataLocation::ParquetFile(dest))
    }

    /// Load data for a version
    pub fn load_version_data(&self, location: &DataLocation) -> Result<LazyFrame> {
        frame::load_lazy(location.path(), None)
    }

    /// Remove a data file written for a version that never got registered.
    pub fn discard_data(&self, location: &DataLocation) {
        if let DataLocation::ParquetFile(path) = location
            && let Err(e) = fs::remove_file(path)
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned data file");
        }
    }

    pub fn save_dataset_record(&self, record: &DatasetRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&self.record_path(&record.id), json.as_bytes())
    }

    pub fn load_dataset_record(&self, dataset_id: &Uuid) -> Result<DatasetRecord> {
        let path = self.record_path(dataset_id);
        let json = fs::read_to_string(&path).map_err(|e| Error::io_at("read", &path, e))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Ids of every dataset directory that has a `dataset.json`
    pub fn list_dataset_ids(&self) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.paths.datasets_dir)
            .with_context(|| format!("Failed to read {}", self.paths.datasets_dir.display()))?;

        for entry in entries {
            let entry = entry.context("Failed to read dataset directory entry")?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
                && self.record_path(&id).exists()
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Save version metadata
    pub fn save_version_metadata(&self, version: &DatasetVersion) -> Result<()> {
        let meta_path = self.version_metadata_path(&version.dataset_id, &version.id);
        write_atomic(&meta_path, version.to_json()?.as_bytes())
    }

    /// Load version metadata
    pub fn load_version_metadata(
        &self,
        dataset_id: &Uuid,
        version_id: &Uuid,
    ) -> Result<DatasetVersion> {
        let meta_path = self.version_metadata_path(dataset_id, version_id);
        let json =
            fs::read_to_string(&meta_path).map_err(|e| Error::io_at("read", &meta_path, e))?;
        DatasetVersion::from_json(&json)
    }

    /// Every persisted version of a dataset, unordered
    pub fn load_versions(&self, dataset_id: &Uuid) -> Result<Vec<DatasetVersion>> {
        let dir = self.versions_dir(dataset_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))? {
            let entry = entry.context("Failed to read version entry")?;
            let file_name = entry.file_name();
            if let Some(version_id) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(".meta.json"))
                .and_then(|stem| Uuid::parse_str(stem).ok())
            {
                versions.push(self.load_version_metadata(dataset_id, &version_id)?);
            }
        }

        Ok(versions)
    }

    /// Delete a version's metadata and its own data file
    pub fn delete_version(&self, dataset_id: &Uuid, version_id: &Uuid) -> Result<()> {
        let data_path = self.version_data_path(dataset_id, version_id);
        let meta_path = self.version_metadata_path(dataset_id, version_id);

        // metadata first so a crash never leaves a version pointing at deleted data
        if meta_path.exists() {
            fs::remove_file(&meta_path).context("Failed to delete version metadata")?;
        }
        if data_path.exists() {
            fs::remove_file(&data_path).context("Failed to delete version data")?;
        }

        Ok(())
    }

    /// Remove a dataset directory. Published snapshots live elsewhere and stay.
    pub fn delete_dataset(&self, dataset_id: &Uuid) -> Result<()> {
        let dir = self.dataset_dir(dataset_id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| Error::io_at("delete", &dir, e))?;
        }
        Ok(())
    }

    /// Get storage statistics for a dataset
    pub fn get_dataset_stats(&self, dataset_id: &Uuid) -> Result<DatasetStorageStats> {
        let data_dir = self.data_dir(dataset_id);
        let mut stats = DatasetStorageStats::default();

        if !data_dir.exists() {
            return Ok(stats);
        }

        for entry in fs::read_dir(&data_dir).context("Failed to read dataset data directory")? {
            let path = entry.context("Failed to read data entry")?.path();
            if let Some(size) = frame::file_size(&path) {
                stats.total_bytes += size;
                stats.file_count += 1;
            }
        }

        Ok(stats)
    }
}

/// Storage statistics for a dataset
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetStorageStats {
    pub total_bytes: u64,
    pub file_count: usize,
}

impl DatasetStorageStats {
    pub fn total_mb(&self) -> f64 {
        self.total_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Write `bytes` to `path` via a temp file in the same directory and a rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tmp.as_file_mut()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| Error::io_at("move into place", path, e.error))?;
    Ok(())
}
