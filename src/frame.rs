//! Tabular file I/O shared by the executor and the version store.
//!
//! Formats are chosen by file extension (`csv`, `parquet`, `json`), falling
//! back to an explicit format hint. Every write goes to a temporary file in
//! the destination directory and is renamed into place once complete, so a
//! reader never sees a half-written file.

use crate::error::{Error, IoResultExt as _, Result};
use polars::prelude::*;
use std::io::Write as _;
use std::path::Path;

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Parquet,
    Json,
}

impl FileFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "parquet" | "pq" => Some(Self::Parquet),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
            Self::Json => "json",
        }
    }

    /// Format from the path's extension, otherwise from `hint`.
    pub fn resolve(path: &Path, hint: Option<&str>) -> Result<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::parse)
            .or_else(|| hint.and_then(Self::parse))
            .ok_or_else(|| {
                Error::Config(format!(
                    "Cannot determine file format for {} (hint: {})",
                    path.display(),
                    hint.unwrap_or("none")
                ))
            })
    }
}

/// Scan a file lazily.
pub fn load_lazy(path: &Path, hint: Option<&str>) -> Result<LazyFrame> {
    if !path.exists() {
        return Err(Error::io_at(
            "open",
            path,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }

    let lf = match FileFormat::resolve(path, hint)? {
        FileFormat::Csv => LazyCsvReader::new(path)
            .with_infer_schema_length(Some(10_000))
            .with_has_header(true)
            .finish()?,
        FileFormat::Parquet => LazyFrame::scan_parquet(path, Default::default())?,
        FileFormat::Json => {
            // no lazy JSON reader; read eagerly and wrap
            let file = std::fs::File::open(path).map_err(|e| Error::io_at("open", path, e))?;
            JsonReader::new(file).finish()?.lazy()
        }
    };

    Ok(lf)
}

/// Read a whole file into memory.
pub fn load_frame(path: &Path, hint: Option<&str>) -> Result<DataFrame> {
    Ok(load_lazy(path, hint)?.collect()?)
}

/// Column names and types of a file without reading its rows.
pub fn read_schema(path: &Path, hint: Option<&str>) -> Result<SchemaRef> {
    Ok(load_lazy(path, hint)?.collect_schema()?)
}

/// Number of rows a lazy frame produces, counted without materializing columns.
pub fn count_rows(lf: &LazyFrame) -> Result<usize> {
    let df = lf.clone().select([len().alias("rows")]).collect()?;
    let rows = df
        .column("rows")?
        .cast(&DataType::UInt64)?
        .u64()?
        .get(0)
        .unwrap_or(0);
    Ok(usize::try_from(rows).unwrap_or(usize::MAX))
}

/// Row group size: explicit override, otherwise smaller groups for wide frames.
pub fn parquet_row_group_size(column_count: usize, override_size: Option<usize>) -> usize {
    override_size.unwrap_or(if column_count >= 100 { 16_384 } else { 32_768 })
}

/// Write `df` to `path` atomically (temp file + rename).
pub fn write_frame(
    df: &mut DataFrame,
    path: &Path,
    format: FileFormat,
    row_group_size: Option<usize>,
) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".brisket-")
        .suffix(".partial")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;

    {
        let file = tmp.as_file_mut();
        match format {
            FileFormat::Parquet => {
                let group_size = parquet_row_group_size(df.width(), row_group_size);
                ParquetWriter::new(&mut *file)
                    .with_row_group_size(Some(group_size))
                    .finish(df)?;
            }
            FileFormat::Csv => {
                CsvWriter::new(&mut *file).include_header(true).finish(df)?;
            }
            FileFormat::Json => {
                JsonWriter::new(&mut *file)
                    .with_json_format(JsonFormat::Json)
                    .finish(df)?;
            }
        }
        file.flush().context("Failed to flush output")?;
        file.sync_all().context("Failed to sync output")?;
    }

    tmp.persist(path)
        .map_err(|e| Error::io_at("move output into", path, e.error))?;

    Ok(())
}

/// Byte size of a file, if it can be read.
pub fn file_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
