//! Version diff computation

use super::storage::VersionStore;
use super::version::DatasetVersion;
use crate::error::Result;
use crate::frame::count_rows;
use crate::pipeline::Step;
use polars::prelude::*;
use serde::Serialize;
use uuid::Uuid;

/// Summary of differences between two dataset versions
#[derive(Debug, Clone, Serialize)]
pub struct DiffSummary {
    pub version1_id: Uuid,
    pub version2_id: Uuid,
    pub schema_changes: SchemaChanges,
    pub row_changes: RowChanges,
    pub statistical_changes: Vec<StatisticalChange>,
}

/// Changes to schema between versions
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaChanges {
    pub columns_added: Vec<String>,
    pub columns_removed: Vec<String>,
    /// `(old, new)` pairs known from rename steps between the two versions
    pub columns_renamed: Vec<(String, String)>,
    pub type_changes: Vec<TypeChange>,
}

/// Row-level changes
#[derive(Debug, Clone, Serialize)]
pub struct RowChanges {
    pub rows_v1: usize,
    pub rows_v2: usize,
    pub rows_added: Option<usize>,
    pub rows_removed: Option<usize>,
}

/// Statistical change in a column
#[derive(Debug, Clone, Serialize)]
pub struct StatisticalChange {
    pub column: String,
    pub metric: String,
    pub value_v1: Option<f64>,
    pub value_v2: Option<f64>,
    pub change_percent: Option<f64>,
}

/// Type change in a column
#[derive(Debug, Clone, Serialize)]
pub struct TypeChange {
    pub column: String,
    pub old_type: String,
    pub new_type: String,
}

const STAT_METRICS: [&str; 3] = ["mean", "min", "max"];
const MAX_STAT_COLUMNS: usize = 20;

/// Compute diff between two dataset versions
pub fn compute_version_diff(
    v1: &DatasetVersion,
    v2: &DatasetVersion,
    store: &VersionStore,
) -> Result<DiffSummary> {
    let mut lf1 = store.load_version_data(&v1.data_location)?;
    let mut lf2 = store.load_version_data(&v2.data_location)?;

    let schema1 = lf1.collect_schema()?;
    let schema2 = lf2.collect_schema()?;

    let mut schema_changes = compute_schema_changes(&schema1, &schema2);
    if v2.parent_id == Some(v1.id) {
        schema_changes.columns_renamed = renames_in(&v2.pipeline.steps, &schema_changes);
    }

    let rows_v1 = count_rows(&lf1)?;
    let rows_v2 = count_rows(&lf2)?;

    let statistical_changes = compute_statistical_changes(&lf1, &lf2, &schema1, &schema2)?;

    Ok(DiffSummary {
        version1_id: v1.id,
        version2_id: v2.id,
        schema_changes,
        row_changes: RowChanges {
            rows_v1,
            rows_v2,
            rows_added: rows_v2.checked_sub(rows_v1).filter(|n| *n > 0),
            rows_removed: rows_v1.checked_sub(rows_v2).filter(|n| *n > 0),
        },
        statistical_changes,
    })
}

fn compute_schema_changes(schema1: &Schema, schema2: &Schema) -> SchemaChanges {
    let columns_added = schema2
        .iter_names()
        .filter(|name| !schema1.contains(name.as_str()))
        .map(ToString::to_string)
        .collect();
    let columns_removed = schema1
        .iter_names()
        .filter(|name| !schema2.contains(name.as_str()))
        .map(ToString::to_string)
        .collect();

    let type_changes = schema1
        .iter()
        .filter_map(|(name, t1)| {
            let t2 = schema2.get(name.as_str())?;
            (t1 != t2).then(|| TypeChange {
                column: name.to_string(),
                old_type: t1.to_string(),
                new_type: t2.to_string(),
            })
        })
        .collect();

    SchemaChanges {
        columns_added,
        columns_removed,
        columns_renamed: Vec::new(),
        type_changes,
    }
}

/// Renames from `steps` whose old name disappeared and whose new name appeared.
fn renames_in(steps: &[Step], changes: &SchemaChanges) -> Vec<(String, String)> {
    steps
        .iter()
        .filter_map(|step| match step {
            Step::RenameColumns { mapping } => Some(mapping),
            _ => None,
        })
        .flatten()
        .filter(|(from, to)| {
            changes.columns_removed.contains(*from) && changes.columns_added.contains(*to)
        })
        .map(|(from, to)| (from.clone(), to.clone()))
        .collect()
}

fn compute_statistical_changes(
    lf1: &LazyFrame,
    lf2: &LazyFrame,
    schema1: &Schema,
    schema2: &Schema,
) -> Result<Vec<StatisticalChange>> {
    let common_numeric: Vec<String> = schema1
        .iter()
        .filter(|(name, dt1)| {
            dt1.is_numeric()
                && schema2
                    .get(name.as_str())
                    .is_some_and(DataType::is_numeric)
        })
        .map(|(name, _)| name.to_string())
        .take(MAX_STAT_COLUMNS)
        .collect();

    if common_numeric.is_empty() {
        return Ok(Vec::new());
    }

    let stats1 = column_stats(lf1, &common_numeric)?;
    let stats2 = column_stats(lf2, &common_numeric)?;

    let mut changes = Vec::new();
    for column in &common_numeric {
        for metric in STAT_METRICS {
            let key = format!("{column}::{metric}");
            let value_v1 = stat_value(&stats1, &key)?;
            let value_v2 = stat_value(&stats2, &key)?;
            if value_v1 == value_v2 {
                continue;
            }

            let change_percent = match (value_v1, value_v2) {
                (Some(a), Some(b)) if a != 0.0 => Some((b - a) / a.abs() * 100.0),
                _ => None,
            };
            changes.push(StatisticalChange {
                column: column.clone(),
                metric: metric.to_owned(),
                value_v1,
                value_v2,
                change_percent,
            });
        }
    }

    Ok(changes)
}

/// One-row frame holding `<column>::<metric>` for each column
fn column_stats(lf: &LazyFrame, columns: &[String]) -> Result<DataFrame> {
    let exprs: Vec<Expr> = columns
        .iter()
        .flat_map(|name| {
            let x = col(name.as_str()).cast(DataType::Float64);
            [
                x.clone().mean().alias(format!("{name}::mean")),
                x.clone().min().alias(format!("{name}::min")),
                x.max().alias(format!("{name}::max")),
            ]
        })
        .collect();
    Ok(lf.clone().select(exprs).collect()?)
}

fn stat_value(stats: &DataFrame, key: &str) -> Result<Option<f64>> {
    Ok(stats.column(key)?.f64()?.get(0))
}

impl DiffSummary {
    /// Check if there are any significant changes
    pub fn has_changes(&self) -> bool {
        !self.schema_changes.columns_added.is_empty()
            || !self.schema_changes.columns_removed.is_empty()
            || !self.schema_changes.type_changes.is_empty()
            || self.row_changes.rows_added.is_some()
            || self.row_changes.rows_removed.is_some()
            || !self.statistical_changes.is_empty()
    }

    /// Get a human-readable summary
    pub fn summary_text(&self) -> String {
        let schema = &self.schema_changes;
        let mut parts = Vec::new();

        if !schema.columns_added.is_empty() {
            parts.push(format!("Added {} columns", schema.columns_added.len()));
        }
        if !schema.columns_removed.is_empty() {
            parts.push(format!("Removed {} columns", schema.columns_removed.len()));
        }
        if !schema.columns_renamed.is_empty() {
            parts.push(format!("Renamed {} columns", schema.columns_renamed.len()));
        }
        if !schema.type_changes.is_empty() {
            parts.push(format!("{} type changes", schema.type_changes.len()));
        }
        if let Some(added) = self.row_changes.rows_added {
            parts.push(format!("Added {added} rows"));
        }
        if let Some(removed) = self.row_changes.rows_removed {
            parts.push(format!("Removed {removed} rows"));
        }
        if !self.statistical_changes.is_empty() {
            parts.push(format!(
                "{} statistical changes",
                self.statistical_changes.len()
            ));
        }

        if parts.is_empty() {
            "No significant changes".to_owned()
        } else {
            parts.join(", ")
        }
    }
}
