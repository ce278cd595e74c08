//! Pipeline execution engine.
//!
//! Executes pipeline specs against input data, applying transformations
//! strictly in sequence and generating run reports. Execution is all or
//! nothing: the frame is materialized after every step, a failing step aborts
//! the run, and output is only written once every step has succeeded.

use super::spec::PipelineSpec;
use super::step::{ImputeStrategy, NormalisationMethod, Step};
use super::validation::{ColumnKind, default_targets, validate_pipeline};
use crate::cancel::CancellationToken;
use crate::config::ExecutionSettings;
use crate::error::{Error, Result};
use crate::frame::{self, FileFormat};
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Report generated after pipeline execution
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// Number of rows before processing
    pub rows_before: usize,

    /// Number of rows after processing (or at the point of failure)
    pub rows_after: usize,

    pub columns_before: usize,
    pub columns_after: usize,

    /// Number of steps successfully applied
    pub steps_applied: usize,

    /// Warnings generated during execution
    pub warnings: Vec<String>,

    /// Time taken for execution
    pub duration: Duration,

    /// Where the output was written, if anywhere
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl ExecutionResult {
    /// One-line human summary
    pub fn summary(&self) -> String {
        let outcome = if self.success {
            "Pipeline completed"
        } else {
            "Pipeline failed"
        };
        format!(
            "{outcome}: rows {} → {}, columns {} → {}, {} step(s) applied, {:.2}s",
            self.rows_before,
            self.rows_after,
            self.columns_before,
            self.columns_after,
            self.steps_applied,
            self.duration.as_secs_f64()
        )
    }
}

/// Frame produced by [`apply_pipeline`] plus what happened along the way.
#[derive(Debug)]
pub struct PipelineOutput {
    pub frame: DataFrame,
    pub steps_applied: usize,
    pub warnings: Vec<String>,
}

/// Execute a pipeline spec on an input file with default settings.
///
/// See [`execute_with`].
pub fn execute(
    spec: &PipelineSpec,
    input_path: &Path,
    output_path: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<ExecutionResult> {
    execute_with(
        spec,
        input_path,
        output_path,
        cancel,
        &ExecutionSettings::default(),
    )
}

/// Execute a pipeline spec on an input file.
///
/// The spec is validated against the input schema first. The output goes to
/// `output_path`, or to the spec's `output.path` when no override is given;
/// with neither the run is a dry run and nothing is written.
///
/// # Errors
///
/// - [`Error::Validation`] when the spec does not fit the input
/// - [`Error::Execution`] when a step fails at runtime
/// - [`Error::Aborted`] when `cancel` fires between steps
///
/// No output file exists after any of these.
pub fn execute_with(
    spec: &PipelineSpec,
    input_path: &Path,
    output_path: Option<&Path>,
    cancel: &CancellationToken,
    settings: &ExecutionSettings,
) -> Result<ExecutionResult> {
    let start = Instant::now();

    let mut input_lf = frame::load_lazy(input_path, spec.input_format())?;
    let input_schema = input_lf.collect_schema()?;

    let validation_errors = validate_pipeline(spec, &input_schema);
    if !validation_errors.is_empty() {
        tracing::warn!(
            pipeline = %spec.name,
            problems = validation_errors.len(),
            "Pipeline validation failed"
        );
        return Err(Error::Validation(validation_errors));
    }

    let target = resolve_output(spec, output_path)?;

    let df = input_lf.collect()?;
    let rows_before = df.height();
    let columns_before = df.width();

    tracing::info!(
        pipeline = %spec.name,
        input = %input_path.display(),
        rows = rows_before,
        steps = spec.len(),
        "Executing pipeline"
    );

    let PipelineOutput {
        mut frame,
        steps_applied,
        warnings,
    } = apply_pipeline_with_progress(spec, df, cancel, settings, |progress| {
        tracing::info!(
            step = progress.step_index + 1,
            of = progress.total_steps,
            op = progress.step.op(),
            rows = progress.rows,
            columns = progress.columns,
            "Step applied"
        );
    })?;

    if let Some((path, format)) = &target {
        frame::write_frame(&mut frame, path, *format, settings.parquet_row_group_size)?;
        tracing::info!(output = %path.display(), "Pipeline output written");
    } else {
        tracing::debug!("No output path configured, skipping write");
    }

    let result = ExecutionResult {
        success: true,
        rows_before,
        rows_after: frame.height(),
        columns_before,
        columns_after: frame.width(),
        steps_applied,
        warnings,
        duration: start.elapsed(),
        output_path: target.map(|(path, _)| path),
    };
    tracing::info!("{}", result.summary());

    Ok(result)
}

/// Where to write, decided before any step runs so a bad target fails fast.
fn resolve_output(
    spec: &PipelineSpec,
    override_path: Option<&Path>,
) -> Result<Option<(PathBuf, FileFormat)>> {
    let path = match override_path {
        Some(path) => path.to_path_buf(),
        None => match spec.output_path(None) {
            Some(path) => path,
            None => return Ok(None),
        },
    };

    let format = FileFormat::resolve(&path, spec.output_format())?;

    let overwrite = spec.output.as_ref().is_none_or(|o| o.overwrite);
    if path.exists() && !overwrite {
        return Err(Error::Config(format!(
            "Output file already exists and overwrite is false: {}",
            path.display()
        )));
    }

    Ok(Some((path, format)))
}

/// Run every step of `spec` over an in-memory frame.
///
/// The spec is assumed to be validated against `df`'s schema. Cancellation is
/// checked before each step.
pub fn apply_pipeline(
    spec: &PipelineSpec,
    df: DataFrame,
    cancel: &CancellationToken,
    settings: &ExecutionSettings,
) -> Result<PipelineOutput> {
    apply_pipeline_with_progress(spec, df, cancel, settings, |_| {})
}

/// Progress of a running pipeline, reported after each completed step.
#[derive(Debug, Clone, Copy)]
pub struct StepProgress<'a> {
    pub step_index: usize,
    pub step: &'a Step,
    pub total_steps: usize,
    pub rows: usize,
    pub columns: usize,
}

/// [`apply_pipeline`] calling `on_step` after every step that succeeds.
pub fn apply_pipeline_with_progress(
    spec: &PipelineSpec,
    df: DataFrame,
    cancel: &CancellationToken,
    settings: &ExecutionSettings,
    mut on_step: impl FnMut(StepProgress<'_>),
) -> Result<PipelineOutput> {
    let start = Instant::now();
    let rows_before = df.height();
    let columns_before = df.width();

    let mut frame = df;
    let mut warnings = Vec::new();

    for (idx, step) in spec.steps.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::info!(pipeline = %spec.name, steps_applied = idx, "Pipeline cancelled");
            return Err(Error::Aborted { steps_applied: idx });
        }

        tracing::debug!(step = idx + 1, op = step.op(), "{}", step.describe());

        let (rows_at_failure, columns_at_failure) = (frame.height(), frame.width());
        frame = match apply_step(step, idx, frame, settings, &mut warnings) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(step = idx + 1, op = step.op(), error = %e, "Step failed");
                let report = ExecutionResult {
                    success: false,
                    rows_before,
                    rows_after: rows_at_failure,
                    columns_before,
                    columns_after: columns_at_failure,
                    steps_applied: idx,
                    warnings,
                    duration: start.elapsed(),
                    output_path: None,
                };
                return Err(Error::Execution {
                    step_index: idx,
                    op: step.op(),
                    cause: e.to_string(),
                    report: Box::new(report),
                });
            }
        };

        on_step(StepProgress {
            step_index: idx,
            step,
            total_steps: spec.steps.len(),
            rows: frame.height(),
            columns: frame.width(),
        });
    }

    Ok(PipelineOutput {
        frame,
        steps_applied: spec.steps.len(),
        warnings,
    })
}

/// Apply a single transformation step
fn apply_step(
    step: &Step,
    idx: usize,
    df: DataFrame,
    settings: &ExecutionSettings,
    warnings: &mut Vec<String>,
) -> PolarsResult<DataFrame> {
    // every explicitly named column must be present, or the step would do nothing
    for name in step.referenced_columns() {
        df.column(name)?;
    }

    let schema = frame_schema(&df);
    let targets = |columns: &[String]| {
        if columns.is_empty() && step.empty_means_all() {
            default_targets(step, &schema)
        } else {
            columns.to_vec()
        }
    };

    match step {
        Step::DropColumns { columns } => {
            let keep: Vec<Expr> = schema
                .iter_names()
                .filter(|name| !columns.iter().any(|c| c == name.as_str()))
                .map(|name| col(name.clone()))
                .collect();
            if keep.is_empty() {
                return Err(PolarsError::InvalidOperation(
                    "dropping every column would leave an empty frame".into(),
                ));
            }
            df.lazy().select(keep).collect()
        }

        Step::RenameColumns { mapping } => {
            let exprs: Vec<Expr> = schema
                .iter_names()
                .map(|name| match mapping.get(name.as_str()) {
                    Some(new_name) => col(name.clone()).alias(new_name.as_str()),
                    None => col(name.clone()),
                })
                .collect();
            df.lazy().select(exprs).collect()
        }

        Step::TrimWhitespace { columns } => map_columns(df, &targets(columns), |c| {
            col(c).str().strip_chars(lit(NULL))
        }),

        Step::CastTypes { columns } => {
            let before = null_counts(&df, columns.keys())?;
            let out = map_columns_with(df, columns, |c, type_str| {
                let from = schema.get(c).map_or(ColumnKind::Other, ColumnKind::of);
                cast_expr(c, from, type_str)
            })?;
            warn_new_nulls(&out, &before, idx, "cast", warnings)?;
            Ok(out)
        }

        Step::ParseDates { columns } => {
            let before = null_counts(&df, columns.keys())?;
            let out = map_columns_with(df, columns, |c, format| {
                parse_datetime(col(c), Some(format.as_str()))
            })?;
            warn_new_nulls(&out, &before, idx, "date parsing", warnings)?;
            Ok(out)
        }

        Step::Impute { strategy, columns } => {
            map_columns(df, &targets(columns), |c| {
                let expr = col(c);
                match strategy {
                    ImputeStrategy::Zero => expr.fill_null(lit(0)),
                    ImputeStrategy::Mean => expr.clone().fill_null(expr.mean()),
                    ImputeStrategy::Median => expr.clone().fill_null(expr.median()),
                    ImputeStrategy::Mode => expr.clone().fill_null(expr.mode().first()),
                }
            })
        }

        Step::OneHotEncode {
            columns,
            drop_original,
        } => {
            let mut out = df;
            for source in targets(columns) {
                out = one_hot_encode(out, &source, *drop_original, idx, settings, warnings)?;
            }
            Ok(out)
        }

        Step::NormaliseColumns { method, columns } => map_columns(df, columns, |c| {
            let x = col(c).cast(DataType::Float64);
            match method {
                NormalisationMethod::MinMax => {
                    let min = x.clone().min();
                    let range = x.clone().max() - min.clone();
                    when(range.clone().eq(lit(0.0)))
                        .then(lit(0.0))
                        .otherwise((x - min) / range)
                }
                NormalisationMethod::ZScore => {
                    let std = x.clone().std(1);
                    when(std.clone().eq(lit(0.0)))
                        .then(lit(0.0))
                        .otherwise((x.clone() - x.mean()) / std)
                }
            }
        }),

        Step::ClipOutliers {
            columns,
            lower_quantile,
            upper_quantile,
        } => map_columns(df, columns, |c| {
            let x = col(c).cast(DataType::Float64);
            let lower = x
                .clone()
                .quantile(lit(*lower_quantile), QuantileMethod::Linear);
            let upper = x
                .clone()
                .quantile(lit(*upper_quantile), QuantileMethod::Linear);
            x.clip(lower, upper)
        }),

        Step::ExtractNumbers { columns } => map_columns(df, columns, |c| {
            col(c)
                .str()
                .extract(lit(r"(-?\d+(?:\.\d+)?)"), 1)
                .cast(DataType::Float64)
        }),

        Step::RegexReplace {
            columns,
            pattern,
            replacement,
        } => map_columns(df, columns, |c| {
            col(c)
                .str()
                .replace_all(lit(pattern.as_str()), lit(replacement.as_str()), false)
        }),
    }
}

fn frame_schema(df: &DataFrame) -> Schema {
    df.get_columns()
        .iter()
        .map(|c| Field::new(c.name().clone(), c.dtype().clone()))
        .collect()
}

/// Replace each target column by `f(column)`, keeping column order.
fn map_columns(
    df: DataFrame,
    targets: &[String],
    f: impl Fn(&str) -> Expr,
) -> PolarsResult<DataFrame> {
    let exprs: Vec<Expr> = df
        .get_column_names()
        .into_iter()
        .map(|name| {
            if targets.iter().any(|t| t == name.as_str()) {
                f(name.as_str()).alias(name.clone())
            } else {
                col(name.clone())
            }
        })
        .collect();
    df.lazy().select(exprs).collect()
}

/// Like [`map_columns`] for steps carrying a per-column parameter.
fn map_columns_with(
    df: DataFrame,
    params: &BTreeMap<String, String>,
    f: impl Fn(&str, &String) -> Expr,
) -> PolarsResult<DataFrame> {
    let exprs: Vec<Expr> = df
        .get_column_names()
        .into_iter()
        .map(|name| match params.get(name.as_str()) {
            Some(param) => f(name.as_str(), param).alias(name.clone()),
            None => col(name.clone()),
        })
        .collect();
    df.lazy().select(exprs).collect()
}

const TRUE_STRINGS: &[&str] = &["true", "True", "TRUE", "t", "T", "yes", "Yes", "YES", "y", "Y", "1"];
const FALSE_STRINGS: &[&str] = &["false", "False", "FALSE", "f", "F", "no", "No", "NO", "n", "N", "0"];

/// Cast expression for a `cast_types` entry. Unconvertible values become null.
fn cast_expr(name: &str, from: ColumnKind, type_str: &str) -> Expr {
    let source = if from == ColumnKind::Categorical {
        col(name).cast(DataType::String)
    } else {
        col(name)
    };

    match (type_str, from.is_textual()) {
        ("Temporal", true) => parse_datetime(source, None),
        ("Boolean", true) => {
            let trimmed = source.str().strip_chars(lit(NULL));
            let any_of = |values: &[&str]| {
                values
                    .iter()
                    .fold(lit(false), |acc, v| acc.or(trimmed.clone().eq(lit(*v))))
            };
            when(any_of(TRUE_STRINGS))
                .then(lit(true))
                .when(any_of(FALSE_STRINGS))
                .then(lit(false))
                .otherwise(lit(NULL))
                .cast(DataType::Boolean)
        }
        ("Categorical", false) => source
            .cast(DataType::String)
            .cast(target_dtype(type_str)),
        _ => source.cast(target_dtype(type_str)),
    }
}

/// Polars type for a `cast_types` type string
fn target_dtype(type_str: &str) -> DataType {
    match type_str {
        "f64" => DataType::Float64,
        "String" | "Text" => DataType::String,
        "Boolean" => DataType::Boolean,
        "Categorical" => DataType::Categorical(None, Default::default()),
        "Temporal" => DataType::Datetime(TimeUnit::Milliseconds, None),
        // "i64", "Numeric"; anything else was rejected by validation
        _ => DataType::Int64,
    }
}

/// Formats tried, in order, when a date column has no explicit format.
/// Day-first wins over month-first for ambiguous values.
const INFERRED_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
];

/// Non-strict datetime parsing: unparseable values become null.
///
/// Without a format each candidate in [`INFERRED_DATE_FORMATS`] is tried and
/// the first match per value wins, so text that is not a date never fails the
/// step.
fn parse_datetime(expr: Expr, format: Option<&str>) -> Expr {
    match format.filter(|f| !f.is_empty()) {
        Some(format) => parse_with_format(expr, format),
        None => {
            let candidates: Vec<Expr> = INFERRED_DATE_FORMATS
                .iter()
                .map(|format| parse_with_format(expr.clone(), format))
                .collect();
            coalesce(&candidates)
        }
    }
}

fn parse_with_format(expr: Expr, format: &str) -> Expr {
    expr.str().to_datetime(
        Some(TimeUnit::Milliseconds),
        None,
        StrptimeOptions {
            format: Some(format.into()),
            strict: false,
            ..Default::default()
        },
        lit("raise"),
    )
}

fn null_counts<'a>(
    df: &DataFrame,
    columns: impl Iterator<Item = &'a String>,
) -> PolarsResult<BTreeMap<String, usize>> {
    columns
        .map(|name| Ok((name.clone(), df.column(name)?.null_count())))
        .collect()
}

fn warn_new_nulls(
    df: &DataFrame,
    before: &BTreeMap<String, usize>,
    idx: usize,
    what: &str,
    warnings: &mut Vec<String>,
) -> PolarsResult<()> {
    for (name, nulls_before) in before {
        let nulls_after = df.column(name)?.null_count();
        if nulls_after > *nulls_before {
            warnings.push(format!(
                "Step {}: {what} of '{name}' produced {} null value(s)",
                idx + 1,
                nulls_after - nulls_before
            ));
        }
    }
    Ok(())
}

/// Append one `<source>_<value>` indicator per distinct value, in sorted order.
fn one_hot_encode(
    df: DataFrame,
    source: &str,
    drop_original: bool,
    idx: usize,
    settings: &ExecutionSettings,
    warnings: &mut Vec<String>,
) -> PolarsResult<DataFrame> {
    let values = df
        .column(source)?
        .as_materialized_series()
        .cast(&DataType::String)?
        .unique()?
        .drop_nulls();

    let mut categories: Vec<String> = values
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_owned)
        .collect();
    categories.sort();

    if categories.len() > settings.one_hot_warn_threshold {
        warnings.push(format!(
            "Step {}: one-hot encoding '{source}' created {} columns",
            idx + 1,
            categories.len()
        ));
    }

    let as_text = col(source).cast(DataType::String);
    let indicators: Vec<Expr> = categories
        .iter()
        .map(|value| {
            when(as_text.clone().eq(lit(value.as_str())))
                .then(lit(1i32))
                .otherwise(lit(0i32))
                .alias(format!("{source}_{value}"))
        })
        .collect();

    let mut lf = df.lazy().with_columns(indicators);
    if drop_original {
        let schema = lf.collect_schema()?;
        let keep: Vec<Expr> = schema
            .iter_names()
            .filter(|name| name.as_str() != source)
            .map(|name| col(name.clone()))
            .collect();
        lf = lf.select(keep);
    }
    lf.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::NormalisationMethod;
    use tempfile::TempDir;

    fn people(rows: usize) -> PolarsResult<DataFrame> {
        let ids: Vec<i64> = (0..rows as i64).collect();
        let names: Vec<String> = (0..rows).map(|i| format!("  person {i} ")).collect();
        let ages: Vec<Option<i64>> = (0..rows)
            .map(|i| (i % 10 != 0).then_some(20 + (i as i64 % 50)))
            .collect();
        df!(
            "id" => ids,
            "name" => names,
            "age" => ages
        )
    }

    fn write_people(dir: &TempDir, rows: usize) -> Result<PathBuf> {
        let path = dir.path().join("people.csv");
        let mut df = people(rows)?;
        frame::write_frame(&mut df, &path, FileFormat::Csv, None)?;
        Ok(path)
    }

    fn drop_age() -> PipelineSpec {
        PipelineSpec::new("drop age").with_step(Step::DropColumns {
            columns: vec!["age".to_owned()],
        })
    }

    #[test]
    fn test_drop_column_end_to_end() -> Result<()> {
        let temp = TempDir::new()?;
        let input = write_people(&temp, 100)?;
        let output = temp.path().join("out.parquet");

        let result = execute(&drop_age(), &input, Some(&output), &CancellationToken::new())?;

        assert!(result.success);
        assert_eq!(result.rows_before, 100);
        assert_eq!(result.rows_after, 100);
        assert_eq!(result.columns_before, 3);
        assert_eq!(result.columns_after, 2);
        assert_eq!(result.steps_applied, 1);
        assert!(result.summary().starts_with("Pipeline completed"));

        let written = frame::load_frame(&output, None)?;
        assert_eq!(written.width(), 2);
        assert!(written.column("age").is_err());
        Ok(())
    }

    #[test]
    fn test_replay_is_deterministic() -> Result<()> {
        let temp = TempDir::new()?;
        let input = write_people(&temp, 40)?;
        let spec = PipelineSpec::new("replay")
            .with_step(Step::TrimWhitespace { columns: vec![] })
            .with_step(Step::Impute {
                strategy: ImputeStrategy::Median,
                columns: vec![],
            })
            .with_step(Step::OneHotEncode {
                columns: vec!["name".to_owned()],
                drop_original: true,
            });

        let first_out = temp.path().join("first.csv");
        let second_out = temp.path().join("second.csv");
        let cancel = CancellationToken::new();
        let first = execute(&spec, &input, Some(&first_out), &cancel)?;
        let second = execute(&spec, &input, Some(&second_out), &cancel)?;

        assert_eq!(first.rows_after, second.rows_after);
        assert_eq!(first.columns_after, second.columns_after);
        assert_eq!(first.columns_after, 2 + 40);

        let a = frame::load_frame(&first_out, None)?;
        let b = frame::load_frame(&second_out, None)?;
        assert!(a.equals_missing(&b));
        Ok(())
    }

    #[test]
    fn test_validation_failure_writes_nothing() -> Result<()> {
        let temp = TempDir::new()?;
        let input = write_people(&temp, 10)?;
        let output = temp.path().join("out.csv");
        let spec = PipelineSpec::new("bad").with_step(Step::DropColumns {
            columns: vec!["missing_col".to_owned()],
        });

        let err = execute(&spec, &input, Some(&output), &CancellationToken::new())
            .expect_err("validation must fail");
        match err {
            Error::Validation(problems) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].to_string().contains("missing_col"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!output.exists());
        Ok(())
    }

    #[test]
    fn test_cancelled_run_is_aborted_without_output() -> Result<()> {
        let temp = TempDir::new()?;
        let input = write_people(&temp, 10)?;
        let output = temp.path().join("out.csv");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = execute(&drop_age(), &input, Some(&output), &cancel)
            .expect_err("cancelled run must not succeed");
        assert!(matches!(err, Error::Aborted { steps_applied: 0 }));
        assert!(!output.exists());
        Ok(())
    }

    #[test]
    fn test_failing_step_reports_index() -> Result<()> {
        let df = people(5)?;
        // skips validation: the column is gone by the time step 2 runs
        let spec = drop_age().with_step(Step::NormaliseColumns {
            method: NormalisationMethod::ZScore,
            columns: vec!["age".to_owned()],
        });

        let err = apply_pipeline(
            &spec,
            df,
            &CancellationToken::new(),
            &ExecutionSettings::default(),
        )
        .expect_err("second step must fail");

        match err {
            Error::Execution {
                step_index,
                op,
                report,
                ..
            } => {
                assert_eq!(step_index, 1);
                assert_eq!(op, "normalise_columns");
                assert!(!report.success);
                assert_eq!(report.steps_applied, 1);
                assert_eq!(report.columns_after, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    fn run(spec: &PipelineSpec, df: DataFrame) -> Result<PipelineOutput> {
        apply_pipeline(spec, df, &CancellationToken::new(), &ExecutionSettings::default())
    }

    #[test]
    fn test_missing_column_is_an_execution_error() -> Result<()> {
        let df = df!("id" => [1i64, 2], "age" => [30i64, 40])?;
        let spec = drop_age().with_step(Step::NormaliseColumns {
            method: NormalisationMethod::MinMax,
            columns: vec!["age".to_owned()],
        });

        let err = run(&spec, df).expect_err("normalising a dropped column must fail");
        match err {
            Error::Execution {
                step_index,
                cause,
                report,
                ..
            } => {
                assert_eq!(step_index, 1);
                assert!(cause.contains("age"), "{cause}");
                assert_eq!(report.steps_applied, 1);
                assert_eq!(report.columns_after, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn test_rename_of_missing_column_fails() -> Result<()> {
        let df = df!("id" => [1i64, 2])?;
        let mut mapping = BTreeMap::new();
        mapping.insert("ghost".to_owned(), "spirit".to_owned());
        let spec = PipelineSpec::new("rename").with_step(Step::RenameColumns { mapping });

        let err = run(&spec, df).expect_err("renaming an absent column must fail");
        assert!(matches!(err, Error::Execution { step_index: 0, .. }), "{err}");
        Ok(())
    }

    #[test]
    fn test_unknown_indicator_column_fails() -> Result<()> {
        let df = df!("n" => ["a", "b", "a"])?;
        let spec = PipelineSpec::new("encode")
            .with_step(Step::OneHotEncode {
                columns: vec!["n".to_owned()],
                drop_original: false,
            })
            .with_step(Step::NormaliseColumns {
                method: NormalisationMethod::ZScore,
                columns: vec!["n_zzz".to_owned()],
            });

        let err = run(&spec, df).expect_err("n_zzz is never created");
        assert!(
            matches!(err, Error::Execution { step_index: 1, .. }),
            "unexpected {err}"
        );
        Ok(())
    }

    #[test]
    fn test_dropping_every_column_fails() -> Result<()> {
        let df = df!("id" => [1i64, 2], "age" => [30i64, 40])?;
        let spec = PipelineSpec::new("drop all").with_step(Step::DropColumns {
            columns: vec!["id".to_owned(), "age".to_owned()],
        });

        let err = run(&spec, df).expect_err("an empty frame must not be produced");
        assert!(matches!(err, Error::Execution { step_index: 0, .. }), "{err}");
        Ok(())
    }

    #[test]
    fn test_text_that_is_not_a_date_becomes_null() -> Result<()> {
        let mut formats = BTreeMap::new();
        formats.insert("d".to_owned(), String::new());
        let mut casts = BTreeMap::new();
        casts.insert("d".to_owned(), "Temporal".to_owned());

        for spec in [
            PipelineSpec::new("parse").with_step(Step::ParseDates { columns: formats }),
            PipelineSpec::new("cast").with_step(Step::CastTypes { columns: casts }),
        ] {
            let df = df!("d" => ["hello", "world", "x"])?;
            let out = run(&spec, df)?;
            let column = out.frame.column("d")?;
            assert!(matches!(column.dtype(), DataType::Datetime(..)));
            assert_eq!(column.null_count(), 3);
            assert_eq!(out.warnings.len(), 1, "{:?}", out.warnings);
        }
        Ok(())
    }

    #[test]
    fn test_dates_without_format_are_inferred() -> Result<()> {
        let df = df!("d" => ["2024-01-05", "2024-01-05 10:30:00", "05/01/2024", "soon"])?;
        let mut formats = BTreeMap::new();
        formats.insert("d".to_owned(), String::new());
        let spec = PipelineSpec::new("parse").with_step(Step::ParseDates { columns: formats });

        let out = run(&spec, df)?;
        let column = out.frame.column("d")?;
        assert_eq!(column.null_count(), 1);
        assert!(column.get(3)?.is_null());
        Ok(())
    }

    #[test]
    fn test_cancel_between_steps() -> Result<()> {
        let df = people(5)?;
        let spec = drop_age()
            .with_step(Step::TrimWhitespace { columns: vec![] })
            .with_step(Step::ExtractNumbers {
                columns: vec!["name".to_owned()],
            });
        let cancel = CancellationToken::new();
        let mut seen = Vec::new();

        let err = apply_pipeline_with_progress(
            &spec,
            df,
            &cancel,
            &ExecutionSettings::default(),
            |progress| {
                seen.push(progress.step_index);
                if progress.step_index == 0 {
                    cancel.cancel();
                }
            },
        )
        .expect_err("cancelled after the first step");

        assert!(matches!(err, Error::Aborted { steps_applied: 1 }), "{err}");
        assert_eq!(seen, vec![0]);
        Ok(())
    }

    #[test]
    fn test_cast_and_extract() -> Result<()> {
        let df = df!(
            "price" => ["$10.50", "n/a", "7"],
            "flag" => ["yes", "no", "maybe"]
        )?;
        let mut casts = BTreeMap::new();
        casts.insert("flag".to_owned(), "Boolean".to_owned());
        let spec = PipelineSpec::new("types")
            .with_step(Step::ExtractNumbers {
                columns: vec!["price".to_owned()],
            })
            .with_step(Step::CastTypes { columns: casts });

        let out = apply_pipeline(
            &spec,
            df,
            &CancellationToken::new(),
            &ExecutionSettings::default(),
        )?;

        let price: Vec<Option<f64>> = out.frame.column("price")?.f64()?.into_iter().collect();
        assert_eq!(price, vec![Some(10.5), None, Some(7.0)]);

        let flag: Vec<Option<bool>> = out.frame.column("flag")?.bool()?.into_iter().collect();
        assert_eq!(flag, vec![Some(true), Some(false), None]);
        assert_eq!(out.warnings.len(), 1, "{:?}", out.warnings);
        assert!(out.warnings[0].contains("'flag'"));
        Ok(())
    }

    #[test]
    fn test_one_hot_columns_are_sorted() -> Result<()> {
        let df = df!("color" => ["red", "blue", "red", "green"])?;
        let spec = PipelineSpec::new("encode").with_step(Step::OneHotEncode {
            columns: vec![],
            drop_original: false,
        });

        let out = apply_pipeline(
            &spec,
            df,
            &CancellationToken::new(),
            &ExecutionSettings::default(),
        )?;

        let names: Vec<String> = out
            .frame
            .get_column_names()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["color", "color_blue", "color_green", "color_red"]);

        let red: Vec<Option<i32>> = out.frame.column("color_red")?.i32()?.into_iter().collect();
        assert_eq!(red, vec![Some(1), Some(0), Some(1), Some(0)]);
        Ok(())
    }

    #[test]
    fn test_min_max_of_constant_column() -> Result<()> {
        let df = df!("x" => [3.0f64, 3.0, 3.0])?;
        let spec = PipelineSpec::new("scale").with_step(Step::NormaliseColumns {
            method: NormalisationMethod::MinMax,
            columns: vec!["x".to_owned()],
        });
        let out = apply_pipeline(
            &spec,
            df,
            &CancellationToken::new(),
            &ExecutionSettings::default(),
        )?;
        let x: Vec<Option<f64>> = out.frame.column("x")?.f64()?.into_iter().collect();
        assert_eq!(x, vec![Some(0.0), Some(0.0), Some(0.0)]);
        Ok(())
    }

    #[test]
    fn test_existing_output_without_overwrite() -> Result<()> {
        let temp = TempDir::new()?;
        let input = write_people(&temp, 3)?;
        let output = temp.path().join("existing.csv");
        std::fs::write(&output, "keep me")?;

        let mut spec = drop_age();
        spec.output = Some(crate::pipeline::spec::OutputConfig {
            format: None,
            path: Some(output.display().to_string()),
            overwrite: false,
        });

        let err = execute(&spec, &input, None, &CancellationToken::new())
            .expect_err("existing output must be kept");
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert_eq!(std::fs::read_to_string(&output)?, "keep me");
        Ok(())
    }
}
