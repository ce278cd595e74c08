//! Quality gates checked before a version may enter the Validated stage.
//!
//! Gates never change data. Each one inspects the frame a pipeline produced
//! and reports a [`GateResult`]; a version is only registered when every gate
//! passes. A gate whose column is missing fails instead of erroring, so the
//! caller always gets the full list of results.
//!
//! ```json
//! "quality_gates": [
//!   { "rule": "max_null_percent", "column": "age", "max_percent": 5.0 },
//!   { "rule": "row_count_range", "min": 1, "max": 1000000 },
//!   { "rule": "matches_pattern", "column": "email", "pattern": "^[^@]+@[^@]+$" }
//! ]
//! ```

use crate::error::Result;
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A single data quality rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QualityGate {
    /// Share of nulls in `column` is at most `max_percent` (0-100)
    MaxNullPercent { column: String, max_percent: f64 },
    /// Every non-null value of `column` lies in `[min, max]`
    ValueRange { column: String, min: f64, max: f64 },
    ColumnExists { column: String },
    RowCountRange { min: usize, max: usize },
    /// No value of `column` occurs twice
    NoDuplicates { column: String },
    /// Every non-null value of `column`, as text, matches `pattern`
    MatchesPattern { column: String, pattern: String },
}

impl QualityGate {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MaxNullPercent { .. } => "max_null_percent",
            Self::ValueRange { .. } => "value_range",
            Self::ColumnExists { .. } => "column_exists",
            Self::RowCountRange { .. } => "row_count_range",
            Self::NoDuplicates { .. } => "no_duplicates",
            Self::MatchesPattern { .. } => "matches_pattern",
        }
    }

    /// Parameter problems that make the gate meaningless, as `(field, message)`.
    pub fn parameter_problem(&self) -> Option<(&'static str, String)> {
        match self {
            Self::MaxNullPercent { max_percent, .. } if !(0.0..=100.0).contains(max_percent) => {
                Some(("max_percent", format!("{max_percent} is outside 0-100")))
            }
            Self::ValueRange { min, max, .. } if min.is_nan() || max.is_nan() || min > max => {
                Some(("min", format!("range [{min}, {max}] is empty")))
            }
            Self::RowCountRange { min, max } if min > max => {
                Some(("min", format!("range [{min}, {max}] is empty")))
            }
            Self::MatchesPattern { pattern, .. } => Regex::new(pattern)
                .err()
                .map(|e| ("pattern", format!("invalid regex: {e}"))),
            _ => None,
        }
    }

    fn column(&self) -> Option<&str> {
        match self {
            Self::MaxNullPercent { column, .. }
            | Self::ValueRange { column, .. }
            | Self::ColumnExists { column }
            | Self::NoDuplicates { column }
            | Self::MatchesPattern { column, .. } => Some(column),
            Self::RowCountRange { .. } => None,
        }
    }
}

/// Outcome of one gate against one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub rule: QualityGate,
    pub passed: bool,
    pub message: String,
}

impl std::fmt::Display for GateResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verdict = if self.passed { "passed" } else { "FAILED" };
        write!(f, "{} {verdict}: {}", self.rule.name(), self.message)
    }
}

/// Evaluate every gate against `df`, in order.
///
/// # Errors
///
/// Only polars failures while inspecting a column; a failing gate is a result.
pub fn evaluate_gates(df: &DataFrame, gates: &[QualityGate]) -> Result<Vec<GateResult>> {
    gates.iter().map(|gate| evaluate(df, gate)).collect()
}

/// Whether every result passed. An empty list passes.
pub fn all_passed(results: &[GateResult]) -> bool {
    results.iter().all(|r| r.passed)
}

fn evaluate(df: &DataFrame, gate: &QualityGate) -> Result<GateResult> {
    let result = |passed: bool, message: String| GateResult {
        rule: gate.clone(),
        passed,
        message,
    };

    let series = match gate.column() {
        Some(name) => match df.column(name) {
            Ok(column) => Some(column.as_materialized_series().clone()),
            Err(_) => return Ok(result(false, format!("Column '{name}' does not exist"))),
        },
        None => None,
    };

    let outcome = match (gate, series) {
        (QualityGate::ColumnExists { column }, _) => {
            result(true, format!("Column '{column}' exists"))
        }
        (QualityGate::RowCountRange { min, max }, _) => {
            let rows = df.height();
            let passed = (*min..=*max).contains(&rows);
            result(
                passed,
                format!(
                    "Row count {rows} is {}in range [{min}, {max}]",
                    if passed { "" } else { "not " }
                ),
            )
        }
        (QualityGate::MaxNullPercent { column, max_percent }, Some(series)) => {
            let null_pct = percent(series.null_count(), series.len());
            result(
                null_pct <= *max_percent,
                format!("Column '{column}' has {null_pct:.2}% nulls (max allowed: {max_percent:.2}%)"),
            )
        }
        (QualityGate::ValueRange { column, min, max }, Some(series)) => {
            let values = series.cast(&DataType::Float64)?;
            let values = values.f64()?;
            match (values.min(), values.max()) {
                (Some(lo), Some(hi)) => {
                    let passed = lo >= *min && hi <= *max;
                    result(
                        passed,
                        format!(
                            "Column '{column}' range [{lo}, {hi}] is {}within [{min}, {max}]",
                            if passed { "" } else { "not " }
                        ),
                    )
                }
                _ => result(false, format!("Column '{column}' has no numeric values")),
            }
        }
        (QualityGate::NoDuplicates { column }, Some(series)) => {
            let total = series.len();
            let unique = series.n_unique()?;
            result(
                total == unique,
                format!(
                    "Column '{column}' has {unique} unique values out of {total} (duplicates: {})",
                    total - unique
                ),
            )
        }
        (QualityGate::MatchesPattern { column, pattern }, Some(series)) => {
            let Ok(re) = Regex::new(pattern) else {
                return Ok(result(false, format!("Pattern '{pattern}' is not a valid regex")));
            };
            let text = series.cast(&DataType::String)?;
            let mismatches = text
                .str()?
                .into_iter()
                .flatten()
                .filter(|value| !re.is_match(value))
                .count();
            result(
                mismatches == 0,
                format!("Column '{column}' has {mismatches} value(s) not matching '{pattern}'"),
            )
        }
        (_, None) => result(false, "Gate needs a column".to_owned()),
    };
    Ok(outcome)
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> DataFrame {
        df! {
            "id" => [1i64, 2, 3, 3],
            "age" => [Some(20i64), None, Some(45), Some(61)],
            "email" => ["a@x.org", "b@x.org", "not-an-email", "d@x.org"],
        }
        .unwrap_or_default()
    }

    fn outcome(gate: QualityGate) -> Result<GateResult> {
        let mut results = evaluate_gates(&people(), &[gate])?;
        Ok(results.remove(0))
    }

    #[test]
    fn test_null_share_is_compared_with_limit() -> Result<()> {
        let lenient = outcome(QualityGate::MaxNullPercent {
            column: "age".to_owned(),
            max_percent: 25.0,
        })?;
        assert!(lenient.passed, "{lenient}");
        assert!(lenient.message.contains("25.00% nulls"));

        let strict = outcome(QualityGate::MaxNullPercent {
            column: "age".to_owned(),
            max_percent: 10.0,
        })?;
        assert!(!strict.passed);
        Ok(())
    }

    #[test]
    fn test_value_range_ignores_nulls() -> Result<()> {
        let inside = outcome(QualityGate::ValueRange {
            column: "age".to_owned(),
            min: 18.0,
            max: 65.0,
        })?;
        assert!(inside.passed, "{inside}");

        let outside = outcome(QualityGate::ValueRange {
            column: "age".to_owned(),
            min: 18.0,
            max: 60.0,
        })?;
        assert!(!outside.passed);
        Ok(())
    }

    #[test]
    fn test_duplicates_and_row_count() -> Result<()> {
        let dupes = outcome(QualityGate::NoDuplicates {
            column: "id".to_owned(),
        })?;
        assert!(!dupes.passed);
        assert!(dupes.message.contains("duplicates: 1"));

        assert!(outcome(QualityGate::RowCountRange { min: 1, max: 4 })?.passed);
        assert!(!outcome(QualityGate::RowCountRange { min: 5, max: 10 })?.passed);
        Ok(())
    }

    #[test]
    fn test_pattern_counts_mismatches() -> Result<()> {
        let result = outcome(QualityGate::MatchesPattern {
            column: "email".to_owned(),
            pattern: "^[^@]+@[^@]+$".to_owned(),
        })?;
        assert!(!result.passed);
        assert!(result.message.contains("1 value(s)"));
        Ok(())
    }

    #[test]
    fn test_missing_column_fails_the_gate() -> Result<()> {
        let results = evaluate_gates(
            &people(),
            &[
                QualityGate::ColumnExists {
                    column: "phone".to_owned(),
                },
                QualityGate::ColumnExists {
                    column: "email".to_owned(),
                },
                QualityGate::NoDuplicates {
                    column: "phone".to_owned(),
                },
            ],
        )?;
        let passed: Vec<bool> = results.iter().map(|r| r.passed).collect();
        assert_eq!(passed, [false, true, false]);
        assert!(!all_passed(&results));
        Ok(())
    }

    #[test]
    fn test_parameter_problems() {
        let bad_regex = QualityGate::MatchesPattern {
            column: "email".to_owned(),
            pattern: "([".to_owned(),
        };
        assert_eq!(bad_regex.parameter_problem().map(|p| p.0), Some("pattern"));

        let inverted = QualityGate::RowCountRange { min: 10, max: 1 };
        assert!(inverted.parameter_problem().is_some());

        let percent = QualityGate::MaxNullPercent {
            column: "age".to_owned(),
            max_percent: 150.0,
        };
        assert_eq!(percent.parameter_problem().map(|p| p.0), Some("max_percent"));

        assert_eq!(QualityGate::ColumnExists { column: "x".to_owned() }.parameter_problem(), None);
    }

    #[test]
    fn test_gate_json_shape() -> Result<()> {
        let gate: QualityGate = serde_json::from_str(
            r#"{"rule":"value_range","column":"age","min":0.0,"max":120.0}"#,
        )?;
        assert_eq!(gate.name(), "value_range");
        assert!(serde_json::from_str::<QualityGate>(r#"{"rule":"custom_sql"}"#).is_err());
        Ok(())
    }
}
