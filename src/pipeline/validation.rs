//! Pipeline validation against a schema.
//!
//! Validates pipeline specs against input data schemas before execution,
//! catching errors early with actionable messages. Validation never fails
//! itself: every problem found comes back as a [`ValidationError`], and an
//! empty list means the spec can run.
//!
//! The validator replays the pipeline over a simulated schema, so a step is
//! checked against the columns that exist when it runs, not against the input:
//! a dropped column is gone for later steps, a renamed one answers to its new
//! name, and one-hot encoding introduces `<column>_<value>` indicators.

use super::spec::{PipelineSpec, SUPPORTED_SPEC_VERSIONS, SchemaMatchMode};
use super::step::{ImputeStrategy, Step, is_valid_type_string};
use polars::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Validation error with helpful context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Zero-based index of the offending step, `None` for spec/schema level problems
    pub step_index: Option<usize>,
    pub op: Option<&'static str>,
    /// Parameter the problem is about (`columns`, `pattern`, ...)
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    fn step(step: &Step, step_index: usize, field: &str, message: impl Into<String>) -> Self {
        Self {
            step_index: Some(step_index),
            op: Some(step.op()),
            field: Some(field.to_owned()),
            message: message.into(),
        }
    }

    fn spec(field: &str, message: impl Into<String>) -> Self {
        Self {
            step_index: None,
            op: None,
            field: Some(field.to_owned()),
            message: message.into(),
        }
    }

    fn schema(message: impl Into<String>) -> Self {
        Self {
            step_index: None,
            op: None,
            field: None,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.step_index, self.op, self.field.as_deref()) {
            (Some(idx), Some(op), Some(field)) => {
                write!(f, "Step {} ({op}) {field}: {}", idx + 1, self.message)
            }
            (Some(idx), _, _) => write!(f, "Step {}: {}", idx + 1, self.message),
            (None, _, Some(field)) => write!(f, "Spec {field}: {}", self.message),
            (None, _, None) => write!(f, "Schema: {}", self.message),
        }
    }
}

/// Coarse column classification used to decide which steps apply to a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Text,
    Categorical,
    Temporal,
    Boolean,
    Other,
}

impl ColumnKind {
    pub fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::String => Self::Text,
            DataType::Boolean => Self::Boolean,
            DataType::Categorical(..) | DataType::Enum(..) => Self::Categorical,
            dt if dt.is_numeric() => Self::Numeric,
            dt if dt.is_temporal() => Self::Temporal,
            _ => Self::Other,
        }
    }

    /// Kind a `cast_types` type string produces.
    pub fn from_type_string(type_str: &str) -> Self {
        match type_str {
            "i64" | "f64" | "Numeric" => Self::Numeric,
            "String" | "Text" => Self::Text,
            "Boolean" => Self::Boolean,
            "Categorical" => Self::Categorical,
            "Temporal" => Self::Temporal,
            _ => Self::Other,
        }
    }

    pub fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Categorical)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Text => "text",
            Self::Categorical => "categorical",
            Self::Temporal => "temporal",
            Self::Boolean => "boolean",
            Self::Other => "unsupported",
        }
    }
}

/// Whether a column of kind `from` can be cast to `to` without a hard failure.
/// Values that do not convert become null.
pub fn cast_supported(from: ColumnKind, to: ColumnKind) -> bool {
    use ColumnKind::{Boolean, Other, Temporal};
    !matches!(
        (from, to),
        (Other, _) | (_, Other) | (Boolean, Temporal) | (Temporal, Boolean)
    )
}

/// Columns that an "empty means all" step applies to.
pub fn default_targets(step: &Step, schema: &Schema) -> Vec<String> {
    schema
        .iter()
        .filter(|(_, dtype)| applies_by_default(step, ColumnKind::of(dtype)))
        .map(|(name, _)| name.to_string())
        .collect()
}

fn applies_by_default(step: &Step, kind: ColumnKind) -> bool {
    match step {
        Step::TrimWhitespace { .. } => kind == ColumnKind::Text,
        Step::OneHotEncode { .. } => kind.is_textual(),
        Step::Impute { strategy, .. } if strategy.needs_numeric() => kind == ColumnKind::Numeric,
        Step::Impute { .. } => kind != ColumnKind::Other,
        _ => false,
    }
}

/// Ordered stand-in for the frame schema while replaying steps.
#[derive(Debug, Clone)]
struct SimulatedSchema {
    columns: Vec<(String, ColumnKind)>,
    /// Sources of one-hot encoding; `<source>_*` columns exist but their values are data-dependent
    encoded: Vec<String>,
    /// Indicator names dropped or renamed away after their source was encoded
    retired: HashSet<String>,
}

fn is_indicator_of(source: &str, name: &str) -> bool {
    name.strip_prefix(source)
        .is_some_and(|rest| rest.len() > 1 && rest.starts_with('_'))
}

impl SimulatedSchema {
    fn from_schema(schema: &Schema) -> Self {
        Self {
            columns: schema
                .iter()
                .map(|(name, dtype)| (name.to_string(), ColumnKind::of(dtype)))
                .collect(),
            encoded: Vec::new(),
            retired: HashSet::new(),
        }
    }

    fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kind)| *kind)
            .or_else(|| self.is_indicator(name).then_some(ColumnKind::Numeric))
    }

    /// A possible one-hot indicator that has not been removed since.
    fn is_indicator(&self, name: &str) -> bool {
        !self.retired.contains(name)
            && self
                .encoded
                .iter()
                .any(|source| is_indicator_of(source, name))
    }

    /// Whether indicators may still exist, so the frame cannot be known to be empty.
    fn has_live_indicators(&self) -> bool {
        !self.encoded.is_empty()
    }

    fn encode(&mut self, source: &str) {
        self.retired.retain(|name| !is_indicator_of(source, name));
        self.encoded.push(source.to_owned());
    }

    fn push(&mut self, name: &str, kind: ColumnKind) {
        self.retired.remove(name);
        self.columns.push((name.to_owned(), kind));
    }

    fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(n, _)| n.as_str())
    }

    fn names_where(&self, pred: impl Fn(ColumnKind) -> bool) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, kind)| pred(*kind))
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn remove(&mut self, name: &str) {
        self.columns.retain(|(n, _)| n != name);
        if self.is_indicator(name) {
            self.retired.insert(name.to_owned());
        }
    }

    fn set_kind(&mut self, name: &str, kind: ColumnKind) {
        if let Some(entry) = self.columns.iter_mut().find(|(n, _)| n == name) {
            entry.1 = kind;
        }
    }
}

/// Validate a pipeline spec against an input schema
pub fn validate_pipeline(spec: &PipelineSpec, input_schema: &Schema) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !SUPPORTED_SPEC_VERSIONS.contains(&spec.version.as_str()) {
        errors.push(ValidationError::spec(
            "version",
            format!(
                "unsupported spec version '{}', expected one of {SUPPORTED_SPEC_VERSIONS:?}",
                spec.version
            ),
        ));
    }

    if spec.name.trim().is_empty() {
        errors.push(ValidationError::spec("name", "pipeline name must not be empty"));
    }

    validate_schema_requirements(spec, input_schema, &mut errors);

    let mut schema = SimulatedSchema::from_schema(input_schema);
    for (idx, step) in spec.steps.iter().enumerate() {
        validate_step(step, idx, &mut schema, &mut errors);
    }

    for (idx, gate) in spec.quality_gates.iter().enumerate() {
        if let Some((field, message)) = gate.parameter_problem() {
            errors.push(ValidationError::spec(
                "quality_gates",
                format!("gate {} ({}) {field}: {message}", idx + 1, gate.name()),
            ));
        }
    }

    errors
}

/// Same as [`validate_pipeline`], rendered as display strings.
pub fn validate_spec(spec: &PipelineSpec, input_schema: &Schema) -> Vec<String> {
    validate_pipeline(spec, input_schema)
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn validate_schema_requirements(
    spec: &PipelineSpec,
    input_schema: &Schema,
    errors: &mut Vec<ValidationError>,
) {
    let Some(config) = &spec.schema else {
        return;
    };

    let input_cols: BTreeSet<&str> = input_schema.iter_names().map(|s| s.as_str()).collect();

    for required in &config.required_columns {
        if !input_cols.contains(required.as_str()) {
            errors.push(ValidationError::schema(format!(
                "required column '{required}' not found in input"
            )));
        }
    }

    if config.match_mode == SchemaMatchMode::Strict {
        let required: BTreeSet<&str> = config.required_columns.iter().map(String::as_str).collect();
        let extra: Vec<&str> = input_cols.difference(&required).copied().collect();
        if !extra.is_empty() {
            errors.push(ValidationError::schema(format!(
                "strict mode: unexpected columns {extra:?}"
            )));
        }
    }
}

/// Validate a single step and update the simulated schema
#[expect(clippy::too_many_lines)]
fn validate_step(
    step: &Step,
    idx: usize,
    schema: &mut SimulatedSchema,
    errors: &mut Vec<ValidationError>,
) {
    if step.referenced_columns().is_empty() && !step.empty_means_all() {
        errors.push(ValidationError::step(
            step,
            idx,
            "columns",
            "at least one column is required",
        ));
        return;
    }

    match step {
        Step::DropColumns { columns } => {
            require_columns(step, idx, columns, schema, None, errors);
            for col in columns {
                schema.remove(col);
            }
            if schema.columns.is_empty() && !schema.has_live_indicators() {
                errors.push(ValidationError::step(
                    step,
                    idx,
                    "columns",
                    "dropping every column would leave an empty frame",
                ));
            }
        }

        Step::RenameColumns { mapping } => {
            let sources: Vec<String> = mapping.keys().cloned().collect();
            require_columns(step, idx, &sources, schema, None, errors);

            for (from, to) in mapping {
                if to.trim().is_empty() {
                    errors.push(ValidationError::step(
                        step,
                        idx,
                        "mapping",
                        format!("new name for '{from}' must not be empty"),
                    ));
                }
            }

            // renames are applied simultaneously, so check the resulting name set
            let mut seen = HashSet::new();
            let resulting = schema
                .names()
                .filter(|name| !mapping.contains_key(*name))
                .map(str::to_owned)
                .chain(mapping.values().cloned())
                .collect::<Vec<_>>();
            for name in resulting {
                if !seen.insert(name.clone()) {
                    errors.push(ValidationError::step(
                        step,
                        idx,
                        "mapping",
                        format!("renaming would produce duplicate column '{name}'"),
                    ));
                }
            }

            for (name, _) in &mut schema.columns {
                if let Some(new_name) = mapping.get(name.as_str()) {
                    name.clone_from(new_name);
                }
            }
            // renamed indicators become ordinary columns under their new name
            for (from, to) in mapping {
                if !schema.columns.iter().any(|(n, _)| n == to) && schema.is_indicator(from) {
                    schema.retired.insert(from.clone());
                    schema.push(to, ColumnKind::Numeric);
                }
            }
        }

        Step::TrimWhitespace { columns } => {
            require_columns(step, idx, columns, schema, Some(ColumnKind::Text), errors);
        }

        Step::CastTypes { columns } => {
            let names: Vec<String> = columns.keys().cloned().collect();
            require_columns(step, idx, &names, schema, None, errors);

            for (col, type_str) in columns {
                if is_valid_type_string(type_str) {
                    let target = ColumnKind::from_type_string(type_str);
                    if let Some(source) = schema.kind(col)
                        && !cast_supported(source, target)
                    {
                        errors.push(ValidationError::step(
                            step,
                            idx,
                            "columns",
                            format!(
                                "cannot cast {} column '{col}' to {type_str}",
                                source.label()
                            ),
                        ));
                    }
                    schema.set_kind(col, target);
                } else {
                    errors.push(ValidationError::step(
                        step,
                        idx,
                        "columns",
                        format!("invalid type string '{type_str}' for column '{col}'"),
                    ));
                }
            }
        }

        Step::ParseDates { columns } => {
            let names: Vec<String> = columns.keys().cloned().collect();
            require_columns(step, idx, &names, schema, Some(ColumnKind::Text), errors);

            for (col, format) in columns {
                if !format.is_empty() && !is_valid_date_format(format) {
                    errors.push(ValidationError::step(
                        step,
                        idx,
                        "columns",
                        format!("invalid date format '{format}' for column '{col}'"),
                    ));
                }
                schema.set_kind(col, ColumnKind::Temporal);
            }
        }

        Step::Impute { strategy, columns } => {
            let kind = strategy.needs_numeric().then_some(ColumnKind::Numeric);
            require_columns(step, idx, columns, schema, kind, errors);
            if *strategy == ImputeStrategy::Mode {
                for col in columns {
                    if schema.kind(col) == Some(ColumnKind::Other) {
                        errors.push(ValidationError::step(
                            step,
                            idx,
                            "columns",
                            format!("column '{col}' has an unsupported type"),
                        ));
                    }
                }
            }
        }

        Step::OneHotEncode {
            columns,
            drop_original,
        } => {
            require_columns(step, idx, columns, schema, None, errors);
            let targets = if columns.is_empty() {
                schema.names_where(ColumnKind::is_textual)
            } else {
                columns.clone()
            };

            for col in &targets {
                if schema.kind(col) == Some(ColumnKind::Other) {
                    errors.push(ValidationError::step(
                        step,
                        idx,
                        "columns",
                        format!("column '{col}' has an unsupported type"),
                    ));
                }
                schema.encode(col);
                if *drop_original {
                    schema.remove(col);
                }
            }
        }

        Step::NormaliseColumns { columns, .. } => {
            require_columns(step, idx, columns, schema, Some(ColumnKind::Numeric), errors);
        }

        Step::ClipOutliers {
            columns,
            lower_quantile,
            upper_quantile,
        } => {
            require_columns(step, idx, columns, schema, Some(ColumnKind::Numeric), errors);

            for (field, value) in [
                ("lower_quantile", *lower_quantile),
                ("upper_quantile", *upper_quantile),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    errors.push(ValidationError::step(
                        step,
                        idx,
                        field,
                        format!("{value} is outside 0..=1"),
                    ));
                }
            }

            if lower_quantile >= upper_quantile {
                errors.push(ValidationError::step(
                    step,
                    idx,
                    "lower_quantile",
                    format!("must be less than upper_quantile ({lower_quantile} >= {upper_quantile})"),
                ));
            }
        }

        Step::ExtractNumbers { columns } => {
            require_columns(step, idx, columns, schema, Some(ColumnKind::Text), errors);
            for col in columns {
                schema.set_kind(col, ColumnKind::Numeric);
            }
        }

        Step::RegexReplace {
            columns, pattern, ..
        } => {
            require_columns(step, idx, columns, schema, Some(ColumnKind::Text), errors);

            if pattern.is_empty() {
                errors.push(ValidationError::step(
                    step,
                    idx,
                    "pattern",
                    "pattern must not be empty",
                ));
            } else if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ValidationError::step(
                    step,
                    idx,
                    "pattern",
                    format!("invalid regex: {e}"),
                ));
            }
        }
    }
}

/// Every column must exist at this point of the pipeline and, if `kind` is
/// given, be of that kind.
fn require_columns(
    step: &Step,
    idx: usize,
    targets: &[String],
    schema: &SimulatedSchema,
    kind: Option<ColumnKind>,
    errors: &mut Vec<ValidationError>,
) {
    let field = match step {
        Step::RenameColumns { .. } => "mapping",
        _ => "columns",
    };

    for col in targets {
        match schema.kind(col) {
            None => errors.push(ValidationError::step(
                step,
                idx,
                field,
                format!("column '{col}' not found"),
            )),
            Some(actual) => {
                if let Some(expected) = kind
                    && actual != expected
                {
                    errors.push(ValidationError::step(
                        step,
                        idx,
                        field,
                        format!(
                            "column '{col}' is {}, expected {}",
                            actual.label(),
                            expected.label()
                        ),
                    ));
                }
            }
        }
    }
}

fn is_valid_date_format(format: &str) -> bool {
    use chrono::format::{Item, StrftimeItems};
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}
