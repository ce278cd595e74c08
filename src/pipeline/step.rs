//! Transformation steps.
//!
//! A [`Step`] is one operation of a pipeline. The set of operations is closed:
//! each variant is serialized as a JSON object whose `op` field carries the
//! operation tag, and any tag not listed here fails to deserialize.
//!
//! ```json
//! { "op": "drop_columns", "columns": ["age"] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Transformation step (tagged enum)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Drop specified columns
    DropColumns { columns: Vec<String> },

    /// Rename columns according to mapping (old name -> new name)
    RenameColumns { mapping: BTreeMap<String, String> },

    /// Trim leading/trailing whitespace. Empty `columns` means every text column.
    TrimWhitespace { columns: Vec<String> },

    /// Cast columns to target data types
    CastTypes {
        /// Column name -> type string (`i64`, `f64`, `String`, `Boolean`,
        /// `Numeric`, `Text`, `Categorical`, `Temporal`)
        columns: BTreeMap<String, String>,
    },

    /// Parse text columns as datetimes
    ParseDates {
        /// Column name -> strftime format; an empty format lets the parser infer
        columns: BTreeMap<String, String>,
    },

    /// Fill missing values. Empty `columns` means every column the strategy applies to.
    Impute {
        strategy: ImputeStrategy,
        columns: Vec<String>,
    },

    /// One-hot encode categorical columns into `<column>_<value>` indicator columns.
    /// Empty `columns` means every text column.
    OneHotEncode {
        columns: Vec<String>,
        drop_original: bool,
    },

    /// Rescale numeric columns
    #[serde(alias = "normalize_columns")]
    NormaliseColumns {
        method: NormalisationMethod,
        columns: Vec<String>,
    },

    /// Clip values outside the given quantiles
    ClipOutliers {
        columns: Vec<String>,
        lower_quantile: f64,
        upper_quantile: f64,
    },

    /// Replace text with the first number found in it
    ExtractNumbers { columns: Vec<String> },

    /// Regex search-and-replace on text columns
    RegexReplace {
        columns: Vec<String>,
        pattern: String,
        replacement: String,
    },
}

/// Imputation strategy for missing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputeStrategy {
    Mean,
    Median,
    Mode,
    Zero,
}

impl ImputeStrategy {
    /// Strategies whose fill value is a number. Only `mode` works on any column.
    pub fn needs_numeric(self) -> bool {
        matches!(self, Self::Mean | Self::Median | Self::Zero)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
            Self::Zero => "zero",
        }
    }
}

/// Normalization method for numeric columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalisationMethod {
    ZScore,
    MinMax,
}

impl Step {
    /// The `op` tag this step serializes with.
    pub fn op(&self) -> &'static str {
        match self {
            Self::DropColumns { .. } => "drop_columns",
            Self::RenameColumns { .. } => "rename_columns",
            Self::TrimWhitespace { .. } => "trim_whitespace",
            Self::CastTypes { .. } => "cast_types",
            Self::ParseDates { .. } => "parse_dates",
            Self::Impute { .. } => "impute",
            Self::OneHotEncode { .. } => "one_hot_encode",
            Self::NormaliseColumns { .. } => "normalise_columns",
            Self::ClipOutliers { .. } => "clip_outliers",
            Self::ExtractNumbers { .. } => "extract_numbers",
            Self::RegexReplace { .. } => "regex_replace",
        }
    }

    /// Column names this step reads, in declaration order.
    ///
    /// For renames these are the source names; the targets are produced, not read.
    pub fn referenced_columns(&self) -> Vec<&str> {
        match self {
            Self::RenameColumns { mapping } => mapping.keys().map(String::as_str).collect(),
            Self::CastTypes { columns } | Self::ParseDates { columns } => {
                columns.keys().map(String::as_str).collect()
            }
            Self::DropColumns { columns }
            | Self::TrimWhitespace { columns }
            | Self::Impute { columns, .. }
            | Self::OneHotEncode { columns, .. }
            | Self::NormaliseColumns { columns, .. }
            | Self::ClipOutliers { columns, .. }
            | Self::ExtractNumbers { columns }
            | Self::RegexReplace { columns, .. } => columns.iter().map(String::as_str).collect(),
        }
    }

    /// Whether an empty column list means "all applicable columns" for this step.
    pub fn empty_means_all(&self) -> bool {
        matches!(
            self,
            Self::TrimWhitespace { .. } | Self::Impute { .. } | Self::OneHotEncode { .. }
        )
    }

    /// Short human description, used in logs and run summaries.
    pub fn describe(&self) -> String {
        let targets = |cols: &[String]| {
            if cols.is_empty() {
                "all applicable columns".to_owned()
            } else {
                cols.join(", ")
            }
        };

        match self {
            Self::DropColumns { columns } => format!("Drop {}", targets(columns)),
            Self::RenameColumns { mapping } => {
                let pairs: Vec<_> = mapping.iter().map(|(k, v)| format!("{k} -> {v}")).collect();
                format!("Rename {}", pairs.join(", "))
            }
            Self::TrimWhitespace { columns } => format!("Trim whitespace in {}", targets(columns)),
            Self::CastTypes { columns } => {
                let pairs: Vec<_> = columns.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                format!("Cast {}", pairs.join(", "))
            }
            Self::ParseDates { columns } => {
                let names: Vec<_> = columns.keys().cloned().collect();
                format!("Parse dates in {}", names.join(", "))
            }
            Self::Impute { strategy, columns } => {
                format!("Impute {} in {}", strategy.as_str(), targets(columns))
            }
            Self::OneHotEncode {
                columns,
                drop_original,
            } => format!(
                "One-hot encode {}{}",
                targets(columns),
                if *drop_original { " (drop original)" } else { "" }
            ),
            Self::NormaliseColumns { method, columns } => {
                format!("Normalise {} with {method}", targets(columns))
            }
            Self::ClipOutliers {
                columns,
                lower_quantile,
                upper_quantile,
            } => format!(
                "Clip {} to [{lower_quantile}, {upper_quantile}] quantiles",
                targets(columns)
            ),
            Self::ExtractNumbers { columns } => format!("Extract numbers from {}", targets(columns)),
            Self::RegexReplace {
                columns, pattern, ..
            } => format!("Replace /{pattern}/ in {}", targets(columns)),
        }
    }
}

impl fmt::Display for NormalisationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZScore => f.write_str("z-score"),
            Self::MinMax => f.write_str("min-max"),
        }
    }
}

/// Type strings accepted by `cast_types`.
pub const TYPE_STRINGS: &[&str] = &[
    "i64",
    "f64",
    "String",
    "Boolean",
    "Numeric",
    "Text",
    "Categorical",
    "Temporal",
];

pub fn is_valid_type_string(type_str: &str) -> bool {
    TYPE_STRINGS.contains(&type_str)
}
