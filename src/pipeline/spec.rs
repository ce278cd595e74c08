//! Pipeline spec data structures.
//!
//! A spec is persisted as a JSON object:
//!
//! ```json
//! {
//!   "version": "0.1",
//!   "name": "Drop PII",
//!   "description": "Remove columns we must not keep",
//!   "input": { "format": "csv" },
//!   "steps": [ { "op": "drop_columns", "columns": ["email", "phone"] } ],
//!   "output": { "format": "parquet", "path": "out/clean_{date}.parquet" },
//!   "quality_gates": [ { "rule": "column_exists", "column": "id" } ]
//! }
//! ```
//!
//! `version`, `name` and `steps` are required. Parsing fails closed: a missing
//! required field or an unknown step tag is an error, never a default.

use super::gates::QualityGate;
use super::step::Step;
use crate::error::{Error, IoResultExt as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current pipeline spec version
pub const SPEC_VERSION: &str = "0.1";

/// Spec versions this build can execute.
pub const SUPPORTED_SPEC_VERSIONS: &[&str] = &[SPEC_VERSION];

/// Root pipeline spec structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Spec format version
    pub version: String,

    /// Human-readable pipeline name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputConfig>,

    /// Optional schema requirements checked before any step runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaConfig>,

    /// Ordered sequence of transformation steps. Empty is a valid no-op.
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,

    /// Checked against the result when it enters the Validated stage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_gates: Vec<QualityGate>,
}

impl PipelineSpec {
    /// Create an empty pipeline at the current spec version
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: SPEC_VERSION.to_owned(),
            name: name.into(),
            description: None,
            input: None,
            schema: None,
            steps: Vec::new(),
            output: None,
            quality_gates: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_gate(mut self, gate: QualityGate) -> Self {
        self.quality_gates.push(gate);
        self
    }

    pub fn with_output(mut self, output: OutputConfig) -> Self {
        self.output = Some(output);
        self
    }

    /// An empty pipeline marks a stage transition without touching data.
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Load a pipeline spec from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline spec {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Parse a pipeline spec from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Save pipeline spec to a JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write pipeline spec {}", path.display()))
    }

    /// Serialize pipeline spec to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Output path from the spec, with `{date}` substituted.
    pub fn output_path(&self, date: Option<&str>) -> Option<PathBuf> {
        self.output
            .as_ref()
            .and_then(|output| output.path.as_deref())
            .filter(|template| !template.is_empty())
            .map(|template| expand_path_template(template, date))
    }

    pub fn output_format(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.format.as_deref())
    }

    pub fn input_format(&self) -> Option<&str> {
        self.input.as_ref().and_then(|i| i.format.as_deref())
    }
}

/// Input file configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// File format (csv, json, parquet); inferred from the extension when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Output file configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format (csv, json, parquet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Output path template (supports `{date}` substitution)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Whether to overwrite existing files
    #[serde(default = "default_true")]
    pub overwrite: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: None,
            path: None,
            overwrite: true,
        }
    }
}

/// Schema validation configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub match_mode: SchemaMatchMode,

    /// Columns the input must provide
    #[serde(default)]
    pub required_columns: Vec<String>,
}

/// Schema matching mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMatchMode {
    /// Required columns must exist, allow extra columns
    #[default]
    Tolerant,

    /// Exact match: required columns only, no extras
    Strict,
}

fn default_true() -> bool {
    true
}

/// Expand `{date}` in a path template; `date` defaults to today (`YYYY-MM-DD`).
pub fn expand_path_template(template: &str, date: Option<&str>) -> PathBuf {
    let today;
    let date = match date {
        Some(d) => d,
        None => {
            today = chrono::Local::now().format("%Y-%m-%d").to_string();
            &today
        }
    };
    PathBuf::from(template.replace("{date}", date))
}
