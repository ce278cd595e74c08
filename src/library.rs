//! Saved pipeline specs and built-in templates.
//!
//! The library is a flat directory of `*.json` specs under
//! `<home>/pipelines`. Templates are compiled in and read-only; loading one
//! returns a fresh spec the caller can edit and save. Templates that name
//! columns use placeholders (`date`, `amount`, ...) meant to be renamed.

use crate::config::StandardPaths;
use crate::error::{Error, IoResultExt as _, Result};
use crate::pipeline::{
    ImputeStrategy, NormalisationMethod, OutputConfig, PipelineSpec, Step,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Listing entry for a saved spec
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecEntry {
    pub name: String,
    pub path: PathBuf,
    pub steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

const TEMPLATES: [PipelineTemplate; 8] = [
    PipelineTemplate {
        name: "Data Cleaning",
        description: "Trim whitespace, drop unwanted columns, impute missing values",
        category: "Cleaning",
    },
    PipelineTemplate {
        name: "ML Preprocessing",
        description: "Cast types, impute, z-score normalize, one-hot encode categoricals",
        category: "ML",
    },
    PipelineTemplate {
        name: "Date Normalization",
        description: "Parse date columns with common formats",
        category: "Cleaning",
    },
    PipelineTemplate {
        name: "Text Processing",
        description: "Trim, collapse repeated whitespace, normalize column names",
        category: "Cleaning",
    },
    PipelineTemplate {
        name: "Outlier Handling",
        description: "Clip to the 1st-99th percentile, then z-score normalize",
        category: "ML",
    },
    PipelineTemplate {
        name: "Column Selection",
        description: "Drop unwanted columns and rename the rest for clarity",
        category: "Structure",
    },
    PipelineTemplate {
        name: "Missing Data Handling",
        description: "Drop a sparse column, fill numeric gaps with the median and the rest with the mode",
        category: "Cleaning",
    },
    PipelineTemplate {
        name: "Type Conversion",
        description: "Cast columns to explicit types and parse dates with a custom format",
        category: "Structure",
    },
];

/// Every built-in template, in display order.
pub fn list_templates() -> &'static [PipelineTemplate] {
    &TEMPLATES
}

/// Build the spec for a template by name (case-insensitive).
pub fn load_template(name: &str) -> Result<PipelineSpec> {
    let template = TEMPLATES
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| Error::Library(format!("unknown template '{name}'")))?;

    let spec = PipelineSpec::new(template.name).with_description(template.description);
    let spec = match template.name {
        "Data Cleaning" => spec
            .with_step(Step::TrimWhitespace { columns: vec![] })
            .with_step(Step::DropColumns {
                columns: names(&["notes"]),
            })
            .with_step(Step::Impute {
                strategy: ImputeStrategy::Mode,
                columns: vec![],
            }),
        "ML Preprocessing" => spec
            .with_step(Step::CastTypes {
                columns: mapping(&[("amount", "f64")]),
            })
            .with_step(Step::Impute {
                strategy: ImputeStrategy::Mean,
                columns: vec![],
            })
            .with_step(Step::NormaliseColumns {
                method: NormalisationMethod::ZScore,
                columns: names(&["amount"]),
            })
            .with_step(Step::OneHotEncode {
                columns: vec![],
                drop_original: true,
            })
            .with_output(parquet_output()),
        "Date Normalization" => spec.with_step(Step::ParseDates {
            columns: mapping(&[("date", "%Y-%m-%d"), ("timestamp", "%Y-%m-%d %H:%M:%S")]),
        }),
        "Text Processing" => spec
            .with_step(Step::TrimWhitespace { columns: vec![] })
            .with_step(Step::RegexReplace {
                columns: names(&["description"]),
                pattern: r"\s+".to_owned(),
                replacement: " ".to_owned(),
            })
            .with_step(Step::RenameColumns {
                mapping: mapping(&[("Description", "description")]),
            }),
        "Outlier Handling" => spec
            .with_step(Step::ClipOutliers {
                columns: names(&["amount"]),
                lower_quantile: 0.01,
                upper_quantile: 0.99,
            })
            .with_step(Step::NormaliseColumns {
                method: NormalisationMethod::ZScore,
                columns: names(&["amount"]),
            }),
        "Column Selection" => spec
            .with_step(Step::DropColumns {
                columns: names(&["internal_id", "notes"]),
            })
            .with_step(Step::RenameColumns {
                mapping: mapping(&[("cust_nm", "customer_name")]),
            }),
        "Missing Data Handling" => spec
            .with_step(Step::DropColumns {
                columns: names(&["sparse_column"]),
            })
            .with_step(Step::Impute {
                strategy: ImputeStrategy::Median,
                columns: vec![],
            })
            .with_step(Step::Impute {
                strategy: ImputeStrategy::Mode,
                columns: vec![],
            }),
        _ => spec
            .with_step(Step::CastTypes {
                columns: mapping(&[("quantity", "i64"), ("price", "f64"), ("active", "Boolean")]),
            })
            .with_step(Step::ParseDates {
                columns: mapping(&[("order_date", "%d/%m/%Y")]),
            }),
    };

    Ok(spec)
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| (*c).to_owned()).collect()
}

fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

fn parquet_output() -> OutputConfig {
    OutputConfig {
        format: Some("parquet".to_owned()),
        path: Some("output_{date}.parquet".to_owned()),
        overwrite: true,
    }
}

/// Directory of saved pipeline specs.
#[derive(Debug, Clone)]
pub struct SpecLibrary {
    dir: PathBuf,
}

impl SpecLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_paths(paths: &StandardPaths) -> Self {
        Self::new(&paths.pipelines_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a spec with `name` is saved under
    pub fn spec_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(name)))
    }

    /// Save `spec` under its name, replacing any previous file. Returns the path.
    pub fn save_spec(&self, spec: &PipelineSpec) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.spec_path(&spec.name);
        spec.to_file(&path)?;
        tracing::info!(name = %spec.name, path = %path.display(), "Spec saved");
        Ok(path)
    }

    /// Load a spec by library name or by path
    pub fn load_spec(&self, name_or_path: &str) -> Result<PipelineSpec> {
        let direct = Path::new(name_or_path);
        if direct.is_file() {
            return PipelineSpec::from_file(direct);
        }

        let path = self.spec_path(name_or_path);
        if !path.is_file() {
            return Err(Error::Library(format!("no saved spec named '{name_or_path}'")));
        }
        PipelineSpec::from_file(path)
    }

    /// Delete a saved spec. Refuses anything outside the library directory.
    pub fn delete_spec(&self, name_or_path: &str) -> Result<()> {
        let candidate = Path::new(name_or_path);
        let path = if candidate.is_file() {
            candidate.to_path_buf()
        } else {
            self.spec_path(name_or_path)
        };

        if !path.is_file() {
            return Err(Error::Library(format!("no saved spec named '{name_or_path}'")));
        }

        let canonical = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        let library = self
            .dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", self.dir.display()))?;
        if !canonical.starts_with(&library) {
            return Err(Error::Library(format!(
                "refusing to delete {} outside the spec library",
                path.display()
            )));
        }

        fs::remove_file(&canonical).map_err(|e| Error::io_at("delete", &canonical, e))?;
        tracing::info!(path = %canonical.display(), "Spec deleted");
        Ok(())
    }

    /// Every readable spec in the library, sorted by name.
    ///
    /// Files that fail to parse are skipped.
    pub fn list_specs(&self) -> Result<Vec<SpecEntry>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut specs = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("Failed to read {}", self.dir.display()))?
        {
            let path = entry.context("Failed to read spec library entry")?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match PipelineSpec::from_file(&path) {
                Ok(spec) => specs.push(SpecEntry {
                    steps: spec.steps.len(),
                    name: spec.name,
                    description: spec.description,
                    path,
                }),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable spec");
                }
            }
        }

        specs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        Ok(specs)
    }
}

/// File-system safe stem for a spec name
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "pipeline".to_owned()
    } else {
        stem
    }
}
