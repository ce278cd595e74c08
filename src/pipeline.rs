//! Declarative transformation pipelines.
//!
//! A [`PipelineSpec`] is an ordered list of typed [`Step`]s stored as JSON. It
//! can be validated against a schema without touching data, executed against
//! a file or an in-memory frame, and exported as a standalone script.
//!
//! The step set is closed and grouped roughly as:
//! - **Column management**: `drop_columns`, `rename_columns`
//! - **Text processing**: `trim_whitespace`, `regex_replace`, `extract_numbers`
//! - **Type conversion**: `cast_types`, `parse_dates`
//! - **Missing values**: `impute` (mean/median/mode/zero)
//! - **ML preprocessing**: `normalise_columns`, `one_hot_encode`, `clip_outliers`
//!
//! A spec may also carry [`QualityGate`]s, checked when a dataset version
//! enters the Validated stage.
//!
//! ```no_run
//! use brisket::cancel::CancellationToken;
//! use brisket::pipeline::{PipelineSpec, Step, execute};
//! use std::path::Path;
//!
//! let spec = PipelineSpec::new("Drop PII").with_step(Step::DropColumns {
//!     columns: vec!["email".to_owned()],
//! });
//!
//! let result = execute(
//!     &spec,
//!     Path::new("customers.csv"),
//!     Some(Path::new("clean.parquet")),
//!     &CancellationToken::new(),
//! )?;
//! println!("{}", result.summary());
//! # Ok::<(), brisket::error::Error>(())
//! ```

pub mod executor;
pub mod gates;
pub mod script;
pub mod spec;
pub mod step;
pub mod validation;

pub use executor::{
    ExecutionResult, PipelineOutput, StepProgress, apply_pipeline, apply_pipeline_with_progress,
    execute, execute_with,
};
pub use gates::{GateResult, QualityGate, all_passed, evaluate_gates};
pub use script::{to_scheduled_script, to_standalone_script};
pub use spec::{
    InputConfig, OutputConfig, PipelineSpec, SPEC_VERSION, SchemaConfig, SchemaMatchMode,
};
pub use step::{ImputeStrategy, NormalisationMethod, Step};
pub use validation::{ValidationError, validate_pipeline, validate_spec};
