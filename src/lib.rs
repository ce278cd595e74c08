//! # Brisket - versioned datasets and declarative transform pipelines
//!
//! Brisket keeps every dataset as an immutable lineage of versions and moves
//! data between them with JSON pipeline specs.
//!
//! ## Quick Start
//!
//! ```no_run
//! use brisket::cancel::CancellationToken;
//! use brisket::pipeline::{PipelineSpec, Step, execute};
//! use std::path::Path;
//!
//! let spec = PipelineSpec::from_file("clean_customers.json")?;
//! let report = execute(
//!     &spec,
//!     Path::new("customers.csv"),
//!     Some(Path::new("customers_clean.parquet")),
//!     &CancellationToken::new(),
//! )?;
//! println!("{}", report.summary());
//! # Ok::<(), brisket::error::Error>(())
//! ```
//!
//! ## Core Modules
//!
//! - [`pipeline`]: step model, spec (de)serialization, validator, executor, script export
//! - [`lifecycle`]: dataset registry, version tree, stages, storage, per-dataset locking
//! - [`library`]: saved specs and built-in templates
//! - [`frame`]: tabular file I/O
//! - [`config`]: settings file, environment overrides, standard paths
//! - [`error`]: crate error type
//! - [`logging`]: tracing setup
//!
//! ## Key Concepts
//!
//! ### Validate, then execute
//!
//! A spec is checked against a schema before any data is touched. Validation
//! returns every problem it finds as data; execution refuses to start if there
//! are any, and applies steps strictly in order when there are none:
//!
//! ```no_run
//! use brisket::pipeline::{PipelineSpec, validate_pipeline};
//!
//! let spec = PipelineSpec::from_file("spec.json")?;
//! let schema = brisket::frame::read_schema("input.csv".as_ref(), None)?;
//! for problem in validate_pipeline(&spec, &schema) {
//!     eprintln!("{problem}");
//! }
//! # Ok::<(), brisket::error::Error>(())
//! ```
//!
//! ### Immutable versioning
//!
//! The raw ingestion is never modified. Each pipeline run against a version
//! produces a child version with its own data, so any version can be reloaded,
//! compared or branched from later. See [`lifecycle`].

#![warn(clippy::all, rust_2018_idioms)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod frame;
pub mod library;
pub mod lifecycle;
pub mod logging;
pub mod pipeline;
