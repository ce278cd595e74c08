use anyhow::{Context as _, Result};
use brisket::cancel::CancellationToken;
use brisket::config::Settings;
use brisket::error::Error;
use brisket::frame;
use brisket::library::{self, SpecLibrary};
use brisket::lifecycle::{DatasetRegistry, LifecycleStage, PublishMode, VersionQuery};
use brisket::pipeline::spec::expand_path_template;
use brisket::pipeline::{
    ExecutionResult, PipelineSpec, execute_with, to_scheduled_script, to_standalone_script,
    validate_pipeline,
};
use clap::{Args, Parser, Subcommand};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "brisket",
    version,
    about = "Versioned dataset lifecycle and declarative transform pipelines"
)]
pub struct Cli {
    /// Data root for datasets, published snapshots and saved specs
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a pipeline spec against an input file
    Run(RunArgs),

    /// Check a spec against an input file's schema without running it
    Validate {
        #[arg(short, long)]
        spec: PathBuf,

        /// File whose schema the spec is checked against
        #[arg(short, long)]
        input: PathBuf,

        /// Print problems as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export a spec as a standalone `PowerShell` script
    Script {
        #[arg(short, long)]
        spec: PathBuf,

        /// Default output path baked into the script (may contain {date})
        #[arg(long)]
        output_path: PathBuf,

        /// Append Task Scheduler instructions for this input file
        #[arg(long)]
        scheduled_input: Option<PathBuf>,

        /// Write the script here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Manage the saved spec library
    #[command(subcommand)]
    Specs(SpecsCommand),

    /// Built-in pipeline templates
    #[command(subcommand)]
    Templates(TemplatesCommand),

    /// Versioned datasets
    #[command(subcommand)]
    Dataset(DatasetCommand),
}

#[derive(Args)]
pub struct RunArgs {
    #[arg(short, long)]
    spec: PathBuf,

    #[arg(short, long)]
    input: PathBuf,

    /// Output path (may contain {date}); defaults to the spec's output path
    #[arg(short, long)]
    output: Option<String>,

    /// Date substituted for {date} (default: today, YYYY-MM-DD)
    #[arg(long)]
    date: Option<String>,

    /// Append a one-line record of this run to a log file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Treat a run that produced warnings as failed
    #[arg(long)]
    fail_on_warnings: bool,

    /// Print the execution report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
pub enum SpecsCommand {
    /// List saved specs
    List,
    /// Print a saved spec
    Show { name: String },
    /// Copy a spec file into the library
    Save {
        file: PathBuf,
        /// Save under a different name
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a saved spec
    Delete { name: String },
}

#[derive(Subcommand)]
pub enum TemplatesCommand {
    /// List built-in templates
    List,
    /// Print a template as a spec
    Show {
        name: String,
        /// Also save it into the spec library
        #[arg(long)]
        save: bool,
    },
}

#[derive(Subcommand)]
pub enum DatasetCommand {
    /// Ingest a file as the raw version of a new dataset
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        source: PathBuf,
    },
    /// List datasets
    List,
    /// List the versions of a dataset
    Versions { dataset: Uuid },
    /// Derive a new version by running a pipeline
    Advance {
        dataset: Uuid,
        /// Target stage
        #[arg(long)]
        stage: LifecycleStage,
        /// Parent version (default: latest)
        #[arg(long)]
        parent: Option<Uuid>,
        /// Pipeline spec file; without one the data is carried over unchanged
        #[arg(long, conflicts_with = "template")]
        spec: Option<PathBuf>,
        /// Built-in template to run instead of a spec file
        #[arg(long)]
        template: Option<String>,
    },
    /// Publish a version as a view or a snapshot
    Publish {
        dataset: Uuid,
        /// Version to publish (default: latest)
        #[arg(long)]
        version: Option<Uuid>,
        #[arg(long, default_value = "view")]
        mode: PublishMode,
    },
    /// Compare two versions
    Diff {
        dataset: Uuid,
        from: Uuid,
        to: Uuid,
        #[arg(long)]
        json: bool,
    },
    /// Delete a dataset (published snapshots are kept)
    Delete { dataset: Uuid },
}

/// Map an error to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Validation(_) | Error::QualityGate(_)) => 2,
        Some(Error::Execution { .. }) => 3,
        Some(Error::Aborted { .. }) => 4,
        Some(Error::LockContention { .. }) => 5,
        _ => 1,
    }
}

pub fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if let Some(home) = cli.home {
        settings.home = home;
    }

    let cancel = CancellationToken::new();
    match cli.command {
        Commands::Run(args) => {
            cancel_on_interrupt(cancel.clone());
            handle_run(&settings, &args, &cancel)
        }
        Commands::Validate { spec, input, json } => handle_validate(&spec, &input, json),
        Commands::Script {
            spec,
            output_path,
            scheduled_input,
            out,
        } => {
            handle_script(&spec, &output_path, scheduled_input.as_deref(), out.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Specs(command) => {
            handle_specs(&SpecLibrary::from_paths(&settings.paths()), command)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Templates(command) => {
            handle_templates(&SpecLibrary::from_paths(&settings.paths()), command)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dataset(command) => {
            cancel_on_interrupt(cancel.clone());
            handle_dataset(settings, command, &cancel)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Cancel `token` on the first Ctrl-C, exit on the second.
///
/// The listener gets its own thread and a single-threaded runtime; the
/// pipeline itself stays synchronous and notices the token between steps.
#[expect(clippy::exit)] // a second Ctrl+C quits without waiting for the step
fn cancel_on_interrupt(token: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("interrupt".to_owned())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "Interrupt handler unavailable");
                    return;
                }
            };
            runtime.block_on(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
                    return;
                }
                tracing::warn!("Interrupt received, stopping after the current step");
                eprintln!("Interrupted: stopping after the current step (Ctrl+C again to quit)");
                token.cancel();

                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Failed to start interrupt handler");
    }
}

fn handle_run(settings: &Settings, args: &RunArgs, cancel: &CancellationToken) -> Result<ExitCode> {
    let spec = PipelineSpec::from_file(&args.spec)?;
    let output = match (&args.output, args.date.as_deref()) {
        (Some(output), date) => Some(expand_path_template(output, date)),
        (None, Some(date)) => spec.output_path(Some(date)),
        (None, None) => None,
    };

    let outcome = execute_with(
        &spec,
        &args.input,
        output.as_deref(),
        cancel,
        &settings.execution,
    );

    if let Some(log) = &args.log {
        append_run_log(log, &spec, &args.input, &outcome)?;
    }
    let report = outcome?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        if let Some(path) = &report.output_path {
            println!("Output: {}", path.display());
        }
        for warning in &report.warnings {
            println!("warning: {warning}");
        }
    }

    if args.fail_on_warnings && !report.warnings.is_empty() {
        eprintln!(
            "error: {} warning(s) raised and --fail-on-warnings is set",
            report.warnings.len()
        );
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}

fn append_run_log(
    log: &Path,
    spec: &PipelineSpec,
    input: &Path,
    outcome: &brisket::error::Result<ExecutionResult>,
) -> Result<()> {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let mut lines = vec![match outcome {
        Ok(report) => format!(
            "[{stamp}] OK pipeline='{}' input={} {}",
            spec.name,
            input.display(),
            report.summary()
        ),
        Err(e) => format!(
            "[{stamp}] {} pipeline='{}' input={} {}",
            e.code(),
            spec.name,
            input.display(),
            e.to_string().replace('\n', "; ")
        ),
    }];
    if let Ok(report) = outcome {
        lines.extend(report.warnings.iter().map(|w| format!("[{stamp}]   warning: {w}")));
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .with_context(|| format!("Failed to open run log {}", log.display()))?;
    for line in lines {
        writeln!(file, "{line}").context("Failed to write run log")?;
    }
    Ok(())
}

fn handle_validate(spec_path: &Path, input: &Path, json: bool) -> Result<ExitCode> {
    let spec = PipelineSpec::from_file(spec_path)?;
    let schema = frame::read_schema(input, spec.input_format())?;
    let problems = validate_pipeline(&spec, &schema);

    if json {
        println!("{}", serde_json::to_string_pretty(&problems)?);
    } else if problems.is_empty() {
        println!("Spec '{}' is valid for {}", spec.name, input.display());
    } else {
        for problem in &problems {
            println!("{problem}");
        }
    }

    Ok(if problems.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn handle_script(
    spec_path: &Path,
    output_path: &Path,
    scheduled_input: Option<&Path>,
    out: Option<&Path>,
) -> Result<()> {
    let spec = PipelineSpec::from_file(spec_path)?;
    let script = match scheduled_input {
        Some(input) => to_scheduled_script(&spec, output_path, input)?,
        None => to_standalone_script(&spec, output_path)?,
    };

    match out {
        Some(path) => {
            std::fs::write(path, script)
                .with_context(|| format!("Failed to write script {}", path.display()))?;
            println!("Script written to {}", path.display());
        }
        None => print!("{script}"),
    }
    Ok(())
}

fn handle_specs(library: &SpecLibrary, command: SpecsCommand) -> Result<()> {
    match command {
        SpecsCommand::List => {
            let specs = library.list_specs()?;
            if specs.is_empty() {
                println!("No saved specs in {}", library.dir().display());
            }
            for entry in specs {
                println!(
                    "{:<30} {:>3} step(s)  {}",
                    entry.name,
                    entry.steps,
                    entry.path.display()
                );
            }
        }
        SpecsCommand::Show { name } => {
            println!("{}", library.load_spec(&name)?.to_json()?);
        }
        SpecsCommand::Save { file, name } => {
            let mut spec = PipelineSpec::from_file(&file)?;
            if let Some(name) = name {
                spec.name = name;
            }
            let path = library.save_spec(&spec)?;
            println!("Saved '{}' to {}", spec.name, path.display());
        }
        SpecsCommand::Delete { name } => {
            library.delete_spec(&name)?;
            println!("Deleted '{name}'");
        }
    }
    Ok(())
}

fn handle_templates(library: &SpecLibrary, command: TemplatesCommand) -> Result<()> {
    match command {
        TemplatesCommand::List => {
            for template in library::list_templates() {
                println!(
                    "{:<24} [{}] {}",
                    template.name, template.category, template.description
                );
            }
        }
        TemplatesCommand::Show { name, save } => {
            let spec = library::load_template(&name)?;
            println!("{}", spec.to_json()?);
            if save {
                let path = library.save_spec(&spec)?;
                println!("Saved to {}", path.display());
            }
        }
    }
    Ok(())
}

fn handle_dataset(
    settings: Settings,
    command: DatasetCommand,
    cancel: &CancellationToken,
) -> Result<()> {
    let registry = DatasetRegistry::open(settings).context("Failed to open dataset registry")?;

    match command {
        DatasetCommand::Create { name, source } => {
            let id = registry.create_dataset(&name, &source)?;
            println!("{id}");
        }
        DatasetCommand::List => {
            for record in registry.list_datasets() {
                println!(
                    "{}  {:<24} {}",
                    record.id,
                    record.name,
                    record.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        DatasetCommand::Versions { dataset } => print_versions(&registry, &dataset)?,
        DatasetCommand::Advance {
            dataset,
            stage,
            parent,
            spec,
            template,
        } => advance(
            &registry,
            &dataset,
            stage,
            parent,
            spec.as_deref(),
            template.as_deref(),
            cancel,
        )?,
        DatasetCommand::Publish {
            dataset,
            version,
            mode,
        } => {
            let version = match version {
                Some(id) => id,
                None => registry.find_version(&dataset, &VersionQuery::new())?.id,
            };
            let published = registry.publish_version(&dataset, &version, mode)?;
            println!("{}  {}", published.id, published.data_location.path().display());
        }
        DatasetCommand::Diff {
            dataset,
            from,
            to,
            json,
        } => print_diff(&registry, &dataset, &from, &to, json)?,
        DatasetCommand::Delete { dataset } => {
            registry.delete_dataset(&dataset)?;
            println!("Deleted {dataset}");
        }
    }
    Ok(())
}

fn advance(
    registry: &DatasetRegistry,
    dataset: &Uuid,
    stage: LifecycleStage,
    parent: Option<Uuid>,
    spec: Option<&Path>,
    template: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let parent = match parent {
        Some(id) => id,
        None => registry.find_version(dataset, &VersionQuery::new())?.id,
    };
    let pipeline = match (spec, template) {
        (Some(path), _) => PipelineSpec::from_file(path)?,
        (None, Some(name)) => library::load_template(name)?,
        (None, None) => PipelineSpec::new(format!("advance to {stage}")),
    };

    let version = registry.advance(dataset, &parent, pipeline, stage, cancel)?;
    println!("{}", version.id);
    for warning in &version.metadata.warnings {
        println!("warning: {warning}");
    }
    Ok(())
}

fn print_diff(
    registry: &DatasetRegistry,
    dataset: &Uuid,
    from: &Uuid,
    to: &Uuid,
    json: bool,
) -> Result<()> {
    let diff = registry.compute_diff(dataset, from, to)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(());
    }

    println!("{}", diff.summary_text());
    for column in &diff.schema_changes.columns_added {
        println!("  + {column}");
    }
    for column in &diff.schema_changes.columns_removed {
        println!("  - {column}");
    }
    for (old, new) in &diff.schema_changes.columns_renamed {
        println!("  {old} -> {new}");
    }
    for change in &diff.schema_changes.type_changes {
        println!("  ~ {}: {} -> {}", change.column, change.old_type, change.new_type);
    }
    for change in &diff.statistical_changes {
        let fmt = |v: Option<f64>| v.map_or_else(|| "null".to_owned(), |v| format!("{v:.4}"));
        println!(
            "  {} {}: {} -> {}",
            change.column,
            change.metric,
            fmt(change.value_v1),
            fmt(change.value_v2)
        );
    }
    Ok(())
}

fn print_versions(registry: &DatasetRegistry, dataset: &Uuid) -> Result<()> {
    for version in registry.list_versions(dataset)? {
        let parent = version
            .parent_id
            .map_or_else(|| "-".to_owned(), |id| id.to_string());
        let mode = version.publish_mode.map_or("", PublishMode::as_str);
        println!(
            "{}  {:<10} {:<9} parent={}  rows={}  steps={}",
            version.id,
            version.stage.as_str(),
            mode,
            parent,
            version
                .metadata
                .row_count
                .map_or_else(|| "?".to_owned(), |n| n.to_string()),
            version.pipeline.len()
        );
    }
    Ok(())
}
