//! Integration tests for the dataset lifecycle
//!
//! Each test builds a registry in a temporary home, ingests a small CSV
//! written at test time and drives versions through the public API.

use brisket::cancel::CancellationToken;
use brisket::config::{LockSettings, Settings};
use brisket::error::{Error, Result};
use brisket::lifecycle::{DatasetRegistry, LifecycleStage, PublishMode, VersionQuery};
use brisket::pipeline::{ImputeStrategy, NormalisationMethod, PipelineSpec, QualityGate, Step};
use fs2::FileExt as _;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::TempDir;
use uuid::Uuid;

fn write_people_csv(dir: &Path, rows: usize) -> Result<PathBuf> {
    let path = dir.join("people.csv");
    let mut content = String::from("id,name,age\n");
    for i in 0..rows {
        let age = if i % 10 == 0 {
            String::new()
        } else {
            (20 + i % 50).to_string()
        };
        content.push_str(&format!("{i}, person {i} ,{age}\n"));
    }
    std::fs::write(&path, content)?;
    Ok(path)
}

fn setup(settings: impl FnOnce(&Path) -> Settings) -> Result<(TempDir, DatasetRegistry, Uuid)> {
    let temp = TempDir::new()?;
    let source = write_people_csv(temp.path(), 100)?;
    let registry = DatasetRegistry::open(settings(&temp.path().join("home")))?;
    let dataset_id = registry.create_dataset("people", &source)?;
    Ok((temp, registry, dataset_id))
}

fn default_setup() -> Result<(TempDir, DatasetRegistry, Uuid)> {
    setup(|home| Settings::with_home(home))
}

fn raw_id(registry: &DatasetRegistry, dataset_id: &Uuid) -> Result<Uuid> {
    Ok(registry.get_dataset(dataset_id)?.raw_version_id())
}

fn drop_age() -> PipelineSpec {
    PipelineSpec::new("drop age").with_step(Step::DropColumns {
        columns: vec!["age".to_owned()],
    })
}

#[test]
fn test_empty_pipeline_advance_to_profiled() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw = registry.get_version(&dataset_id, &raw_id(&registry, &dataset_id)?)?;

    let profiled = registry.advance(
        &dataset_id,
        &raw.id,
        PipelineSpec::new("profile"),
        LifecycleStage::Profiled,
        &CancellationToken::new(),
    )?;

    assert_eq!(profiled.stage, LifecycleStage::Profiled);
    assert_eq!(profiled.parent_id, Some(raw.id));
    assert_eq!(profiled.pipeline.steps.len(), 0);
    assert_eq!(profiled.data_location, raw.data_location);
    assert_eq!(profiled.metadata.row_count, Some(100));
    Ok(())
}

#[test]
fn test_advance_writes_transformed_data() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    let cleaned = registry.advance(
        &dataset_id,
        &raw_id,
        drop_age().with_step(Step::TrimWhitespace { columns: vec![] }),
        LifecycleStage::Cleaned,
        &CancellationToken::new(),
    )?;

    let df = registry
        .load_version_data(&dataset_id, &cleaned.id)?
        .collect()?;
    assert_eq!(df.height(), 100);
    assert_eq!(df.width(), 2);
    assert_eq!(cleaned.metadata.column_count, Some(2));
    let first = df.column("name")?.str()?.get(0).map(str::to_owned);
    assert_eq!(first.as_deref(), Some("person 0"));

    // the raw data is untouched
    let raw = registry.load_version_data(&dataset_id, &raw_id)?.collect()?;
    assert_eq!(raw.width(), 3);

    let diff = registry.compute_diff(&dataset_id, &raw_id, &cleaned.id)?;
    assert_eq!(diff.schema_changes.columns_removed, vec!["age".to_owned()]);
    assert!(diff.row_changes.rows_added.is_none());
    assert!(diff.has_changes());
    Ok(())
}

#[test]
fn test_lineage_forms_a_single_tree() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;
    let cancel = CancellationToken::new();

    let cleaned = registry.advance(&dataset_id, &raw_id, drop_age(), LifecycleStage::Cleaned, &cancel)?;
    let lateral = registry.advance(
        &dataset_id,
        &cleaned.id,
        PipelineSpec::new("noop"),
        LifecycleStage::Cleaned,
        &cancel,
    )?;
    let advanced = registry.advance(
        &dataset_id,
        &cleaned.id,
        PipelineSpec::new("fill").with_step(Step::Impute {
            strategy: ImputeStrategy::Mode,
            columns: vec![],
        }),
        LifecycleStage::Advanced,
        &cancel,
    )?;

    let versions = registry.list_versions(&dataset_id)?;
    let ids: HashSet<Uuid> = versions.iter().map(|v| v.id).collect();
    let roots: Vec<_> = versions.iter().filter(|v| v.parent_id.is_none()).collect();
    assert_eq!(roots.len(), 1);
    for version in &versions {
        if let Some(parent) = version.parent_id {
            assert!(ids.contains(&parent), "parent of {} missing", version.id);
        }
    }

    let lineage: Vec<Uuid> = registry
        .lineage(&dataset_id, &advanced.id)?
        .iter()
        .map(|v| v.id)
        .collect();
    assert_eq!(lineage, vec![raw_id, cleaned.id, advanced.id]);

    let children: HashSet<Uuid> = registry
        .children(&dataset_id, &cleaned.id)?
        .iter()
        .map(|v| v.id)
        .collect();
    assert_eq!(children, HashSet::from([lateral.id, advanced.id]));
    Ok(())
}

#[test]
fn test_failed_advance_creates_nothing() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    let invalid = PipelineSpec::new("bad").with_step(Step::DropColumns {
        columns: vec!["missing_col".to_owned()],
    });
    let err = registry
        .advance(&dataset_id, &raw_id, invalid, LifecycleStage::Cleaned, &CancellationToken::new())
        .expect_err("validation must fail");
    assert!(matches!(err, Error::Validation(_)), "unexpected {err}");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = registry
        .advance(&dataset_id, &raw_id, drop_age(), LifecycleStage::Cleaned, &cancel)
        .expect_err("cancelled run must fail");
    assert!(matches!(err, Error::Aborted { steps_applied: 0 }), "unexpected {err}");

    assert_eq!(registry.list_versions(&dataset_id)?.len(), 1);
    let stats = registry.storage_stats(&dataset_id)?;
    assert_eq!(stats.file_count, 1, "only the raw copy may exist");

    let reopened = DatasetRegistry::in_dir(registry.settings().home.clone())?;
    assert_eq!(reopened.list_versions(&dataset_id)?.len(), 1);
    Ok(())
}

#[test]
fn test_runtime_failure_in_second_step_creates_nothing() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    // the indicator name passes validation but never appears in the data
    let pipeline = PipelineSpec::new("encode")
        .with_step(Step::OneHotEncode {
            columns: vec!["name".to_owned()],
            drop_original: false,
        })
        .with_step(Step::NormaliseColumns {
            method: NormalisationMethod::MinMax,
            columns: vec!["name_nobody".to_owned()],
        });

    let err = registry
        .advance(&dataset_id, &raw_id, pipeline, LifecycleStage::Advanced, &CancellationToken::new())
        .expect_err("second step must fail at runtime");
    match &err {
        Error::Execution {
            step_index, report, ..
        } => {
            assert_eq!(*step_index, 1);
            assert_eq!(report.steps_applied, 1);
            assert!(!report.success);
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(err.code(), "EXECUTION_ERROR");

    assert_eq!(registry.list_versions(&dataset_id)?.len(), 1);
    let data_dir = registry.store().dataset_dir(&dataset_id).join("data");
    let parquet_files = std::fs::read_dir(&data_dir)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "parquet"))
        .count();
    assert_eq!(parquet_files, 0, "no version data may be left behind");

    let reopened = DatasetRegistry::in_dir(registry.settings().home.clone())?;
    assert_eq!(reopened.list_versions(&dataset_id)?.len(), 1);
    Ok(())
}

#[test]
fn test_failing_gate_blocks_validated_version() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    // every tenth age is blank in the source
    let pipeline = PipelineSpec::new("gate ages")
        .with_step(Step::TrimWhitespace { columns: vec![] })
        .with_gate(QualityGate::MaxNullPercent {
            column: "age".to_owned(),
            max_percent: 5.0,
        })
        .with_gate(QualityGate::NoDuplicates {
            column: "id".to_owned(),
        });

    let err = registry
        .advance(&dataset_id, &raw_id, pipeline, LifecycleStage::Validated, &CancellationToken::new())
        .expect_err("null share is above the limit");
    let Error::QualityGate(results) = &err else {
        panic!("unexpected {err}");
    };
    let passed: Vec<bool> = results.iter().map(|r| r.passed).collect();
    assert_eq!(passed, [false, true]);
    assert_eq!(err.code(), "QUALITY_GATE_FAILED");

    assert_eq!(registry.list_versions(&dataset_id)?.len(), 1);
    let data_dir = registry.store().dataset_dir(&dataset_id).join("data");
    let parquet_files = std::fs::read_dir(&data_dir)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "parquet"))
        .count();
    assert_eq!(parquet_files, 0);
    Ok(())
}

#[test]
fn test_gate_results_are_recorded_on_validated_version() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    let pipeline = PipelineSpec::new("validate")
        .with_gate(QualityGate::RowCountRange { min: 1, max: 1000 })
        .with_gate(QualityGate::ColumnExists {
            column: "name".to_owned(),
        });
    let validated = registry.advance(
        &dataset_id,
        &raw_id,
        pipeline.clone(),
        LifecycleStage::Validated,
        &CancellationToken::new(),
    )?;
    assert_eq!(validated.metadata.quality_gates.len(), 2);
    assert!(validated.metadata.quality_gates.iter().all(|r| r.passed));

    // gates only run for the Validated stage
    let cleaned = registry.advance(
        &dataset_id,
        &raw_id,
        pipeline,
        LifecycleStage::Cleaned,
        &CancellationToken::new(),
    )?;
    assert!(cleaned.metadata.quality_gates.is_empty());

    let reopened = DatasetRegistry::in_dir(registry.settings().home.clone())?;
    let restored = reopened.get_version(&dataset_id, &validated.id)?;
    assert_eq!(restored.metadata.quality_gates, validated.metadata.quality_gates);
    Ok(())
}

#[test]
fn test_reopen_restores_versions() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;
    let cleaned = registry.advance(
        &dataset_id,
        &raw_id,
        drop_age(),
        LifecycleStage::Cleaned,
        &CancellationToken::new(),
    )?;

    let reopened = DatasetRegistry::in_dir(registry.settings().home.clone())?;
    let dataset = reopened.get_dataset(&dataset_id)?;
    assert_eq!(dataset.name(), "people");
    assert_eq!(dataset.versions.len(), 2);
    assert_eq!(reopened.get_version(&dataset_id, &cleaned.id)?, cleaned);

    let latest = reopened.find_version(&dataset_id, &VersionQuery::new())?;
    assert_eq!(latest.id, cleaned.id);
    Ok(())
}

#[test]
fn test_publish_view_and_snapshot() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;
    let validated = registry.advance(
        &dataset_id,
        &raw_id,
        drop_age(),
        LifecycleStage::Validated,
        &CancellationToken::new(),
    )?;

    let view = registry.publish_version(&dataset_id, &validated.id, PublishMode::View)?;
    let snapshot = registry.publish_version(&dataset_id, &validated.id, PublishMode::Snapshot)?;

    assert_eq!(view.stage, LifecycleStage::Published);
    assert_eq!(view.data_location, validated.data_location);
    assert_ne!(snapshot.data_location, validated.data_location);
    assert!(
        snapshot
            .data_location
            .path()
            .starts_with(&registry.store().paths().published_dir)
    );

    // a snapshot can be built on, a view cannot
    registry.publish_version(&dataset_id, &snapshot.id, PublishMode::View)?;
    assert!(
        registry
            .publish_version(&dataset_id, &view.id, PublishMode::View)
            .is_err()
    );

    let snapshot_path = snapshot.data_location.path().to_path_buf();
    let view_path = view.data_location.path().to_path_buf();
    registry.delete_dataset(&dataset_id)?;

    assert!(snapshot_path.exists(), "snapshot must survive dataset deletion");
    assert!(!view_path.exists(), "view data goes with the dataset");
    assert!(matches!(
        registry.get_dataset(&dataset_id),
        Err(Error::DatasetNotFound(_))
    ));
    Ok(())
}

#[test]
fn test_concurrent_advance_blocks_or_fails_with_contention() -> Result<()> {
    let (_temp, registry, dataset_id) = setup(|home| Settings {
        lock: LockSettings {
            wait: false,
            ..LockSettings::default()
        },
        ..Settings::with_home(home)
    })?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.advance(
                    &dataset_id,
                    &raw_id,
                    drop_age().with_step(Step::TrimWhitespace { columns: vec![] }),
                    LifecycleStage::Cleaned,
                    &CancellationToken::new(),
                )
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.join().expect("advance thread panicked") {
            Ok(_) => created += 1,
            Err(Error::LockContention { dataset_id: busy }) => assert_eq!(busy, dataset_id),
            Err(other) => panic!("unexpected error {other}"),
        }
    }

    assert!(created >= 1, "at least one advance must succeed");
    assert_eq!(registry.list_versions(&dataset_id)?.len(), 1 + created);
    Ok(())
}

#[test]
fn test_waiting_lock_serializes_concurrent_advances() -> Result<()> {
    let (_temp, registry, dataset_id) = setup(|home| Settings {
        lock: LockSettings {
            wait: true,
            timeout_secs: 60,
            ..LockSettings::default()
        },
        ..Settings::with_home(home)
    })?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.advance(
                    &dataset_id,
                    &raw_id,
                    drop_age(),
                    LifecycleStage::Cleaned,
                    &CancellationToken::new(),
                )
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("advance thread panicked")?;
    }
    assert_eq!(registry.list_versions(&dataset_id)?.len(), 4);
    Ok(())
}

#[test]
fn test_foreign_lock_holder_means_contention() -> Result<()> {
    let (_temp, registry, dataset_id) = default_setup()?;
    let raw_id = raw_id(&registry, &dataset_id)?;

    let lock_file = registry.store().lock_path(&dataset_id);
    let holder = std::fs::File::create(&lock_file)?;
    holder.try_lock_exclusive()?;

    let err = registry
        .advance(&dataset_id, &raw_id, drop_age(), LifecycleStage::Cleaned, &CancellationToken::new())
        .expect_err("another process holds the dataset");
    assert!(err.is_retryable());
    assert_eq!(err.code(), "LOCK_CONTENTION");

    drop(holder);
    registry.advance(&dataset_id, &raw_id, drop_age(), LifecycleStage::Cleaned, &CancellationToken::new())?;
    Ok(())
}
