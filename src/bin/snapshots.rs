//! Refresh or read mining snapshots from the command line.
//!
//! Usage:
//!   heron-snapshots --type trend_analysis             # read, refresh if stale
//!   heron-snapshots --type trend_analysis --refresh   # force refresh
//!   heron-snapshots --all                             # refresh every type
//!   heron-snapshots --all --pretty                    # pretty-print output

use std::error::Error;
use std::path::Path;
use std::process;

use clap::Parser;
use serde_json::{json, Value};

use heron::adapter::{factory::get_adapter, DatabaseAdapter};
use heron::config::Settings;
use heron::schema::SchemaMetadata;
use heron::snapshot::{FeatureCompute, Snapshot, SnapshotStore, SnapshotType};
use heron::store::{MetadataStore, DEFAULT_DATASET};

#[derive(Parser)]
#[command(name = "heron-snapshots", about = "Refresh or read mining snapshots.")]
struct Args {
    /// Snapshot type to refresh or read (trend_analysis, customer_segmentation).
    #[arg(long = "type", value_name = "SNAPSHOT_TYPE")]
    snapshot_type: Option<String>,

    /// Force a refresh even if the stored snapshot is fresh.
    #[arg(long)]
    refresh: bool,

    /// Refresh all snapshot types.
    #[arg(long)]
    all: bool,

    /// Pretty-print JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let settings = Settings::load()?;
    let store = MetadataStore::open(Path::new(&settings.store.path))?;
    let adapter = get_adapter(None, &settings.connection)?;
    let metadata = load_metadata(&store, adapter.as_ref())?;

    let compute = FeatureCompute::new(adapter, metadata);
    let snapshots = SnapshotStore::new(&store, Box::new(compute))
        .with_ttl_hours(settings.snapshots.ttl_hours);

    let result: Value = if args.all {
        let refreshed = snapshots.refresh_all()?;
        Value::Array(refreshed.iter().map(snapshot_json).collect())
    } else if let Some(raw) = args.snapshot_type.as_deref() {
        let snapshot_type = SnapshotType::from_str(raw).ok_or_else(|| {
            format!(
                "snapshot type must be one of: {}",
                SnapshotType::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;
        let snap = if args.refresh {
            snapshots.refresh(snapshot_type, None, None)?
        } else {
            snapshots.get(snapshot_type, None, None, true)?
        };
        snapshot_json(&snap)
    } else {
        eprintln!("Provide --type <snapshot_type> or --all");
        process::exit(2);
    };

    if args.pretty {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{result}");
    }
    Ok(())
}

/// Schema metadata from the store, introspecting and saving it on first use.
fn load_metadata(
    store: &MetadataStore,
    adapter: &dyn DatabaseAdapter,
) -> Result<SchemaMetadata, Box<dyn Error>> {
    if let Some(stored) = store.load_schema_metadata(DEFAULT_DATASET)? {
        return Ok(serde_json::from_value(stored)?);
    }
    let metadata = adapter.introspect_schema(None)?;
    let hash = metadata.schema_hash()?;
    store.save_schema_metadata(DEFAULT_DATASET, &hash, &serde_json::to_value(&metadata)?)?;
    Ok(metadata)
}

fn snapshot_json(snap: &Snapshot) -> Value {
    json!({
        "snapshot_type": snap.record.snapshot_type,
        "dataset_id": snap.record.dataset_id,
        "scope_key": snap.record.scope_key,
        "snapshot_json": snap.record.snapshot_json,
        "source_max_date": snap.record.source_max_date,
        "snapshot_version": snap.record.snapshot_version,
        "run_id": snap.record.run_id,
        "generated_at": snap.record.generated_at,
        "refreshed": snap.refreshed,
    })
}
