// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Datasmith CLI
//!
//! Local command-line access to datasets, versions and transformation jobs.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use datasmith_core::{
    DataKind, DataSetFile, DataSetVersion, DataSource, DatasmithConfig, NewDataSet, NewFile,
    Operation, TaskProgress,
};
use datasmith_datasets::{Datasmith, TransformRequest};
use datasmith_transform::TransformUnitSpec;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "datasmith")]
#[command(about = "Datasmith - versioned training datasets", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dataset management
    Dataset {
        #[command(subcommand)]
        command: DatasetCommands,
    },

    /// Branches and tags
    Version {
        #[command(subcommand)]
        command: VersionCommands,
    },

    /// Captured traffic records
    Reflow {
        #[command(subcommand)]
        command: ReflowCommands,
    },

    /// Run an operation over every file of a branch and stream its progress
    Transform {
        /// Branch to transform
        version_id: Uuid,

        /// clean, augment, denoise, annotate or agent_process
        #[arg(long, default_value = "clean")]
        operation: Operation,

        /// Registered script (`<format>_<method>`); defaults to one picked by file format
        #[arg(long, conflicts_with = "agent")]
        script: Option<String>,

        /// Remote agent id
        #[arg(long)]
        agent: Option<String>,

        /// Cancel the job if it runs longer than this many seconds
        #[arg(long)]
        max_seconds: Option<u64>,
    },

    /// Inspect tasks through the durable progress store
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
}

#[derive(Subcommand)]
enum DatasetCommands {
    /// Create a dataset, uploading files into its original version
    Create {
        name: String,

        #[arg(long)]
        owner: String,

        #[arg(long)]
        tenant: String,

        #[arg(long, value_enum, default_value = "document")]
        kind: KindArg,

        #[arg(long, value_enum, default_value = "upload")]
        source: SourceArg,

        #[arg(long)]
        description: Option<String>,

        /// Files to upload
        files: Vec<PathBuf>,
    },

    /// Show a dataset and its versions
    Show { dataset_id: Uuid },

    /// List a tenant's datasets
    List {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Subcommand)]
enum VersionCommands {
    /// Cut a branch from a version
    Branch {
        version_id: Uuid,

        #[arg(long)]
        name: Option<String>,
    },

    /// Publish a branch as a tag
    Publish {
        version_id: Uuid,

        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a version and its files
    Delete { version_id: Uuid },

    /// Upload files into a branch
    Add {
        version_id: Uuid,

        files: Vec<PathBuf>,
    },

    /// Remove files from a branch
    Remove {
        version_id: Uuid,

        file_ids: Vec<Uuid>,
    },

    /// Show a version, its files and lineage
    Show { version_id: Uuid },

    /// List the versions of a dataset
    List { dataset_id: Uuid },
}

#[derive(Subcommand)]
enum ReflowCommands {
    /// Store a captured record (JSON payload)
    Record {
        #[arg(long)]
        tenant: String,

        /// Originating application
        #[arg(long)]
        source: String,

        payload: String,
    },

    /// Append captured records to a branch of a reflow dataset
    Ingest {
        version_id: Uuid,

        record_ids: Vec<Uuid>,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Show one task
    Show { task_id: Uuid },

    /// List every task still in the progress store
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Document,
    Image,
}

impl From<KindArg> for DataKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Document => DataKind::Document,
            KindArg::Image => DataKind::Image,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Upload,
    Reflow,
}

impl From<SourceArg> for DataSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Upload => DataSource::Upload,
            SourceArg::Reflow => DataSource::Reflow,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "datasmith=debug" } else { "datasmith=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn read_files(paths: &[PathBuf]) -> Result<Vec<NewFile>> {
    paths
        .iter()
        .map(|path| {
            let data = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("Invalid file name: {:?}", path))?;
            Ok(NewFile::bytes(name, data))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_version(v: &DataSetVersion) {
    println!(
        "  {} {:<16} {:<4} {:<6} {}{}",
        v.id,
        v.version.to_string(),
        v.version_type.as_str(),
        v.status.as_str(),
        v.name,
        if v.is_original { " (original)" } else { "" }
    );
}

fn print_file(f: &DataSetFile) {
    println!(
        "  {} {:<24} {:>10} B  {:<20} {}",
        f.id,
        f.name,
        f.size_bytes,
        f.status.to_string(),
        &f.content_hash[..f.content_hash.len().min(12)]
    );
}

fn print_task(p: &TaskProgress) {
    let nested = p
        .nested
        .as_ref()
        .map(|n| format!("  [{} {}/{}]", n.label, n.processed, n.total))
        .unwrap_or_default();
    println!(
        "{} {:<10} {:>5.1}%  {}/{} ({} ok, {} failed){}",
        p.id,
        p.status.as_str(),
        p.percent(),
        p.processed_items,
        p.total_items,
        p.success_items,
        p.failed_items,
        nested
    );
    if let Some(error) = &p.error {
        println!("  error: {}", error);
    } else if let Some(message) = &p.message {
        println!("  {}", message);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = DatasmithConfig::load(cli.config.clone())?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }
    let data_dir = config.storage.data_dir.clone();
    let ds = Datasmith::open(config)
        .with_context(|| format!("Failed to open data directory {:?}", data_dir))?;

    match cli.command {
        Commands::Dataset { command } => handle_dataset(&ds, command, cli.json),
        Commands::Version { command } => handle_version(&ds, command, cli.json),
        Commands::Reflow { command } => handle_reflow(&ds, command, cli.json),
        Commands::Transform {
            version_id,
            operation,
            script,
            agent,
            max_seconds,
        } => {
            let unit = match (script, agent) {
                (Some(name), _) => TransformUnitSpec::Script { name },
                (None, Some(agent_id)) => TransformUnitSpec::Agent { agent_id },
                (None, None) => TransformUnitSpec::ScriptByFormat,
            };
            let request = TransformRequest {
                version_id,
                operation,
                unit,
            };
            run_transform(&ds, request, max_seconds.map(Duration::from_secs), cli.json)
        }
        Commands::Task { command } => handle_task(&ds, command, cli.json, &data_dir),
    }
}

fn handle_dataset(ds: &Datasmith, command: DatasetCommands, json: bool) -> Result<()> {
    match command {
        DatasetCommands::Create {
            name,
            owner,
            tenant,
            kind,
            source,
            description,
            files,
        } => {
            let mut spec = NewDataSet::new(name, owner, tenant, kind.into(), source.into())
                .with_files(read_files(&files)?);
            spec.description = description;
            let dataset = ds.graph().create_dataset(spec)?;
            if json {
                return print_json(&dataset);
            }
            println!("✓ Created dataset {} ({})", dataset.name, dataset.id);
            if let Some(original) = dataset.original_version_id {
                println!("  Original version: {}", original);
            }
        }
        DatasetCommands::Show { dataset_id } => {
            let dataset = ds.graph().get_dataset(dataset_id)?;
            let versions = ds.graph().list_versions(dataset_id)?;
            if json {
                return print_json(&serde_json::json!({ "dataset": dataset, "versions": versions }));
            }
            println!("Dataset {} ({})", dataset.name, dataset.id);
            println!("  Tenant: {}, Owner: {}", dataset.tenant, dataset.owner);
            println!(
                "  Kind: {}, Branches: {}, Tags: {}",
                dataset.kind.as_str(),
                dataset.branch_count,
                dataset.tag_count
            );
            println!("  Storage: {} bytes used by tenant", ds.graph().tenant_usage(&dataset.tenant));
            println!("Versions:");
            versions.iter().for_each(print_version);
        }
        DatasetCommands::List { tenant } => {
            let datasets = ds.graph().list_datasets(&tenant);
            if json {
                return print_json(&datasets);
            }
            println!("Found {} datasets:", datasets.len());
            for d in &datasets {
                println!("  {} {:<24} {}", d.id, d.name, d.kind.as_str());
            }
        }
    }
    Ok(())
}

fn handle_version(ds: &Datasmith, command: VersionCommands, json: bool) -> Result<()> {
    let graph = ds.graph();
    match command {
        VersionCommands::Branch { version_id, name } => {
            let version = graph.branch(version_id, name)?;
            if json {
                return print_json(&version);
            }
            println!("✓ Branch {} ({})", version.version, version.id);
        }
        VersionCommands::Publish { version_id, name } => {
            let version = graph.publish(version_id, name)?;
            if json {
                return print_json(&version);
            }
            println!("✓ Published tag {} ({})", version.version, version.id);
        }
        VersionCommands::Delete { version_id } => {
            graph.delete(version_id)?;
            println!("✓ Deleted version {}", version_id);
        }
        VersionCommands::Add { version_id, files } => {
            let added = graph.add_files(version_id, read_files(&files)?)?;
            if json {
                return print_json(&added);
            }
            println!("✓ Added {} files", added.len());
            added.iter().for_each(print_file);
        }
        VersionCommands::Remove { version_id, file_ids } => {
            let removed = graph.remove_files(version_id, &file_ids)?;
            println!("✓ Removed {} files", removed.len());
        }
        VersionCommands::Show { version_id } => {
            let view = graph.version_view(version_id)?;
            let lineage = graph.lineage(version_id)?;
            if json {
                return print_json(&serde_json::json!({
                    "version": view.version,
                    "files": view.files,
                    "lineage": lineage.iter().map(|v| v.id).collect::<Vec<_>>(),
                }));
            }
            println!("Version {} of {}", view.version.version, view.dataset.name);
            print_version(&view.version);
            println!("Files ({}):", view.files.len());
            view.files.iter().for_each(print_file);
            let chain: Vec<String> = lineage.iter().map(|v| v.version.to_string()).collect();
            println!("Lineage: {}", chain.join(" <- "));
        }
        VersionCommands::List { dataset_id } => {
            let versions = graph.list_versions(dataset_id)?;
            if json {
                return print_json(&versions);
            }
            println!("Found {} versions:", versions.len());
            versions.iter().for_each(print_version);
        }
    }
    Ok(())
}

fn handle_reflow(ds: &Datasmith, command: ReflowCommands, json: bool) -> Result<()> {
    match command {
        ReflowCommands::Record {
            tenant,
            source,
            payload,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let record = ds.graph().record_reflow(&tenant, &source, payload)?;
            if json {
                return print_json(&record);
            }
            println!("✓ Recorded {}", record.id);
        }
        ReflowCommands::Ingest {
            version_id,
            record_ids,
        } => {
            if record_ids.is_empty() {
                bail!("No record ids given");
            }
            let files = ds.graph().ingest_reflow(version_id, &record_ids)?;
            if json {
                return print_json(&files);
            }
            println!("✓ Ingested {} records", files.len());
        }
    }
    Ok(())
}

fn run_transform(
    ds: &Datasmith,
    request: TransformRequest,
    limit: Option<Duration>,
    json: bool,
) -> Result<()> {
    let started = Instant::now();
    let task_id = ds.submit_transform(request)?;
    info!(task_id = %task_id, "Transform submitted");

    let mut stream = ds.subscribe(task_id)?;
    let mut last_processed = None;
    let mut cancelled = false;
    loop {
        if let Some(snapshot) = stream.next_timeout(Duration::from_millis(500)) {
            // one line per finished file
            if !json && last_processed != Some(snapshot.processed_items) {
                last_processed = Some(snapshot.processed_items);
                print_task(&snapshot);
            }
            if snapshot.is_terminal() {
                break;
            }
        } else if ds.task(task_id)?.is_terminal() {
            break;
        }
        if !cancelled && limit.is_some_and(|limit| started.elapsed() > limit) {
            println!("Time limit reached, cancelling {}", task_id);
            ds.cancel(task_id)?;
            cancelled = true;
        }
    }

    let progress = ds.wait(task_id, Duration::from_secs(60))?;
    if json {
        return print_json(&progress);
    }
    print_task(&progress);
    Ok(())
}

fn handle_task(ds: &Datasmith, command: TaskCommands, json: bool, data_dir: &Path) -> Result<()> {
    let store = ds.jobs().progress_store();
    match command {
        TaskCommands::Show { task_id } => {
            let Some(progress) = datasmith_jobs::load_task(store.as_ref(), task_id)? else {
                bail!("Task {} not found in {:?}", task_id, data_dir);
            };
            if json {
                return print_json(&progress);
            }
            print_task(&progress);
        }
        TaskCommands::List => {
            let tasks = datasmith_jobs::load_all_tasks(store.as_ref())?;
            if json {
                return print_json(&tasks);
            }
            println!("Found {} tasks:", tasks.len());
            for task in &tasks {
                print!("  {:<24} ", task.label);
                print_task(task);
            }
        }
    }
    Ok(())
}
