#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use modeldepot::catalog::{load_catalog, ArtifactLayout, CatalogSource, CatalogStore};
use modeldepot::config::Config;
use modeldepot::download::{
    format_bytes, DownloadOrchestrator, DownloadSettings, EngineParts, HttpTransport,
    TokioWorkQueue,
};
use modeldepot::error::{DepotError, Result};
use modeldepot::manifest::{
    http_client, Ed25519Verifier, EnvCredentialProvider, ManifestCache, ManifestResolver,
};
use modeldepot::model::{DownloadStatus, TaskId};
use modeldepot::store::{JsonSnapshot, MemoryPackageStore, MemoryTaskStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modeldepot")]
#[command(about = "Download, verify and manage local AI model artifacts", long_about = None)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the model catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// List catalog packages and their install state
    List,
    /// Download a model and wait for it to finish
    Download { model_id: String },
    /// Resume a paused download
    Resume { task_id: TaskId },
    /// Retry a failed download
    Retry { task_id: TaskId },
    /// Cancel a download
    Cancel { task_id: TaskId },
    /// Check a file against a SHA-256 checksum
    Verify { file: PathBuf, sha256: String },
    /// Re-verify an installed model
    Check { model_id: String },
    /// Show download tasks
    Tasks,
    /// Delete finished tasks with the given status
    Sweep { status: DownloadStatus },
    /// Remove a model and its files
    Uninstall { model_id: String },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Merge a catalog listing into the local catalog
    Sync {
        /// Bundled catalog file or listing URL; defaults to the configured source
        source: Option<String>,
    },
}

struct Engine {
    catalog: Arc<CatalogStore>,
    orchestrator: DownloadOrchestrator,
    client: reqwest::Client,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Verifying a loose file needs no engine state
    if let Commands::Verify { file, sha256 } = &cli.command {
        return verify_file(file, sha256).await;
    }

    let engine = build_engine(&config).await?;
    let paused = engine.orchestrator.recover().await?;
    if paused > 0 {
        println!("{paused} interrupted download(s) paused; resume them with `modeldepot resume <task-id>`");
    }

    match cli.command {
        Commands::Catalog {
            command: CatalogCommands::Sync { source },
        } => sync_catalog(&engine, &config, source).await,
        Commands::List => {
            list_packages(&engine);
            Ok(())
        }
        Commands::Download { model_id } => {
            let task_id = engine.orchestrator.start_download(&model_id).await?;
            follow_download(&engine.orchestrator, task_id).await
        }
        Commands::Resume { task_id } => {
            engine.orchestrator.resume_download(task_id).await?;
            follow_download(&engine.orchestrator, task_id).await
        }
        Commands::Retry { task_id } => {
            engine.orchestrator.retry_download(task_id).await?;
            follow_download(&engine.orchestrator, task_id).await
        }
        Commands::Cancel { task_id } => {
            engine.orchestrator.cancel_download(task_id).await?;
            println!("Cancelled {task_id}");
            Ok(())
        }
        Commands::Check { model_id } => {
            if engine.orchestrator.verify_installed(&model_id).await? {
                println!("✓ {model_id} matches its recorded checksum");
                Ok(())
            } else {
                Err(DepotError::Integrity {
                    model_id,
                    reason: "installed artifact is missing or does not match its checksum"
                        .to_string(),
                })
            }
        }
        Commands::Tasks => {
            list_tasks(&engine.orchestrator);
            Ok(())
        }
        Commands::Sweep { status } => {
            let removed = engine.orchestrator.sweep(status).await?;
            println!("Removed {removed} {status} task(s)");
            Ok(())
        }
        Commands::Uninstall { model_id } => {
            engine.orchestrator.uninstall(&model_id).await?;
            println!("✓ Uninstalled {model_id}");
            Ok(())
        }
        Commands::Verify { .. } => Ok(()),
    }
}

async fn build_engine(config: &Config) -> Result<Engine> {
    let state_dir = config.state_dir()?;
    let models_dir = config.models_dir()?;
    tokio::fs::create_dir_all(&state_dir).await?;
    tokio::fs::create_dir_all(&models_dir).await?;

    let client = http_client(&config.manifests)?;
    let packages = MemoryPackageStore::open(JsonSnapshot::new(state_dir.join("packages.json")))?;
    let tasks = MemoryTaskStore::open(JsonSnapshot::new(state_dir.join("tasks.json")))?;
    let cache = ManifestCache::open(
        config.manifests.cache_ttl(),
        JsonSnapshot::new(state_dir.join("manifests.json")),
    )?;

    let catalog = Arc::new(CatalogStore::new(
        Arc::new(packages),
        ArtifactLayout::new(models_dir),
    ));
    let resolver = ManifestResolver::new(
        &config.manifests,
        client.clone(),
        catalog.clone(),
        cache,
        Arc::new(EnvCredentialProvider::new(&config.manifests.hub_token_env)),
    );

    let orchestrator = DownloadOrchestrator::new(
        EngineParts {
            tasks: Arc::new(tasks),
            catalog: catalog.clone(),
            manifests: Arc::new(resolver),
            transport: Arc::new(HttpTransport::new(config.manifests.http_timeout())?),
            work: Arc::new(TokioWorkQueue::new(config.downloads.worker_slots)),
            signatures: Some(Arc::new(Ed25519Verifier::new(client.clone()))),
        },
        DownloadSettings::from(&config.downloads),
    );

    Ok(Engine {
        catalog,
        orchestrator,
        client,
    })
}

async fn sync_catalog(engine: &Engine, config: &Config, source: Option<String>) -> Result<()> {
    let source = match source {
        Some(raw) if raw.starts_with("http://") || raw.starts_with("https://") => {
            CatalogSource::Remote(raw)
        }
        Some(raw) => CatalogSource::Bundled(PathBuf::from(raw)),
        None => match (&config.catalog.remote_url, &config.catalog.bundled_path) {
            (Some(url), _) => CatalogSource::Remote(url.clone()),
            (None, Some(path)) => CatalogSource::Bundled(path.clone()),
            (None, None) => {
                return Err(DepotError::Config(
                    "No catalog source given and none configured (catalog.remote_url or catalog.bundled_path)"
                        .to_string(),
                ))
            }
        },
    };

    println!("Loading catalog from {source}...");
    let packages = load_catalog(&source, &engine.client).await?;
    let summary = engine.catalog.replace_catalog(packages).await?;
    println!(
        "✓ Catalog synced: {} new, {} updated, {} kept",
        summary.inserted, summary.merged, summary.retained
    );
    Ok(())
}

fn list_packages(engine: &Engine) {
    let packages = engine.catalog.list();
    if packages.is_empty() {
        println!("Catalog is empty. Run `modeldepot catalog sync` first.");
        return;
    }

    println!("Models:");
    println!();
    for package in packages {
        println!(
            "  {:<28} {:<10} {:>12}  {:<14} {}",
            package.model_id,
            package.version,
            format_bytes(package.size_bytes),
            package.install_state,
            package.display_name
        );
    }
}

fn list_tasks(orchestrator: &DownloadOrchestrator) {
    let tasks = orchestrator.tasks();
    if tasks.is_empty() {
        println!("No download tasks.");
        return;
    }

    for task in tasks {
        println!(
            "  {}  {:<24} {:<12} {:>5.1}%  {}",
            task.task_id,
            task.model_id,
            task.status,
            task.progress * 100.0,
            task.error_message.as_deref().unwrap_or("")
        );
    }
}

/// Render a progress bar until the task leaves its active states
async fn follow_download(orchestrator: &DownloadOrchestrator, task_id: TaskId) -> Result<()> {
    let mut updates = orchestrator.observe_download_progress(task_id);
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .map_err(|e| DepotError::Other(format!("Invalid progress template: {e}")))?
            .progress_chars("#>-"),
    );

    loop {
        let snapshot = updates.borrow_and_update().clone();
        let Some(task) = snapshot else {
            bar.abandon_with_message("task removed");
            return Err(DepotError::NotFound(format!("download task {task_id}")));
        };

        if task.total_bytes > 0 {
            bar.set_length(task.total_bytes);
        }
        bar.set_position(task.bytes_downloaded);
        bar.set_message(format!("{} {}", task.model_id, task.status));

        match task.status {
            DownloadStatus::Completed => {
                bar.finish_with_message(format!("{} installed", task.model_id));
                return Ok(());
            }
            DownloadStatus::Failed | DownloadStatus::Cancelled | DownloadStatus::Paused => {
                let reason = task.error_message.unwrap_or_else(|| task.status.to_string());
                bar.abandon_with_message(reason.clone());
                return Err(DepotError::Other(format!(
                    "download {task_id} ended as {}: {reason}",
                    task.status
                )));
            }
            DownloadStatus::Queued | DownloadStatus::Downloading => {}
        }

        if updates.changed().await.is_err() {
            return Ok(());
        }
    }
}

async fn verify_file(file: &std::path::Path, sha256: &str) -> Result<()> {
    if modeldepot::manifest::verify(file, sha256).await? {
        println!("✓ {} matches", file.display());
        Ok(())
    } else {
        let actual = modeldepot::manifest::compute_sha256(file).await?;
        Err(DepotError::Other(format!(
            "{} does not match: expected {sha256}, got {actual}",
            file.display()
        )))
    }
}
