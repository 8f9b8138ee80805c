//! defectd — defect detection service with chunked model weights
//!
//! Usage:
//!   defectd split  models/best.pt models/split_models/best      # offline
//!   defectd split-artifact --config config.toml --artifact yolov8
//!   defectd join   models/split_models/best models/best.pt
//!   defectd assemble --config config.toml                         # join all
//!   defectd serve    --config config.toml                         # join all, then serve

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use defectd::api::{self, AppState};
use defectd::assembly;
use defectd::config::Config;
use defectd::models::ModelRegistry;
use defectd::storage::parts::{ChunkStore, DEFAULT_CHUNK_SIZE_MB};

#[derive(Parser)]
#[command(name = "defectd", about = "Defect detection service", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split a file into `<name>.part<N>` files.
    Split {
        /// File to split.
        source: PathBuf,
        /// Directory receiving the parts (created if missing).
        out_dir: PathBuf,
        /// Maximum part size in megabytes.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE_MB)]
        chunk_size_mb: u64,
        /// Skip writing `<name>.manifest.json`.
        #[arg(long)]
        no_manifest: bool,
    },
    /// Split a configured artifact's file into its parts directory.
    SplitArtifact {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Artifact name from `[[artifacts]]`.
        #[arg(long)]
        artifact: String,
    },
    /// Reassemble `<basename(output)>.part<N>` files into `output`.
    Join {
        /// Directory holding the parts.
        in_dir: PathBuf,
        /// Destination file (created or truncated).
        output: PathBuf,
    },
    /// Reassemble every configured artifact and exit.
    Assemble {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Reassemble every configured artifact, then start the HTTP API.
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Split { source, out_dir, chunk_size_mb, no_manifest } => {
            run_split(&source, &out_dir, chunk_size_mb, !no_manifest)
        }
        Command::SplitArtifact { config, artifact } => run_split_artifact(&config, &artifact),
        Command::Join { in_dir, output } => run_join(&in_dir, &output),
        Command::Assemble { config } => run_assemble(&config).await,
        Command::Serve { config } => run_serve(&config).await,
    };

    if let Err(e) = outcome {
        error!("Command failed: {e:#}");
        std::process::exit(1);
    }
}

fn run_split(source: &Path, out_dir: &Path, chunk_size_mb: u64, manifest: bool) -> Result<()> {
    let store = ChunkStore::from_mb(chunk_size_mb)?.with_manifest(manifest);
    let report = store
        .split(source, out_dir)
        .with_context(|| format!("splitting {source:?} into {out_dir:?}"))?;
    println!(
        "Split {} into {} parts in {} ({} bytes, sha256 {})",
        source.display(),
        report.parts,
        out_dir.display(),
        report.total_bytes,
        report.sha256
    );
    Ok(())
}

fn run_split_artifact(config_path: &Path, name: &str) -> Result<()> {
    let cfg = Config::from_file(config_path)?;
    let artifact = cfg
        .artifact(name)
        .with_context(|| format!("no artifact named '{name}' in {config_path:?}"))?;
    let store = artifact.chunk_store(&cfg.storage)?;
    let report = store
        .split(&artifact.reassembled_path, &artifact.parts_dir)
        .with_context(|| format!("splitting artifact '{name}'"))?;
    info!(artifact = name, parts = report.parts, bytes = report.total_bytes, "Artifact split");
    Ok(())
}

fn run_join(in_dir: &Path, output: &Path) -> Result<()> {
    let report = ChunkStore::join(in_dir, output)
        .with_context(|| format!("joining {in_dir:?} into {output:?}"))?;
    println!(
        "Joined {} parts into {} ({} bytes)",
        report.parts,
        output.display(),
        report.total_bytes
    );
    Ok(())
}

async fn run_assemble(config_path: &Path) -> Result<()> {
    let cfg = Config::from_file(config_path)?;
    let statuses = assembly::materialize_all_blocking(cfg.artifacts.clone())
        .await
        .context("reassembling artifacts")?;
    for s in &statuses {
        println!("{:<16} {:>4} parts  {:>12} bytes  {}", s.name, s.parts, s.bytes, s.path.display());
    }
    Ok(())
}

async fn run_serve(config_path: &Path) -> Result<()> {
    let cfg = Config::from_file(config_path)?;

    info!(
        artifacts = cfg.artifacts.len(),
        models = cfg.models.len(),
        chunk_size_mb = cfg.storage.chunk_size_mb,
        "Starting defectd"
    );

    // Weights must be on disk before any model is registered.
    let artifacts = assembly::materialize_all_blocking(cfg.artifacts.clone())
        .await
        .context("reassembling artifacts")?;

    let registry = Arc::new(ModelRegistry::from_config(&cfg.models)?);

    if !cfg.api.enabled {
        info!("HTTP API disabled, artifacts ready");
        return Ok(());
    }

    let port = match std::env::var("PORT") {
        Ok(p) => p.parse().with_context(|| format!("invalid PORT '{p}'"))?,
        Err(_) => cfg.api.port,
    };

    let state = Arc::new(AppState { registry, artifacts });
    tokio::select! {
        res = api::start_server(state, port) => {
            res.with_context(|| format!("serving HTTP API on port {port}"))?;
        }
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received CTRL+C, shutting down…"),
                Err(e) => error!(error = %e, "Signal error"),
            }
        }
    }
    Ok(())
}
