//! fatbundle - subtitle bundle enrichment
//!
//! Command-line front end over the enrichment library: seeds bundle
//! templates into the local store, prints WorkMaps, runs the validation gate
//! and drives enrichment cycles through the HTTP helper services.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fatbundle_common::bundle::TrackLine;
use fatbundle_common::config::{
    default_config_path, load_config_or_default, RootFolderInitializer, RootFolderResolver,
    TomlConfig, CONFIG_PATH_ENV,
};
use fatbundle_common::db::SqliteStore;
use fatbundle_common::{DocumentStore, FatBundle, Language};
use fatbundle_enrich::config::{
    resolve_enricher_config, resolve_normalizer_api_key, resolve_services,
    save_normalizer_api_key,
};
use fatbundle_enrich::services::http_services;
use fatbundle_enrich::{build_runner, validate_bundle, EnrichContext, Runner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const MODULE_NAME: &str = "fatbundle";

#[derive(Parser, Debug)]
#[command(name = "fatbundle", version, about = "Subtitle bundle enrichment")]
struct Cli {
    /// Config file (overrides FATBUNDLE_CONFIG and the default location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the document database
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Database file (overrides <root>/fatbundle.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a new bundle template with cue timings
    Init {
        #[arg(long)]
        id: String,
        #[arg(long)]
        th_start: Option<f64>,
        #[arg(long)]
        th_end: Option<f64>,
        #[arg(long)]
        en_start: Option<f64>,
        #[arg(long)]
        en_end: Option<f64>,
        #[arg(long)]
        th_text: Option<String>,
        #[arg(long)]
        en_text: Option<String>,
        /// Replace an existing bundle with the same id
        #[arg(long)]
        force: bool,
    },
    /// Print the WorkMap for a stored bundle
    Workmap {
        #[arg(long)]
        id: String,
    },
    /// Run the validation gate against a stored bundle
    Validate {
        #[arg(long)]
        id: String,
    },
    /// Run one enrichment cycle for each bundle id
    Enrich {
        #[arg(long = "id", required = true, num_args = 1..)]
        ids: Vec<String>,
        #[arg(long)]
        show: Option<String>,
        #[arg(long)]
        media: Option<String>,
        /// Thai subtitle track (URL or local path)
        #[arg(long)]
        track_th: Option<String>,
        /// English subtitle track (URL or local path)
        #[arg(long)]
        track_en: Option<String>,
    },
    /// Write the normalizer API key into the config file
    SetKey {
        #[arg(env = "FATBUNDLE_NORMALIZER_API_KEY")]
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Step 1: Load config (missing file → defaults)
    let toml_config = load_config_or_default(cli.config.as_deref(), MODULE_NAME);

    // Step 2: Initialize tracing (RUST_LOG → [logging] level)
    init_tracing(&toml_config)?;
    info!("fatbundle {}", env!("CARGO_PKG_VERSION"));

    if let Command::SetKey { key } = &cli.command {
        let path = config_write_path(cli.config.as_deref())?;
        save_normalizer_api_key(key, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Normalizer API key saved to {}", path.display());
        return Ok(());
    }

    // Step 3: Resolve root folder and open the store
    let root_folder = RootFolderResolver::new(MODULE_NAME).resolve_with(cli.root.as_deref(), &toml_config);
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = cli.db.clone().unwrap_or_else(|| initializer.database_path());
    info!("Database: {}", db_path.display());
    let store: Arc<dyn DocumentStore> = Arc::new(
        SqliteStore::open(&db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?,
    );

    match cli.command {
        Command::Init {
            id,
            th_start,
            th_end,
            en_start,
            en_end,
            th_text,
            en_text,
            force,
        } => {
            let mut bundle = FatBundle::template(id.clone());
            bundle.th = TrackLine {
                text: th_text,
                start_sec: th_start,
                end_sec: th_end,
            };
            bundle.en = TrackLine {
                text: en_text,
                start_sec: en_start,
                end_sec: en_end,
            };
            validate_bundle(&bundle).context("Template rejected")?;

            let runner = offline_runner(store, &toml_config);
            if !force && runner.load(&id).await.is_ok() {
                anyhow::bail!("Bundle {} already exists (use --force to replace)", id);
            }
            runner.save(&bundle).await?;
            println!("Stored bundle {}", id);
        }
        Command::Workmap { id } => {
            let runner = offline_runner(store, &toml_config);
            let bundle = runner.load(&id).await?;
            let workmap = runner.generator().generate(&bundle)?;
            println!("{}", serde_json::to_string_pretty(&workmap)?);
            for path in workmap.pending_paths() {
                info!(bundle_id = %id, path = %path, "Pending");
            }
        }
        Command::Validate { id } => {
            let runner = offline_runner(store, &toml_config);
            let bundle = runner.load(&id).await?;
            validate_bundle(&bundle)?;
            println!("Bundle {} is valid", id);
        }
        Command::Enrich {
            ids,
            show,
            media,
            track_th,
            track_en,
        } => {
            let services = http_services(
                &resolve_services(&toml_config),
                resolve_normalizer_api_key(&toml_config),
            )
            .context("Failed to build helper clients")?;
            let runner = build_runner(store, services, resolve_enricher_config(&toml_config));

            let mut ctx = EnrichContext {
                media_id: media,
                show_name: show,
                ..EnrichContext::default()
            };
            if let Some(url) = track_th {
                ctx = ctx.with_track(Language::Th, url);
            }
            if let Some(url) = track_en {
                ctx = ctx.with_track(Language::En, url);
            }

            let cancel = CancellationToken::new();
            let signal_token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing running cycles");
                    signal_token.cancel();
                }
            });

            let summary = runner.run_batch(&ids, &ctx, &cancel).await;
            for (id, outcome) in &summary.completed {
                println!(
                    "{}: {} ({} diagnostics)",
                    id,
                    if outcome.persisted { "enriched" } else { "complete" },
                    outcome.diagnostics.len()
                );
                for diagnostic in &outcome.diagnostics {
                    println!("  {}", diagnostic);
                }
            }
            for (id, error) in &summary.failed {
                println!("{}: failed: {}", id, error);
            }
            for id in &summary.skipped {
                println!("{}: skipped", id);
            }
            if !summary.failed.is_empty() {
                anyhow::bail!("{} of {} bundles failed", summary.failed.len(), ids.len());
            }
        }
        Command::SetKey { .. } => {}
    }

    Ok(())
}

fn init_tracing(toml_config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&toml_config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &toml_config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Runner for commands that never call a helper
fn offline_runner(store: Arc<dyn DocumentStore>, toml_config: &TomlConfig) -> Runner {
    let services = fatbundle_enrich::EnrichmentServices::unavailable();
    build_runner(store, services, resolve_enricher_config(toml_config))
}

fn config_write_path(explicit: Option<&Path>) -> Result<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .or_else(|| default_config_path(MODULE_NAME))
        .context("No config directory available; pass --config")
}
