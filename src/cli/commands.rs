use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use code_atlas::config::AtlasConfig;
use code_atlas::daemon::{CycleOutcome, Daemon};
use code_atlas::doctor::Doctor;
use code_atlas::error::{AtlasError, Result};
use code_atlas::embed::{EmbedderClientConfig, HttpEmbedder};
use code_atlas::query::{
    Direction, QueryResponse, RetrievalEngine, SearchMode, DEFAULT_GRAPH_LIMIT,
    DEFAULT_SEARCH_LIMIT,
};
use code_atlas::store::{SqliteStore, STORE_DIR};

#[derive(Parser)]
#[command(name = "code-atlas")]
#[command(about = "Per-repository code index with summaries, embeddings and a freshness daemon")]
#[command(version)]
#[command(after_long_help = r#"
EXAMPLES:
    # Register the current checkout for background indexing
    code-atlas register

    # One-shot full rebuild (also prunes orphaned derived data)
    code-atlas build

    # Run the background daemon over all registered repositories
    code-atlas daemon

    # Hybrid search over indexed spans
    code-atlas search "parse config" --limit 10

    # Who calls this symbol?
    code-atlas where-used load_config

    # What does this symbol call?
    code-atlas lineage load_config --direction downstream

    # Index freshness and health
    code-atlas status
    code-atlas doctor --format json
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file (defaults to ~/.config/code-atlas/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a repository for background indexing
    Register {
        /// Repository root
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Remove a repository from the registered set
    Unregister {
        /// Repository root
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Full rebuild of one repository's index, including orphan pruning
    Build {
        /// Repository root
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the background indexing daemon
    Daemon,

    /// Search indexed spans by text, summaries and embeddings
    Search {
        /// Search query (substring, or a regex with --regex)
        query: String,

        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Maximum number of results
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Treat the query as a regular expression
        #[arg(long)]
        regex: bool,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// List spans that call or reference a symbol
    WhereUsed {
        /// Symbol name (exact match)
        symbol: String,

        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Maximum number of results
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Single-hop traversal from a symbol through the usage graph
    Lineage {
        /// Symbol name (exact match)
        symbol: String,

        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Traversal direction (upstream or downstream)
        #[arg(long, default_value = "downstream")]
        direction: String,

        /// Maximum number of results
        #[arg(long, default_value = "50")]
        limit: usize,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show index freshness for a repository
    Status {
        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Read-only index health report
    Doctor {
        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

impl Cli {
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => AtlasConfig::default_path(),
        }
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| {
        AtlasError::Config(format!("cannot resolve repository root {}: {e}", path.display()))
    })
}

pub fn register(config_path: &Path, path: &Path) -> Result<()> {
    let root = canonical_root(path)?;
    let mut config = AtlasConfig::load(config_path)?;
    if config.register(root.clone()) {
        config.save(config_path)?;
        println!("Registered {}", root.display());
    } else {
        println!("{} is already registered", root.display());
    }
    Ok(())
}

pub fn unregister(config_path: &Path, path: &Path) -> Result<()> {
    let root = canonical_root(path)?;
    let mut config = AtlasConfig::load(config_path)?;
    if !config.unregister(&root) {
        println!("{} is not registered", root.display());
        return Ok(());
    }
    config.save(config_path)?;
    if config.daemon.purge_on_unregister {
        let store_dir = root.join(STORE_DIR);
        if store_dir.exists() {
            std::fs::remove_dir_all(&store_dir)?;
            println!("Unregistered {} and removed its index", root.display());
            return Ok(());
        }
    }
    println!("Unregistered {} (index retained)", root.display());
    Ok(())
}

pub async fn build(config_path: &Path, path: &Path) -> Result<()> {
    let root = canonical_root(path)?;
    let config = AtlasConfig::load(config_path)?;
    let daemon = Daemon::from_config(config)?;
    let cancel = cancel_on_ctrl_c();

    match daemon.build_repo(&root, &cancel).await? {
        CycleOutcome::Completed(report) => {
            println!("Build finished: {}", report.summary_line());
        }
        CycleOutcome::Cancelled => {
            println!("Build interrupted; repository marked stale");
        }
        CycleOutcome::Skipped => {
            println!("Repository is busy; another cycle holds the lock");
        }
        CycleOutcome::UpToDate => {
            println!("Index already up to date");
        }
    }
    Ok(())
}

pub async fn daemon(config_path: &Path) -> Result<()> {
    let config = AtlasConfig::load(config_path)?;
    let daemon = Arc::new(Daemon::from_config(config)?);
    let cancel = cancel_on_ctrl_c();
    daemon.run(cancel).await
}

pub async fn search(
    config_path: &Path,
    repo: &Path,
    query: &str,
    regex: bool,
    limit: usize,
    format: &str,
) -> Result<()> {
    let engine = engine_for(config_path, repo)?;
    let mode = if regex { SearchMode::Regex } else { SearchMode::Substring };
    let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };
    let hits = engine.search(query, mode, limit).await?;

    if format == "json" {
        print_json(&QueryResponse::Search { hits })?;
        return Ok(());
    }
    if hits.is_empty() {
        println!("No matches for '{query}'");
        return Ok(());
    }
    for hit in hits {
        println!(
            "{:.3}  {}:{}-{}  {}  {}",
            hit.score,
            hit.path,
            hit.start_line,
            hit.end_line,
            hit.symbol.as_deref().unwrap_or("<anonymous>"),
            hit.snippet
        );
    }
    Ok(())
}

pub fn where_used(
    config_path: &Path,
    repo: &Path,
    symbol: &str,
    limit: usize,
    format: &str,
) -> Result<()> {
    let engine = engine_for(config_path, repo)?;
    let limit = if limit == 0 { DEFAULT_GRAPH_LIMIT } else { limit };
    let hits = engine.where_used(symbol, limit)?;

    if format == "json" {
        print_json(&QueryResponse::WhereUsed { hits })?;
        return Ok(());
    }
    if hits.is_empty() {
        println!("No recorded callers of '{symbol}'");
        return Ok(());
    }
    for hit in hits {
        println!(
            "{}:{}-{}  {} -> {}",
            hit.caller_path,
            hit.caller_start_line,
            hit.caller_end_line,
            hit.caller_symbol.as_deref().unwrap_or("<anonymous>"),
            hit.symbol
        );
    }
    Ok(())
}

pub fn lineage(
    config_path: &Path,
    repo: &Path,
    symbol: &str,
    direction: &str,
    limit: usize,
    format: &str,
) -> Result<()> {
    let engine = engine_for(config_path, repo)?;
    let direction: Direction = direction.parse()?;
    let limit = if limit == 0 { DEFAULT_GRAPH_LIMIT } else { limit };
    let hits = engine.lineage(symbol, direction, limit)?;

    if format == "json" {
        print_json(&QueryResponse::Lineage { hits })?;
        return Ok(());
    }
    if hits.is_empty() {
        println!("No lineage recorded for '{symbol}'");
        return Ok(());
    }
    for hit in hits {
        println!(
            "{}:{}-{}  {}",
            hit.path,
            hit.start_line,
            hit.end_line,
            hit.symbol.as_deref().unwrap_or("<anonymous>")
        );
    }
    Ok(())
}

pub fn status(config_path: &Path, repo: &Path, format: &str) -> Result<()> {
    let engine = engine_for(config_path, repo)?;
    let report = engine.status()?;

    if format == "json" {
        print_json(&QueryResponse::Status { report })?;
        return Ok(());
    }
    println!("state:  {}", report.index_state.as_str());
    println!(
        "commit: {}",
        report.last_indexed_commit.as_deref().unwrap_or("<none>")
    );
    match report.last_indexed_at {
        Some(at) => println!("at:     {at} (unix)"),
        None => println!("at:     <never>"),
    }
    Ok(())
}

pub fn doctor(config_path: &Path, repo: &Path, format: &str) -> Result<()> {
    let root = canonical_root(repo)?;
    let config = AtlasConfig::load(config_path)?;
    let store = SqliteStore::open_existing(&root)?;
    let report = Doctor::new(config.profile_names()).report(&store)?;

    if format == "json" {
        print_json(&QueryResponse::Doctor { report })?;
        return Ok(());
    }
    println!("{}", report.summary_line());
    if report.orphan_enrichments > 0 {
        println!(
            "orphaned enrichments: {} (sample: {})",
            report.orphan_enrichments,
            report.orphan_samples.join(", ")
        );
        println!("run 'code-atlas build' to prune them");
    }
    for (profile, pending) in &report.pending_embeddings {
        if *pending > 0 {
            println!("profile '{profile}': {pending} spans awaiting embeddings");
        }
    }
    for file in &report.parse_error_files {
        println!("parse error: {file}");
    }
    Ok(())
}

fn engine_for(config_path: &Path, repo: &Path) -> Result<RetrievalEngine> {
    let root = canonical_root(repo)?;
    let config = AtlasConfig::load(config_path)?;
    let store = Arc::new(SqliteStore::open_existing(&root)?);

    let mut engine = RetrievalEngine::new(store);
    if let (Some(embedder), Some(profile)) = (&config.embedder, config.default_profile()) {
        let client = HttpEmbedder::new(EmbedderClientConfig {
            endpoint: embedder.endpoint.clone(),
            api_key: embedder.api_key(),
            timeout: embedder.timeout(),
        })?;
        engine = engine.with_embedder(Arc::new(client), profile.clone());
    }
    Ok(engine)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| AtlasError::Query(format!("failed to render JSON output: {e}")))?;
    println!("{rendered}");
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing current span");
            handle.cancel();
        }
    });
    cancel
}
