//! Background cycle driver.
//!
//! Each registered repository moves through a fixed stage order per cycle:
//! checking, indexing, enriching, a mid-cycle doctor pass, embedding, and a
//! closing doctor pass. A repository runs at most one cycle at a time; an
//! in-process lock guards against overlapping ticks and an advisory lock
//! file guards against a second daemon on the same checkout.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::AtlasConfig;
use crate::doctor::Doctor;
use crate::embed::{
    Embedder, EmbedderClientConfig, EmbeddingStage, HttpEmbedder,
};
use crate::enrich::{EnricherClientConfig, Enricher, EnrichmentStage, HttpEnricher};
use crate::error::{AtlasError, Result};
use crate::git::GitRepo;
use crate::indexer::{IndexScope, StructuralIndexer};
use crate::store::{now_unix, DoctorReport, IndexState, SqliteStore, STORE_DIR};

const LOCK_FILE: &str = "daemon.lock";
const MAX_BACKOFF_MULTIPLIER: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Checking,
    Indexing,
    Enriching,
    DoctorMid,
    Embedding,
    DoctorEnd,
    Error,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Checking => "checking",
            CycleState::Indexing => "indexing",
            CycleState::Enriching => "enriching",
            CycleState::DoctorMid => "doctor-mid",
            CycleState::Embedding => "embedding",
            CycleState::DoctorEnd => "doctor-end",
            CycleState::Error => "error",
        }
    }
}

/// How a single cycle for one repository ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// All stages ran; the closing doctor report is attached.
    Completed(DoctorReport),
    /// Nothing to do: commit unchanged and no derived data pending.
    UpToDate,
    /// Another cycle or another process holds the repository.
    Skipped,
    /// Stopped between spans; the repository was marked stale.
    Cancelled,
}

pub struct RepoEntry {
    pub root: PathBuf,
    cycle_lock: tokio::sync::Mutex<()>,
    state: std::sync::Mutex<CycleState>,
    failures: AtomicU32,
    backoff_until: AtomicI64,
}

impl RepoEntry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            cycle_lock: tokio::sync::Mutex::new(()),
            state: std::sync::Mutex::new(CycleState::Idle),
            failures: AtomicU32::new(0),
            backoff_until: AtomicI64::new(0),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state.lock().map(|s| *s).unwrap_or(CycleState::Error)
    }

    fn set_state(&self, next: CycleState) {
        if let Ok(mut state) = self.state.lock() {
            tracing::debug!(repo = %self.root.display(), from = state.as_str(), to = next.as_str(), "cycle state");
            *state = next;
        }
    }
}

/// Advisory per-checkout lock. Held for the duration of a cycle; a second
/// daemon on the same checkout sees the file and skips.
struct CycleLockFile {
    path: PathBuf,
}

impl CycleLockFile {
    fn acquire(root: &Path) -> Result<Option<Self>> {
        let dir = root.join(STORE_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for CycleLockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct Daemon {
    config: AtlasConfig,
    enricher: Option<Arc<dyn Enricher>>,
    embedder: Option<Arc<dyn Embedder>>,
    repos: Vec<Arc<RepoEntry>>,
}

impl Daemon {
    pub fn new(
        config: AtlasConfig,
        enricher: Option<Arc<dyn Enricher>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        let repos = config
            .repositories
            .iter()
            .map(|r| Arc::new(RepoEntry::new(r.root.clone())))
            .collect();
        Self { config, enricher, embedder, repos }
    }

    /// Builds the daemon with HTTP capability clients from the config.
    pub fn from_config(config: AtlasConfig) -> Result<Self> {
        let enricher: Option<Arc<dyn Enricher>> = match &config.enricher {
            Some(c) => Some(Arc::new(HttpEnricher::new(EnricherClientConfig {
                endpoint: c.endpoint.clone(),
                model: c.model.clone(),
                api_key: c.api_key(),
                timeout: c.timeout(),
            })?)),
            None => None,
        };
        let embedder: Option<Arc<dyn Embedder>> = match &config.embedder {
            Some(c) => Some(Arc::new(HttpEmbedder::new(EmbedderClientConfig {
                endpoint: c.endpoint.clone(),
                api_key: c.api_key(),
                timeout: c.timeout(),
            })?)),
            None => None,
        };
        Ok(Self::new(config, enricher, embedder))
    }

    pub fn repos(&self) -> &[Arc<RepoEntry>] {
        &self.repos
    }

    /// Periodic loop: one tick per interval, cycles across repositories with
    /// bounded parallelism, until the token is cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        if self.repos.is_empty() {
            return Err(AtlasError::Daemon("no repositories registered".to_string()));
        }
        let interval = Duration::from_secs(self.config.daemon.interval_secs.max(1));
        tracing::info!(repos = self.repos.len(), interval_secs = interval.as_secs(), "daemon started");

        loop {
            self.tick(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("daemon stopped");
        Ok(())
    }

    async fn tick(self: &Arc<Self>, cancel: &CancellationToken) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.daemon.max_parallel_repos.max(1),
        ));
        let mut tasks = JoinSet::new();

        for entry in &self.repos {
            if now_unix() < entry.backoff_until.load(Ordering::SeqCst) {
                tracing::debug!(repo = %entry.root.display(), "repository backing off");
                continue;
            }
            let daemon = Arc::clone(self);
            let entry = Arc::clone(entry);
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                match daemon.run_cycle(&entry, &cancel, false).await {
                    Ok(outcome) => {
                        tracing::debug!(repo = %entry.root.display(), ?outcome, "cycle done")
                    }
                    Err(e) => {
                        tracing::error!(repo = %entry.root.display(), error = %e, "cycle failed")
                    }
                }
            });
        }

        while tasks.join_next().await.is_some() {}
    }

    /// Runs one full cycle for a repository. `force_full` reindexes every
    /// file and prunes orphaned derived data; the periodic loop never sets
    /// it, an explicit rebuild does.
    pub async fn run_cycle(
        &self,
        entry: &RepoEntry,
        cancel: &CancellationToken,
        force_full: bool,
    ) -> Result<CycleOutcome> {
        let Ok(_cycle_guard) = entry.cycle_lock.try_lock() else {
            tracing::info!(repo = %entry.root.display(), "cycle already running, skipping");
            return Ok(CycleOutcome::Skipped);
        };
        let Some(_lock_file) = CycleLockFile::acquire(&entry.root)? else {
            tracing::warn!(repo = %entry.root.display(), "another process holds the repository lock, skipping");
            return Ok(CycleOutcome::Skipped);
        };

        let store = Arc::new(SqliteStore::open_for_repo(&entry.root)?);
        match self.stages(entry, &store, cancel, force_full).await {
            Ok(outcome) => {
                entry.failures.store(0, Ordering::SeqCst);
                entry.backoff_until.store(0, Ordering::SeqCst);
                entry.set_state(CycleState::Idle);
                Ok(outcome)
            }
            Err(e) => {
                entry.set_state(CycleState::Error);
                if let Err(mark) = store.set_index_state(IndexState::Error) {
                    tracing::error!(repo = %entry.root.display(), error = %mark, "failed to record error state");
                }
                let failures = entry.failures.fetch_add(1, Ordering::SeqCst) + 1;
                let multiplier = 2u32
                    .saturating_pow(failures.min(31))
                    .min(MAX_BACKOFF_MULTIPLIER);
                let backoff = self.config.daemon.interval_secs.max(1) * multiplier as u64;
                entry
                    .backoff_until
                    .store(now_unix() + backoff as i64, Ordering::SeqCst);
                tracing::warn!(repo = %entry.root.display(), failures, backoff_secs = backoff, "cycle errored, backing off");
                Err(e)
            }
        }
    }

    async fn stages(
        &self,
        entry: &RepoEntry,
        store: &Arc<SqliteStore>,
        cancel: &CancellationToken,
        force_full: bool,
    ) -> Result<CycleOutcome> {
        entry.set_state(CycleState::Checking);
        let git = GitRepo::open(&entry.root).ok();
        let commit = match &git {
            Some(repo) => Some(repo.head_commit()?),
            None => None,
        };
        let meta = store.get_meta()?;

        if !force_full {
            if let Some(commit) = &commit {
                if meta.last_indexed_commit.as_deref() == Some(commit.as_str())
                    && meta.index_state == IndexState::Fresh
                    && self.derived_data_settled(store)?
                {
                    tracing::debug!(repo = %entry.root.display(), commit = %commit, "index up to date");
                    entry.set_state(CycleState::Idle);
                    return Ok(CycleOutcome::UpToDate);
                }
            }
        }

        store.set_index_state(IndexState::Building)?;

        entry.set_state(CycleState::Indexing);
        let scope = match (&git, &meta.last_indexed_commit, force_full) {
            (Some(repo), Some(prev), false) => IndexScope::Changed(repo.changed_since(prev)?),
            _ => IndexScope::Full,
        };
        let indexer = StructuralIndexer::new();
        let outcome = indexer.run(store, &entry.root, scope, commit.as_deref(), force_full, cancel)?;
        tracing::info!(
            repo = %entry.root.display(),
            indexed = outcome.indexed_files,
            unchanged = outcome.unchanged_files,
            removed = outcome.removed_files,
            failed = outcome.failed_files.len(),
            spans = outcome.total_spans,
            "structural indexing done"
        );
        if outcome.cancelled {
            return self.cancelled(entry, store);
        }
        if force_full {
            let pruned = store.prune_orphans()?;
            if pruned > 0 {
                tracing::info!(repo = %entry.root.display(), pruned, "pruned orphaned derived data");
            }
        }

        entry.set_state(CycleState::Enriching);
        if let Some(enricher) = &self.enricher {
            let stage = EnrichmentStage::new(
                Arc::clone(enricher),
                self.config.daemon.batch_size,
                self.config.daemon.max_in_flight,
            );
            let enriched = stage.run(store, cancel).await?;
            if enriched.cancelled {
                return self.cancelled(entry, store);
            }
        } else {
            tracing::info!(repo = %entry.root.display(), "no enricher configured, skipping enrichment");
        }

        entry.set_state(CycleState::DoctorMid);
        let doctor = Doctor::new(self.config.profile_names());
        let mid = doctor.report(store)?;
        tracing::info!(repo = %entry.root.display(), phase = "mid", summary = %mid.summary_line(), "doctor");

        entry.set_state(CycleState::Embedding);
        if let Some(embedder) = &self.embedder {
            for profile in &self.config.profiles {
                let stage = EmbeddingStage::new(
                    Arc::clone(embedder),
                    self.config.daemon.batch_size,
                    self.config.daemon.max_in_flight,
                );
                let embedded = stage.run_profile(store, profile, cancel).await?;
                if embedded.cancelled {
                    return self.cancelled(entry, store);
                }
            }
        } else if !self.config.profiles.is_empty() {
            tracing::info!(repo = %entry.root.display(), "no embedder configured, skipping embedding");
        }

        entry.set_state(CycleState::DoctorEnd);
        let report = doctor.report(store)?;
        tracing::info!(repo = %entry.root.display(), phase = "end", summary = %report.summary_line(), "doctor");

        store.set_last_indexed(commit.as_deref(), now_unix(), IndexState::Fresh)?;
        Ok(CycleOutcome::Completed(report))
    }

    fn cancelled(&self, entry: &RepoEntry, store: &SqliteStore) -> Result<CycleOutcome> {
        tracing::info!(repo = %entry.root.display(), "cycle cancelled, repository marked stale");
        store.set_index_state(IndexState::Stale)?;
        entry.set_state(CycleState::Idle);
        Ok(CycleOutcome::Cancelled)
    }

    /// Settled relative to what is configured: unconfigured stages cannot
    /// hold a repository out of date.
    fn derived_data_settled(&self, store: &SqliteStore) -> Result<bool> {
        let report = store.doctor_report(&self.config.profile_names(), 0)?;
        let enrich_settled = self.enricher.is_none() || report.pending_enrichments == 0;
        let embed_settled = self.embedder.is_none()
            || report.pending_embeddings.iter().all(|(_, n)| *n == 0);
        Ok(enrich_settled && embed_settled)
    }

    /// Explicit full rebuild of a single repository, including orphan
    /// pruning. Used by the one-shot build command.
    pub async fn build_repo(
        &self,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome> {
        let entry = self
            .repos
            .iter()
            .find(|e| e.root == root)
            .cloned()
            .unwrap_or_else(|| Arc::new(RepoEntry::new(root.to_path_buf())));
        self.run_cycle(&entry, cancel, true).await
    }
}
