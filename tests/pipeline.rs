//! End-to-end pipeline tests: structural indexing through enrichment,
//! embedding, doctor reporting and the query surface, using in-process
//! capability fakes.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use code_atlas::config::AtlasConfig;
use code_atlas::daemon::{CycleOutcome, Daemon};
use code_atlas::embed::{Embedder, EmbeddingProfile};
use code_atlas::enrich::Enricher;
use code_atlas::error::Result;
use code_atlas::query::{Direction, RetrievalEngine, SearchMode};
use code_atlas::store::{IndexState, SqliteStore};

struct FakeEnricher;

#[async_trait::async_trait]
impl Enricher for FakeEnricher {
    async fn summarize(&self, span_text: &str) -> Result<String> {
        let name = span_text
            .split_whitespace()
            .nth(1)
            .unwrap_or("unknown")
            .trim_end_matches("()");
        Ok(format!("Calls into the {name} routine."))
    }
}

struct FakeEmbedder;

#[async_trait::async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str, profile: &EmbeddingProfile) -> Result<Vec<f32>> {
        // Deterministic, length-keyed direction so distinct spans differ.
        let mut v = vec![0.0; profile.dim];
        v[text.len() % profile.dim] = 1.0;
        Ok(v)
    }
}

fn test_config(root: &Path) -> AtlasConfig {
    let mut config = AtlasConfig::default();
    config.register(root.to_path_buf());
    config.profiles.push(EmbeddingProfile {
        name: "default".to_string(),
        model: "fake".to_string(),
        dim: 8,
    });
    config
}

fn daemon_with_fakes(root: &Path) -> Daemon {
    Daemon::new(
        test_config(root),
        Some(Arc::new(FakeEnricher)),
        Some(Arc::new(FakeEmbedder)),
    )
}

fn write_repo(root: &Path) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(
        root.join("src/auth.rs"),
        "fn login() { verify(); }\nfn logout() { verify(); }\nfn verify() {}\nfn audit() {}\n",
    )
    .unwrap();
    fs::write(
        root.join("src/db.rs"),
        "fn connect() {}\nfn migrate() { connect(); }\nfn backup() {}\n",
    )
    .unwrap();
    fs::write(
        root.join("src/api.rs"),
        "fn serve() { login() }\nfn shutdown() { logout() }\nfn health() {}\n",
    )
    .unwrap();
}

async fn completed_cycle(daemon: &Daemon, root: &Path) -> code_atlas::DoctorReport {
    match daemon
        .build_repo(root, &CancellationToken::new())
        .await
        .unwrap()
    {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected completed cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_pipeline_settles() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = daemon_with_fakes(dir.path());

    let report = completed_cycle(&daemon, dir.path()).await;
    assert_eq!(report.total_files, 3);
    assert_eq!(report.total_spans, 10);
    assert_eq!(report.total_enrichments, 10);
    assert_eq!(report.total_embeddings, 10);
    assert_eq!(report.pending_enrichments, 0);
    assert!(report.is_settled());

    let store = SqliteStore::open_existing(dir.path()).unwrap();
    let meta = store.get_meta().unwrap();
    assert_eq!(meta.index_state, IndexState::Fresh);
    assert!(meta.last_indexed_at.is_some());
}

#[tokio::test]
async fn test_structural_only_leaves_everything_pending() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = Daemon::new(test_config(dir.path()), None, None);

    let report = completed_cycle(&daemon, dir.path()).await;
    assert_eq!(report.total_spans, 10);
    assert_eq!(report.pending_enrichments, 10);
    assert_eq!(report.pending_embeddings, vec![("default".to_string(), 10)]);
    assert_eq!(report.orphan_enrichments, 0);
}

#[tokio::test]
async fn test_edit_flips_only_touched_span_stale() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = daemon_with_fakes(dir.path());
    completed_cycle(&daemon, dir.path()).await;

    // Change the last function body; earlier spans keep their byte ranges
    // and therefore their identities and current derived data.
    fs::write(
        dir.path().join("src/db.rs"),
        "fn connect() {}\nfn migrate() { connect(); }\nfn backup() { flush() }\n",
    )
    .unwrap();

    let daemon = Daemon::new(test_config(dir.path()), None, None);
    let report = completed_cycle(&daemon, dir.path()).await;
    assert_eq!(report.total_spans, 10);
    assert_eq!(report.pending_enrichments, 1);

    let store = SqliteStore::open_existing(dir.path()).unwrap();
    let pending = store.pending_enrichment_spans(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].symbol.as_deref(), Some("backup"));
}

#[tokio::test]
async fn test_deleted_file_orphans_then_rebuild_prunes() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = daemon_with_fakes(dir.path());
    completed_cycle(&daemon, dir.path()).await;

    fs::remove_file(dir.path().join("src/db.rs")).unwrap();

    // Structural pass alone reports the orphans without touching them.
    {
        let store = SqliteStore::open_existing(dir.path()).unwrap();
        store.remove_file("src/db.rs").unwrap();
        let report = store.doctor_report(&["default".to_string()], 5).unwrap();
        assert_eq!(report.orphan_enrichments, 3);
        assert!(!report.orphan_samples.is_empty());
    }

    // An explicit rebuild prunes them.
    let report = completed_cycle(&daemon, dir.path()).await;
    assert_eq!(report.total_files, 2);
    assert_eq!(report.total_spans, 7);
    assert_eq!(report.orphan_enrichments, 0);
}

#[tokio::test]
async fn test_search_ranks_and_limits() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = daemon_with_fakes(dir.path());
    completed_cycle(&daemon, dir.path()).await;

    let store = Arc::new(SqliteStore::open_existing(dir.path()).unwrap());
    let engine = RetrievalEngine::new(store);

    // "verify" appears twice as a call and once as a definition.
    let hits = engine
        .search("verify", SearchMode::Substring, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| h.path == "src/auth.rs"));
    assert!(hits[0].score >= hits[1].score);

    let limited = engine
        .search("fn", SearchMode::Substring, 5)
        .await
        .unwrap();
    assert_eq!(limited.len(), 5);

    let regex_hits = engine
        .search(r"fn (login|logout)", SearchMode::Regex, 10)
        .await
        .unwrap();
    assert_eq!(regex_hits.len(), 2);
}

#[tokio::test]
async fn test_usage_and_lineage_are_symmetric() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = Daemon::new(test_config(dir.path()), None, None);
    completed_cycle(&daemon, dir.path()).await;

    let store = Arc::new(SqliteStore::open_existing(dir.path()).unwrap());
    let engine = RetrievalEngine::new(store);

    let callers = engine.where_used("verify", 10).unwrap();
    let caller_symbols: Vec<&str> = callers
        .iter()
        .filter_map(|h| h.caller_symbol.as_deref())
        .collect();
    assert_eq!(callers.len(), 2);
    assert!(caller_symbols.contains(&"login"));
    assert!(caller_symbols.contains(&"logout"));

    let down = engine.lineage("login", Direction::Downstream, 10).unwrap();
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].symbol.as_deref(), Some("verify"));
    assert_eq!(down[0].depth, 1);

    let up = engine.lineage("login", Direction::Upstream, 10).unwrap();
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].symbol.as_deref(), Some("serve"));
}

#[tokio::test]
async fn test_repeat_cycle_is_idempotent() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = daemon_with_fakes(dir.path());

    let first = completed_cycle(&daemon, dir.path()).await;
    let second = completed_cycle(&daemon, dir.path()).await;
    assert_eq!(first.total_spans, second.total_spans);
    assert_eq!(first.total_edges, second.total_edges);
    assert!(second.is_settled());
}

#[tokio::test]
async fn test_cancellation_marks_stale_and_keeps_store_consistent() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    let daemon = daemon_with_fakes(dir.path());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = daemon.build_repo(dir.path(), &cancel).await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Cancelled));

    let store = SqliteStore::open_existing(dir.path()).unwrap();
    assert_eq!(store.get_meta().unwrap().index_state, IndexState::Stale);

    // A later uncancelled cycle recovers fully.
    let report = completed_cycle(&daemon, dir.path()).await;
    assert!(report.is_settled());
    let store = SqliteStore::open_existing(dir.path()).unwrap();
    assert_eq!(store.get_meta().unwrap().index_state, IndexState::Fresh);
}

#[tokio::test]
async fn test_query_before_first_index_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    write_repo(dir.path());
    assert!(SqliteStore::open_existing(dir.path()).is_err());
}
