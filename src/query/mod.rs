//! Read-side query surface: search, usage lookups, lineage and status.
//!
//! Queries run against whatever the store currently holds; a repository that
//! is mid-cycle simply answers from its last completed state.

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embed::{cosine_similarity, Embedder, EmbeddingProfile};
use crate::error::{AtlasError, Result};
use crate::graph::SymbolGraph;
use crate::store::{
    DoctorReport, LineageHit, SearchHit, Span, SqliteStore, StatusReport, UsageHit,
};

const LEXICAL_WEIGHT: f64 = 0.5;
const SEMANTIC_WEIGHT: f64 = 0.5;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const DEFAULT_GRAPH_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Substring,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    Upstream,
    #[default]
    Downstream,
}

impl FromStr for Direction {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "upstream" | "up" | "callers" => Ok(Direction::Upstream),
            "downstream" | "down" | "callees" => Ok(Direction::Downstream),
            other => Err(AtlasError::Query(format!(
                "unknown direction '{other}', expected upstream or downstream"
            ))),
        }
    }
}

/// Wire shape for `--format json` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResponse {
    Search { hits: Vec<SearchHit> },
    WhereUsed { hits: Vec<UsageHit> },
    Lineage { hits: Vec<LineageHit> },
    Status { report: StatusReport },
    Doctor { report: DoctorReport },
}

pub struct RetrievalEngine {
    store: Arc<SqliteStore>,
    embedder: Option<Arc<dyn Embedder>>,
    default_profile: Option<EmbeddingProfile>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store, embedder: None, default_profile: None }
    }

    pub fn with_embedder(
        mut self,
        embedder: Arc<dyn Embedder>,
        profile: EmbeddingProfile,
    ) -> Self {
        self.embedder = Some(embedder);
        self.default_profile = Some(profile);
        self
    }

    /// Hybrid search: lexical match over span text and summaries, blended
    /// with cosine similarity where a current query-side and span-side
    /// vector both exist. Falls back to lexical-only scoring otherwise.
    pub async fn search(
        &self,
        query: &str,
        mode: SearchMode,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let matcher = Matcher::build(query, mode)?;
        let candidates = match &matcher {
            Matcher::Substring(_) => self.store.spans_matching_substring(query)?,
            Matcher::Regex(re) => self
                .store
                .spans_with_summaries()?
                .into_iter()
                .filter(|(span, summary)| {
                    re.is_match(&span.source)
                        || summary.as_deref().map(|s| re.is_match(s)).unwrap_or(false)
                })
                .collect(),
        };

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self.query_vector(query).await;

        let mut hits: Vec<SearchHit> = Vec::with_capacity(candidates.len());
        for (span, summary) in &candidates {
            let lexical = matcher.lexical_score(span, summary.as_deref());
            let score = match (&query_vector, &self.default_profile) {
                (Some(qv), Some(profile)) => {
                    match self.store.get_embedding(&span.id, &profile.name)? {
                        Some(record) if record.source_hash == span.source_hash => {
                            let cosine = cosine_similarity(qv, &record.vector) as f64;
                            LEXICAL_WEIGHT * lexical + SEMANTIC_WEIGHT * cosine
                        }
                        _ => lexical,
                    }
                }
                _ => lexical,
            };
            hits.push(SearchHit {
                path: span.file_path.clone(),
                start_line: span.start_line,
                end_line: span.end_line,
                symbol: span.symbol.clone(),
                score,
                snippet: matcher.snippet(span),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Callers of `symbol`, one hop upstream.
    pub fn where_used(&self, symbol: &str, limit: usize) -> Result<Vec<UsageHit>> {
        let graph = SymbolGraph::new(&self.store);
        let callers = graph.upstream(symbol, limit)?;
        Ok(callers
            .into_iter()
            .map(|span| UsageHit {
                caller_path: span.file_path,
                caller_start_line: span.start_line,
                caller_end_line: span.end_line,
                caller_symbol: span.symbol,
                symbol: symbol.to_string(),
            })
            .collect())
    }

    /// Single-hop traversal from `symbol` in the given direction.
    pub fn lineage(
        &self,
        symbol: &str,
        direction: Direction,
        limit: usize,
    ) -> Result<Vec<LineageHit>> {
        let graph = SymbolGraph::new(&self.store);
        let spans = match direction {
            Direction::Upstream => graph.upstream(symbol, limit)?,
            Direction::Downstream => graph.downstream(symbol, limit)?,
        };
        Ok(spans
            .into_iter()
            .map(|span| LineageHit {
                path: span.file_path,
                start_line: span.start_line,
                end_line: span.end_line,
                symbol: span.symbol,
                depth: 1,
            })
            .collect())
    }

    pub fn status(&self) -> Result<StatusReport> {
        let meta = self.store.get_meta()?;
        Ok(StatusReport {
            index_state: meta.index_state,
            last_indexed_commit: meta.last_indexed_commit,
            last_indexed_at: meta.last_indexed_at,
        })
    }

    async fn query_vector(&self, query: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let profile = self.default_profile.as_ref()?;
        match embedder.embed(query, profile).await {
            Ok(v) if v.len() == profile.dim => Some(v),
            Ok(v) => {
                tracing::warn!(
                    got = v.len(),
                    expected = profile.dim,
                    "query embedding has wrong dimensionality, using lexical scoring"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, using lexical scoring");
                None
            }
        }
    }
}

/// Prepared query matcher so regex compilation happens once per search.
enum Matcher {
    Substring(String),
    Regex(regex::Regex),
}

impl Matcher {
    fn build(query: &str, mode: SearchMode) -> Result<Self> {
        match mode {
            SearchMode::Substring => Ok(Matcher::Substring(query.to_lowercase())),
            SearchMode::Regex => {
                let re = regex::Regex::new(query)
                    .map_err(|e| AtlasError::Query(format!("invalid regex '{query}': {e}")))?;
                Ok(Matcher::Regex(re))
            }
        }
    }

    fn count(&self, text: &str) -> usize {
        match self {
            Matcher::Substring(needle) => {
                if needle.is_empty() {
                    0
                } else {
                    text.to_lowercase().matches(needle.as_str()).count()
                }
            }
            Matcher::Regex(re) => re.find_iter(text).count(),
        }
    }

    fn matches_line(&self, line: &str) -> bool {
        match self {
            Matcher::Substring(needle) => line.to_lowercase().contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(line),
        }
    }

    /// Saturating lexical relevance in [0, 1): n matches score n / (1 + n).
    fn lexical_score(&self, span: &Span, summary: Option<&str>) -> f64 {
        let mut n = self.count(&span.source);
        if let Some(summary) = summary {
            n += self.count(summary);
        }
        n as f64 / (1.0 + n as f64)
    }

    /// First matching source line, trimmed; first line of the span otherwise.
    fn snippet(&self, span: &Span) -> String {
        span.source
            .lines()
            .find(|line| self.matches_line(line))
            .or_else(|| span.source.lines().next())
            .unwrap_or("")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        now_unix, EdgeKind, EmbeddingRecord, FileRecord, FileStatus, SpanKind, UsageEdge,
    };

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            content_hash: "h".to_string(),
            last_seen_commit: None,
            status: FileStatus::Ok,
            error: None,
        }
    }

    fn span(path: &str, symbol: &str, start_line: u32, source: &str) -> Span {
        Span::new(
            path,
            SpanKind::Function,
            Some(symbol.to_string()),
            start_line,
            start_line + 4,
            start_line * 100,
            start_line * 100 + source.len() as u32,
            source,
        )
    }

    fn engine(store: Arc<SqliteStore>) -> RetrievalEngine {
        RetrievalEngine::new(store)
    }

    #[tokio::test]
    async fn test_substring_search_ranks_by_match_count() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let many = span("src/a.rs", "parse_all", 1, "fn parse_all() { parse(); parse(); parse(); }");
        let few = span("src/b.rs", "parse_one", 1, "fn parse_one() { parse(); }");
        let none = span("src/c.rs", "other", 1, "fn other() {}");
        store.replace_file_spans(&file("src/a.rs"), &[many], &[]).unwrap();
        store.replace_file_spans(&file("src/b.rs"), &[few], &[]).unwrap();
        store.replace_file_spans(&file("src/c.rs"), &[none], &[]).unwrap();

        let hits = engine(store)
            .search("parse", SearchMode::Substring, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "src/a.rs");
        assert!(hits[0].score > hits[1].score);
        assert!(hits[0].snippet.contains("parse"));
    }

    #[tokio::test]
    async fn test_search_limit_and_tie_order() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        for name in ["a", "b", "c", "d", "e", "f", "g"] {
            let path = format!("src/{name}.rs");
            let s = span(&path, &format!("handle_{name}"), 1, "fn handle() { target(); }");
            store.replace_file_spans(&file(&path), &[s], &[]).unwrap();
        }

        let hits = engine(store)
            .search("target", SearchMode::Substring, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 5);
        // Equal scores fall back to path order.
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert_eq!(paths, vec!["src/a.rs", "src/b.rs", "src/c.rs", "src/d.rs", "src/e.rs"]);
    }

    #[tokio::test]
    async fn test_regex_search_and_bad_pattern() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let s = span("src/a.rs", "read_file", 1, "fn read_file(path: &Path) -> Result<String> {}");
        store.replace_file_spans(&file("src/a.rs"), &[s], &[]).unwrap();
        let engine = engine(store);

        let hits = engine
            .search(r"fn \w+_file", SearchMode::Regex, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].symbol.as_deref(), Some("read_file"));

        let err = engine.search(r"fn [", SearchMode::Regex, 10).await;
        assert!(matches!(err, Err(AtlasError::Query(_))));
    }

    struct FixedEmbedder {
        vector: Vec<f32>,
    }

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str, _profile: &EmbeddingProfile) -> Result<Vec<f32>> {
            Ok(self.vector.clone())
        }
    }

    #[tokio::test]
    async fn test_hybrid_blends_cosine_for_current_vectors() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let aligned = span("src/a.rs", "alpha", 1, "fn alpha() { work(); }");
        let opposed = span("src/b.rs", "beta", 1, "fn beta() { work(); }");
        store.replace_file_spans(&file("src/a.rs"), &[aligned.clone()], &[]).unwrap();
        store.replace_file_spans(&file("src/b.rs"), &[opposed.clone()], &[]).unwrap();

        for (s, vector) in [(&aligned, vec![1.0, 0.0]), (&opposed, vec![-1.0, 0.0])] {
            store
                .upsert_embedding(&EmbeddingRecord {
                    span_id: s.id.clone(),
                    profile: "default".to_string(),
                    dim: 2,
                    vector,
                    source_hash: s.source_hash.clone(),
                    generated_at: now_unix(),
                })
                .unwrap();
        }

        let profile = EmbeddingProfile {
            name: "default".to_string(),
            model: "m".to_string(),
            dim: 2,
        };
        let engine = RetrievalEngine::new(store)
            .with_embedder(Arc::new(FixedEmbedder { vector: vec![1.0, 0.0] }), profile);

        let hits = engine.search("work", SearchMode::Substring, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        // Same lexical score; cosine separates them.
        assert_eq!(hits[0].path, "src/a.rs");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_stale_vector_falls_back_to_lexical() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let s = span("src/a.rs", "alpha", 1, "fn alpha() { work(); }");
        store.replace_file_spans(&file("src/a.rs"), &[s.clone()], &[]).unwrap();
        store
            .upsert_embedding(&EmbeddingRecord {
                span_id: s.id.clone(),
                profile: "default".to_string(),
                dim: 2,
                vector: vec![-1.0, 0.0],
                source_hash: "stale".to_string(),
                generated_at: now_unix(),
            })
            .unwrap();

        let profile = EmbeddingProfile {
            name: "default".to_string(),
            model: "m".to_string(),
            dim: 2,
        };
        let engine = RetrievalEngine::new(store)
            .with_embedder(Arc::new(FixedEmbedder { vector: vec![1.0, 0.0] }), profile);

        let hits = engine.search("work", SearchMode::Substring, 10).await.unwrap();
        // One match scores 1/2 lexically; the stale vector must not drag it down.
        assert!((hits[0].score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_where_used_and_lineage_are_symmetric() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let caller = span("src/a.rs", "alpha", 1, "fn alpha() { beta(); }");
        let callee = span("src/b.rs", "beta", 1, "fn beta() {}");
        let edge = UsageEdge {
            caller_span_id: caller.id.clone(),
            callee_symbol: "beta".to_string(),
            callee_span_id: None,
            kind: EdgeKind::StaticCall,
            line: 1,
        };
        store.replace_file_spans(&file("src/a.rs"), &[caller], &[edge]).unwrap();
        store.replace_file_spans(&file("src/b.rs"), &[callee], &[]).unwrap();
        store.resolve_edges().unwrap();
        let engine = engine(store);

        let used = engine.where_used("beta", 10).unwrap();
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].caller_symbol.as_deref(), Some("alpha"));

        let lineage = engine.lineage("alpha", Direction::Downstream, 10).unwrap();
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage[0].symbol.as_deref(), Some("beta"));
        assert_eq!(lineage[0].depth, 1);
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("upstream".parse::<Direction>().unwrap(), Direction::Upstream);
        assert_eq!("DOWN".parse::<Direction>().unwrap(), Direction::Downstream);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::default(), Direction::Downstream);
    }
}
