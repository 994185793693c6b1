use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

/// Seconds since the unix epoch, used for all persisted timestamps.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Hash of a source text, used for span identity and currency checks.
pub fn content_hash(text: &str) -> String {
    format!("{:016x}", xxh3_64(text.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Function,
    Method,
    Class,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Function => "function",
            SpanKind::Method => "method",
            SpanKind::Class => "class",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "function" => Some(SpanKind::Function),
            "method" => Some(SpanKind::Method),
            "class" => Some(SpanKind::Class),
            _ => None,
        }
    }
}

/// A contiguous unit of source (function, method, class) treated as the
/// atomic indexing entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub file_path: String,
    pub kind: SpanKind,
    pub symbol: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: u32,
    pub end_byte: u32,
    pub source_hash: String,
    pub source: String,
    pub indexed_at: i64,
}

impl Span {
    /// Builds a span with a deterministic identity: identical source text at
    /// the same location always produces the same id across runs.
    pub fn new(
        file_path: impl Into<String>,
        kind: SpanKind,
        symbol: Option<String>,
        start_line: u32,
        end_line: u32,
        start_byte: u32,
        end_byte: u32,
        source: impl Into<String>,
    ) -> Self {
        let file_path = file_path.into();
        let source = source.into();
        let identity = format!(
            "{}|{}|{}|{}|{}",
            file_path,
            kind.as_str(),
            symbol.as_deref().unwrap_or(""),
            start_byte,
            end_byte
        );
        Self {
            id: content_hash(&identity),
            source_hash: content_hash(&source),
            file_path,
            kind,
            symbol,
            start_line,
            end_line,
            start_byte,
            end_byte,
            source,
            indexed_at: now_unix(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    StaticCall,
    Reference,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::StaticCall => "static-call",
            EdgeKind::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static-call" => Some(EdgeKind::StaticCall),
            "reference" => Some(EdgeKind::Reference),
            _ => None,
        }
    }
}

/// Directed usage relation from a caller span towards a symbol. The callee
/// span id is resolved after indexing and may be absent for symbols defined
/// outside the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEdge {
    pub caller_span_id: String,
    pub callee_symbol: String,
    pub callee_span_id: Option<String>,
    pub kind: EdgeKind,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Ok,
    ParseError,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Ok => "ok",
            FileStatus::ParseError => "parse_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(FileStatus::Ok),
            "parse_error" => Some(FileStatus::ParseError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub last_seen_commit: Option<String>,
    pub status: FileStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Fresh,
    Stale,
    Building,
    Error,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Fresh => "fresh",
            IndexState::Stale => "stale",
            IndexState::Building => "building",
            IndexState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fresh" => Some(IndexState::Fresh),
            "stale" => Some(IndexState::Stale),
            "building" => Some(IndexState::Building),
            "error" => Some(IndexState::Error),
            _ => None,
        }
    }
}

/// Repository-level index metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoMeta {
    pub index_state: IndexState,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_at: Option<i64>,
}

impl Default for RepoMeta {
    fn default() -> Self {
        Self {
            index_state: IndexState::Stale,
            last_indexed_commit: None,
            last_indexed_at: None,
        }
    }
}

/// LLM-generated summary for one span. Current iff `source_hash` matches the
/// owning span's current hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub span_id: String,
    pub summary: String,
    pub source_hash: String,
    pub generated_at: i64,
}

/// Embedding vector for one (span, profile) pair. Same currency rule as
/// `Enrichment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub span_id: String,
    pub profile: String,
    pub dim: usize,
    pub vector: Vec<f32>,
    pub source_hash: String,
    pub generated_at: i64,
}

/// Read-only health report produced by the doctor pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorReport {
    pub total_files: u64,
    pub total_spans: u64,
    pub total_edges: u64,
    pub total_enrichments: u64,
    pub total_embeddings: u64,
    pub pending_enrichments: u64,
    /// Pending embedding counts keyed by profile name, sorted by profile.
    pub pending_embeddings: Vec<(String, u64)>,
    pub orphan_enrichments: u64,
    /// Bounded sample of span ids referenced by orphan enrichments.
    pub orphan_samples: Vec<String>,
    pub dangling_edges: u64,
    pub parse_error_files: Vec<String>,
}

impl DoctorReport {
    /// True when no derived data is missing or stale under any profile.
    pub fn is_settled(&self) -> bool {
        self.pending_enrichments == 0 && self.pending_embeddings.iter().all(|(_, n)| *n == 0)
    }

    /// One-line summary for cycle logging.
    pub fn summary_line(&self) -> String {
        let pending_embeds: u64 = self.pending_embeddings.iter().map(|(_, n)| n).sum();
        format!(
            "files={} spans={} edges={} pending_enrich={} pending_embed={} orphans={} dangling={} parse_errors={}",
            self.total_files,
            self.total_spans,
            self.total_edges,
            self.pending_enrichments,
            pending_embeds,
            self.orphan_enrichments,
            self.dangling_edges,
            self.parse_error_files.len(),
        )
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub symbol: Option<String>,
    pub score: f64,
    pub snippet: String,
}

/// One caller of a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageHit {
    pub caller_path: String,
    pub caller_start_line: u32,
    pub caller_end_line: u32,
    pub caller_symbol: Option<String>,
    pub symbol: String,
}

/// One span reached by a single-hop lineage traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageHit {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub symbol: Option<String>,
    pub depth: u32,
}

/// Answer to a `status` query; reflects the last-known-good state only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub index_state: IndexState,
    pub last_indexed_commit: Option<String>,
    pub last_indexed_at: Option<i64>,
}
