pub mod config;
pub mod daemon;
pub mod doctor;
pub mod embed;
pub mod enrich;
pub mod error;
pub mod git;
pub mod graph;
pub mod indexer;
pub mod languages;
pub mod query;
pub mod store;

pub use config::AtlasConfig;
pub use daemon::{CycleOutcome, CycleState, Daemon, RepoEntry};
pub use doctor::Doctor;
pub use embed::{cosine_similarity, Embedder, EmbeddingProfile, EmbeddingStage, HttpEmbedder};
pub use enrich::{Enricher, EnrichmentStage, HttpEnricher, StageOutcome};
pub use error::{AtlasError, Result};
pub use git::GitRepo;
pub use graph::SymbolGraph;
pub use indexer::{
    ChangedPath, ExtractionResult, FileWalker, IndexOutcome, IndexScope, SourceParser,
    SpanExtractor, StructuralIndexer,
};
pub use languages::LanguageRegistry;
pub use query::{Direction, QueryResponse, RetrievalEngine, SearchMode};
pub use store::{
    DoctorReport, EmbeddingRecord, Enrichment, FileRecord, IndexState, LineageHit, RepoMeta,
    SearchHit, Span, SpanKind, SqliteStore, StatusReport, UsageEdge, UsageHit,
};
