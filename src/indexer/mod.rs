pub mod extractor;
pub mod parser;
pub mod walker;

pub use extractor::{ExtractionResult, SpanExtractor};
pub use parser::{ParsedFile, SourceParser};
pub use walker::FileWalker;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::languages::LanguageRegistry;
use crate::store::{content_hash, FileRecord, FileStatus, SqliteStore};

/// What the indexer should look at: everything, or an explicit change set.
#[derive(Debug, Clone)]
pub enum IndexScope {
    Full,
    Changed(Vec<ChangedPath>),
}

#[derive(Debug, Clone)]
pub struct ChangedPath {
    pub path: PathBuf,
    pub deleted: bool,
}

/// Summary of one indexer run; parse failures are carried here instead of
/// failing the run.
#[derive(Debug, Default)]
pub struct IndexOutcome {
    pub indexed_files: usize,
    pub unchanged_files: usize,
    pub removed_files: usize,
    pub failed_files: Vec<(String, String)>,
    pub total_spans: usize,
    pub total_edges: usize,
    pub cancelled: bool,
}

/// Parses repository files into spans and usage edges and replaces the
/// stored records for every file whose content changed.
///
/// Deterministic: identical source text produces identical span identities
/// and edges across runs, which is what makes hash-based currency checks
/// meaningful.
pub struct StructuralIndexer {
    walker: FileWalker,
    parser: SourceParser,
    extractor: SpanExtractor,
}

impl StructuralIndexer {
    pub fn new() -> Self {
        Self {
            walker: FileWalker::new(LanguageRegistry::new()),
            parser: SourceParser::new(LanguageRegistry::new()),
            extractor: SpanExtractor::new(),
        }
    }

    /// `force` reindexes files even when their content hash is unchanged;
    /// a plain full-scope pass still skips them.
    pub fn run(
        &self,
        store: &SqliteStore,
        root: &Path,
        scope: IndexScope,
        commit: Option<&str>,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome> {
        let mut outcome = IndexOutcome::default();

        let files: Vec<PathBuf> = match &scope {
            IndexScope::Full => {
                let walked = self.walker.walk(root)?;

                // Files that vanished since the last run lose their records.
                let walked_rel: HashSet<String> = walked
                    .iter()
                    .filter_map(|p| relative_path(root, p))
                    .collect();
                for stored in store.list_file_paths()? {
                    if !walked_rel.contains(&stored) {
                        store.remove_file(&stored)?;
                        outcome.removed_files += 1;
                    }
                }

                walked
            }
            IndexScope::Changed(changes) => {
                let mut to_index = Vec::new();
                for change in changes {
                    let Some(rel) = relative_path(root, &change.path).or_else(|| {
                        change.path.to_str().map(str::to_string)
                    }) else {
                        continue;
                    };
                    if change.deleted {
                        store.remove_file(&rel)?;
                        outcome.removed_files += 1;
                    } else {
                        let abs = root.join(&rel);
                        if self.walker.is_supported(&abs) {
                            to_index.push(abs);
                        }
                    }
                }
                to_index
            }
        };

        for path in files {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            self.index_file(store, root, &path, commit, force, &mut outcome)?;
        }

        let resolved = store.resolve_edges()?;
        tracing::debug!(resolved, "resolved callee spans for new edges");

        Ok(outcome)
    }

    fn index_file(
        &self,
        store: &SqliteStore,
        root: &Path,
        path: &Path,
        commit: Option<&str>,
        force: bool,
        outcome: &mut IndexOutcome,
    ) -> Result<()> {
        let Some(rel) = relative_path(root, path) else {
            return Ok(());
        };

        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(file = %rel, error = %e, "unreadable file skipped");
                store.mark_file_error(&rel, commit, &e.to_string())?;
                outcome.failed_files.push((rel, e.to_string()));
                return Ok(());
            }
        };

        let hash = content_hash(&source);
        if !force {
            if let Some(existing) = store.get_file(&rel)? {
                if existing.content_hash == hash && existing.status == FileStatus::Ok {
                    outcome.unchanged_files += 1;
                    return Ok(());
                }
            }
        }

        let extraction = match self
            .parser
            .parse_file(path)
            .and_then(|parsed| self.extractor.extract(&parsed, &rel))
        {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!(file = %rel, error = %e, "parse failed, file skipped");
                store.mark_file_error(&rel, commit, &e.to_string())?;
                outcome.failed_files.push((rel, e.to_string()));
                return Ok(());
            }
        };

        let record = FileRecord {
            path: rel,
            content_hash: hash,
            last_seen_commit: commit.map(str::to_string),
            status: FileStatus::Ok,
            error: None,
        };
        outcome.total_spans += extraction.spans.len();
        outcome.total_edges += extraction.edges.len();
        store.replace_file_spans(&record, &extraction.spans, &extraction.edges)?;
        outcome.indexed_files += 1;

        Ok(())
    }
}

impl Default for StructuralIndexer {
    fn default() -> Self {
        Self::new()
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}
