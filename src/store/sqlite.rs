use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{AtlasError, Result};
use crate::store::{
    DoctorReport, EdgeKind, EmbeddingRecord, Enrichment, FileRecord, FileStatus, IndexState,
    RepoMeta, Span, SpanKind, UsageEdge,
};

/// Bumped whenever the table layout changes; a mismatch drops and recreates
/// the schema, forcing a rebuild on the next cycle.
const SCHEMA_VERSION: &str = "1";

/// Name of the repository-local hidden directory holding the store.
pub const STORE_DIR: &str = ".code-atlas";

/// Durable per-repository store holding files, spans, usage edges,
/// enrichments, embeddings and repository metadata.
///
/// The connection runs in WAL mode; every multi-entity write happens inside
/// one transaction so concurrent readers never observe a partially applied
/// file replacement.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::configure_pragmas(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_pragmas(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Path of the store database for a repository root.
    pub fn db_path_for(repo_root: &Path) -> PathBuf {
        repo_root.join(STORE_DIR).join("index.db")
    }

    /// Opens (creating if needed) the store under `<root>/.code-atlas/`.
    pub fn open_for_repo(repo_root: &Path) -> Result<Self> {
        let db_path = Self::db_path_for(repo_root);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(db_path)
    }

    /// Opens the store for a repository, failing when it was never built.
    pub fn open_existing(repo_root: &Path) -> Result<Self> {
        let db_path = Self::db_path_for(repo_root);
        if !db_path.exists() {
            return Err(AtlasError::RepoNotFound(repo_root.display().to_string()));
        }
        Self::new(db_path)
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;
        Ok(())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let stored_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or(None);
        if let Some(version) = stored_version {
            if version != SCHEMA_VERSION {
                conn.execute_batch(
                    r#"
                    DROP TABLE IF EXISTS embeddings;
                    DROP TABLE IF EXISTS enrichments;
                    DROP TABLE IF EXISTS edges;
                    DROP TABLE IF EXISTS spans;
                    DROP TABLE IF EXISTS files;
                    DROP TABLE IF EXISTS meta;
                    "#,
                )?;
            }
        }

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '{SCHEMA_VERSION}');
            INSERT OR IGNORE INTO meta (key, value) VALUES ('index_state', 'stale');

            CREATE TABLE IF NOT EXISTS files (
                path TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL,
                last_seen_commit TEXT,
                status TEXT NOT NULL DEFAULT 'ok',
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);

            CREATE TABLE IF NOT EXISTS spans (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                kind TEXT NOT NULL,
                symbol TEXT,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                start_byte INTEGER NOT NULL,
                end_byte INTEGER NOT NULL,
                source_hash TEXT NOT NULL,
                source TEXT NOT NULL,
                indexed_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_spans_file ON spans(file_path);
            CREATE INDEX IF NOT EXISTS idx_spans_symbol ON spans(symbol);

            CREATE TABLE IF NOT EXISTS edges (
                id INTEGER PRIMARY KEY,
                caller_span_id TEXT NOT NULL,
                callee_symbol TEXT NOT NULL,
                callee_span_id TEXT,
                kind TEXT NOT NULL,
                line INTEGER NOT NULL,
                UNIQUE(caller_span_id, callee_symbol, kind, line)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_caller ON edges(caller_span_id);
            CREATE INDEX IF NOT EXISTS idx_edges_callee_symbol ON edges(callee_symbol);
            CREATE INDEX IF NOT EXISTS idx_edges_callee_span ON edges(callee_span_id);

            CREATE TABLE IF NOT EXISTS enrichments (
                span_id TEXT PRIMARY KEY,
                summary TEXT NOT NULL,
                source_hash TEXT NOT NULL,
                generated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS embeddings (
                span_id TEXT NOT NULL,
                profile TEXT NOT NULL,
                dim INTEGER NOT NULL,
                vector BLOB NOT NULL,
                source_hash TEXT NOT NULL,
                generated_at INTEGER NOT NULL,
                PRIMARY KEY (span_id, profile)
            );
            CREATE INDEX IF NOT EXISTS idx_embeddings_profile ON embeddings(profile);
            "#
        ))?;

        Ok(())
    }

    // === Repository metadata ===

    pub fn get_meta(&self) -> Result<RepoMeta> {
        let conn = self.conn.lock().unwrap();
        let get = |key: &str| -> Result<Option<String>> {
            Ok(conn
                .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()?)
        };

        let index_state = get("index_state")?
            .and_then(|s| IndexState::parse(&s))
            .unwrap_or(IndexState::Stale);
        let last_indexed_commit = get("last_indexed_commit")?;
        let last_indexed_at = get("last_indexed_at")?.and_then(|s| s.parse().ok());

        Ok(RepoMeta {
            index_state,
            last_indexed_commit,
            last_indexed_at,
        })
    }

    pub fn set_index_state(&self, state: IndexState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES ('index_state', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![state.as_str()],
        )?;
        Ok(())
    }

    /// Records a successfully completed cycle in one transaction.
    pub fn set_last_indexed(&self, commit: Option<&str>, at: i64, state: IndexState) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let upsert = |key: &str, value: &str| -> Result<()> {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        };
        if let Some(commit) = commit {
            upsert("last_indexed_commit", commit)?;
        }
        upsert("last_indexed_at", &at.to_string())?;
        upsert("index_state", state.as_str())?;
        tx.commit()?;
        Ok(())
    }

    // === Files and spans ===

    pub fn get_file(&self, path: &str) -> Result<Option<FileRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT path, content_hash, last_seen_commit, status, error FROM files WHERE path = ?1",
                params![path],
                Self::row_to_file,
            )
            .optional()?;
        Ok(record)
    }

    pub fn list_file_paths(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path FROM files ORDER BY path")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    /// Replaces all spans and outgoing edges for one file in a single
    /// transaction. Derived records (enrichments, embeddings) are left in
    /// place; stale ones are re-selected by the stages, removed ones become
    /// reportable orphans.
    pub fn replace_file_spans(
        &self,
        file: &FileRecord,
        spans: &[Span],
        edges: &[UsageEdge],
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM edges WHERE caller_span_id IN (SELECT id FROM spans WHERE file_path = ?1)",
            params![file.path],
        )?;
        tx.execute("DELETE FROM spans WHERE file_path = ?1", params![file.path])?;

        for span in spans {
            tx.execute(
                "INSERT OR REPLACE INTO spans
                 (id, file_path, kind, symbol, start_line, end_line, start_byte, end_byte, source_hash, source, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    span.id,
                    span.file_path,
                    span.kind.as_str(),
                    span.symbol,
                    span.start_line,
                    span.end_line,
                    span.start_byte,
                    span.end_byte,
                    span.source_hash,
                    span.source,
                    span.indexed_at,
                ],
            )?;
        }

        for edge in edges {
            tx.execute(
                "INSERT OR IGNORE INTO edges (caller_span_id, callee_symbol, callee_span_id, kind, line)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    edge.caller_span_id,
                    edge.callee_symbol,
                    edge.callee_span_id,
                    edge.kind.as_str(),
                    edge.line,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO files (path, content_hash, last_seen_commit, status, error)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_seen_commit = excluded.last_seen_commit,
                status = excluded.status,
                error = excluded.error",
            params![
                file.path,
                file.content_hash,
                file.last_seen_commit,
                file.status.as_str(),
                file.error,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Marks a file as unparseable without touching its previous spans.
    pub fn mark_file_error(&self, path: &str, commit: Option<&str>, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO files (path, content_hash, last_seen_commit, status, error)
             VALUES (?1, '', ?2, 'parse_error', ?3)
             ON CONFLICT(path) DO UPDATE SET
                last_seen_commit = excluded.last_seen_commit,
                status = 'parse_error',
                error = excluded.error",
            params![path, commit, reason],
        )?;
        Ok(())
    }

    /// Removes a deleted file with its spans and outgoing edges. Enrichments
    /// and embeddings for the removed spans stay behind as detectable
    /// orphans; only a full rebuild prunes them.
    pub fn remove_file(&self, path: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM edges WHERE caller_span_id IN (SELECT id FROM spans WHERE file_path = ?1)",
            params![path],
        )?;
        tx.execute("DELETE FROM spans WHERE file_path = ?1", params![path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(())
    }

    /// Fills in callee span ids for edges that are still unresolved. Already
    /// resolved edges keep their target even when it disappeared, so dangling
    /// edges remain detectable.
    pub fn resolve_edges(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE edges SET callee_span_id = (
                SELECT id FROM spans
                WHERE spans.symbol = edges.callee_symbol
                ORDER BY file_path, start_line LIMIT 1
             )
             WHERE callee_span_id IS NULL
               AND EXISTS (SELECT 1 FROM spans WHERE spans.symbol = edges.callee_symbol)",
            [],
        )?;
        Ok(updated)
    }

    pub fn get_span(&self, id: &str) -> Result<Option<Span>> {
        let conn = self.conn.lock().unwrap();
        let span = conn
            .query_row(
                &format!("SELECT {SPAN_COLUMNS} FROM spans WHERE id = ?1"),
                params![id],
                Self::row_to_span,
            )
            .optional()?;
        Ok(span)
    }

    pub fn spans_for_file(&self, path: &str) -> Result<Vec<Span>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SPAN_COLUMNS} FROM spans WHERE file_path = ?1 ORDER BY start_line"
        ))?;
        let spans = stmt
            .query_map(params![path], Self::row_to_span)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(spans)
    }

    // === Derived-record currency ===

    /// Spans whose enrichment is missing or stale, in deterministic order.
    pub fn pending_enrichment_spans(&self, limit: Option<usize>) -> Result<Vec<Span>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {SPAN_COLUMNS_QUALIFIED} FROM spans s
             LEFT JOIN enrichments e ON e.span_id = s.id
             WHERE e.span_id IS NULL OR e.source_hash != s.source_hash
             ORDER BY s.file_path, s.start_line
             LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let spans = stmt
            .query_map(params![limit], Self::row_to_span)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(spans)
    }

    /// Spans whose embedding under the given profile is missing or stale.
    pub fn pending_embedding_spans(&self, profile: &str, limit: Option<usize>) -> Result<Vec<Span>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {SPAN_COLUMNS_QUALIFIED} FROM spans s
             LEFT JOIN embeddings em ON em.span_id = s.id AND em.profile = ?1
             WHERE em.span_id IS NULL OR em.source_hash != s.source_hash
             ORDER BY s.file_path, s.start_line
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let spans = stmt
            .query_map(params![profile, limit], Self::row_to_span)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(spans)
    }

    /// Persists one enrichment atomically (single upsert statement).
    pub fn upsert_enrichment(&self, enrichment: &Enrichment) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO enrichments (span_id, summary, source_hash, generated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(span_id) DO UPDATE SET
                summary = excluded.summary,
                source_hash = excluded.source_hash,
                generated_at = excluded.generated_at",
            params![
                enrichment.span_id,
                enrichment.summary,
                enrichment.source_hash,
                enrichment.generated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_enrichment(&self, span_id: &str) -> Result<Option<Enrichment>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT span_id, summary, source_hash, generated_at FROM enrichments WHERE span_id = ?1",
                params![span_id],
                |row| {
                    Ok(Enrichment {
                        span_id: row.get(0)?,
                        summary: row.get(1)?,
                        source_hash: row.get(2)?,
                        generated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Persists one embedding atomically (single upsert statement).
    pub fn upsert_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO embeddings (span_id, profile, dim, vector, source_hash, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(span_id, profile) DO UPDATE SET
                dim = excluded.dim,
                vector = excluded.vector,
                source_hash = excluded.source_hash,
                generated_at = excluded.generated_at",
            params![
                record.span_id,
                record.profile,
                record.dim as i64,
                vector_to_blob(&record.vector),
                record.source_hash,
                record.generated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_embedding(&self, span_id: &str, profile: &str) -> Result<Option<EmbeddingRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT span_id, profile, dim, vector, source_hash, generated_at
                 FROM embeddings WHERE span_id = ?1 AND profile = ?2",
                params![span_id, profile],
                |row| {
                    let blob: Vec<u8> = row.get(3)?;
                    Ok(EmbeddingRecord {
                        span_id: row.get(0)?,
                        profile: row.get(1)?,
                        dim: row.get::<_, i64>(2)? as usize,
                        vector: blob_to_vector(&blob),
                        source_hash: row.get(4)?,
                        generated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Deletes derived records whose span no longer exists. Only called from
    /// an explicit full rebuild; incremental cycles report orphans instead.
    pub fn prune_orphans(&self) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let enrichments = tx.execute(
            "DELETE FROM enrichments WHERE span_id NOT IN (SELECT id FROM spans)",
            [],
        )?;
        let embeddings = tx.execute(
            "DELETE FROM embeddings WHERE span_id NOT IN (SELECT id FROM spans)",
            [],
        )?;
        tx.commit()?;
        Ok(enrichments + embeddings)
    }

    // === Doctor (count queries only) ===

    pub fn doctor_report(&self, profiles: &[String], sample_limit: usize) -> Result<DoctorReport> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> Result<u64> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };

        let mut report = DoctorReport {
            total_files: count("SELECT COUNT(*) FROM files")?,
            total_spans: count("SELECT COUNT(*) FROM spans")?,
            total_edges: count("SELECT COUNT(*) FROM edges")?,
            total_enrichments: count("SELECT COUNT(*) FROM enrichments")?,
            total_embeddings: count("SELECT COUNT(*) FROM embeddings")?,
            pending_enrichments: count(
                "SELECT COUNT(*) FROM spans s
                 LEFT JOIN enrichments e ON e.span_id = s.id
                 WHERE e.span_id IS NULL OR e.source_hash != s.source_hash",
            )?,
            orphan_enrichments: count(
                "SELECT COUNT(*) FROM enrichments e
                 LEFT JOIN spans s ON s.id = e.span_id
                 WHERE s.id IS NULL",
            )?,
            dangling_edges: count(
                "SELECT COUNT(*) FROM edges e
                 LEFT JOIN spans s ON s.id = e.callee_span_id
                 WHERE e.callee_span_id IS NOT NULL AND s.id IS NULL",
            )?,
            ..Default::default()
        };

        for profile in profiles {
            let pending: i64 = conn.query_row(
                "SELECT COUNT(*) FROM spans s
                 LEFT JOIN embeddings em ON em.span_id = s.id AND em.profile = ?1
                 WHERE em.span_id IS NULL OR em.source_hash != s.source_hash",
                params![profile],
                |row| row.get(0),
            )?;
            report.pending_embeddings.push((profile.clone(), pending as u64));
        }
        report.pending_embeddings.sort();

        let mut stmt = conn.prepare(
            "SELECT e.span_id FROM enrichments e
             LEFT JOIN spans s ON s.id = e.span_id
             WHERE s.id IS NULL ORDER BY e.span_id LIMIT ?1",
        )?;
        report.orphan_samples = stmt
            .query_map(params![sample_limit as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT path FROM files WHERE status = 'parse_error' ORDER BY path",
        )?;
        report.parse_error_files = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(report)
    }

    // === Graph traversal ===

    /// Spans holding an edge into any span matching `symbol`, most recently
    /// indexed first, ties by file path then start line.
    pub fn upstream_spans(&self, symbol: &str, limit: usize) -> Result<Vec<Span>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT DISTINCT {SPAN_COLUMNS_QUALIFIED} FROM edges e
             JOIN spans s ON s.id = e.caller_span_id
             WHERE e.callee_symbol = ?1
             ORDER BY s.indexed_at DESC, s.file_path, s.start_line
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let spans = stmt
            .query_map(params![symbol, limit as i64], Self::row_to_span)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(spans)
    }

    /// Mirror of `upstream_spans`: spans referenced by edges leaving any span
    /// matching `symbol`. Unresolved edges have no span to return.
    pub fn downstream_spans(&self, symbol: &str, limit: usize) -> Result<Vec<Span>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT DISTINCT {callee} FROM edges e
             JOIN spans caller ON caller.id = e.caller_span_id
             JOIN spans s ON s.id = e.callee_span_id
             WHERE caller.symbol = ?1
             ORDER BY s.indexed_at DESC, s.file_path, s.start_line
             LIMIT ?2",
            callee = SPAN_COLUMNS_QUALIFIED,
        );
        let mut stmt = conn.prepare(&sql)?;
        let spans = stmt
            .query_map(params![symbol, limit as i64], Self::row_to_span)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(spans)
    }

    // === Search support ===

    /// Spans (with their summary, when enriched) whose source or summary
    /// contains `needle`, case-insensitively.
    pub fn spans_matching_substring(&self, needle: &str) -> Result<Vec<(Span, Option<String>)>> {
        // Escape the escape character first, then the LIKE wildcards.
        let escaped = needle
            .to_lowercase()
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {SPAN_COLUMNS_QUALIFIED}, e.summary FROM spans s
             LEFT JOIN enrichments e ON e.span_id = s.id AND e.source_hash = s.source_hash
             WHERE lower(s.source) LIKE ?1 ESCAPE '\\'
                OR lower(coalesce(e.summary, '')) LIKE ?1 ESCAPE '\\'
             ORDER BY s.file_path, s.start_line"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![pattern], |row| {
                Ok((Self::row_to_span(row)?, row.get::<_, Option<String>>(11)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All spans with their current summaries, for regex matching in memory.
    pub fn spans_with_summaries(&self) -> Result<Vec<(Span, Option<String>)>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {SPAN_COLUMNS_QUALIFIED}, e.summary FROM spans s
             LEFT JOIN enrichments e ON e.span_id = s.id AND e.source_hash = s.source_hash
             ORDER BY s.file_path, s.start_line"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((Self::row_to_span(row)?, row.get::<_, Option<String>>(11)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // === Row mapping ===

    fn row_to_span(row: &Row<'_>) -> rusqlite::Result<Span> {
        let kind: String = row.get(2)?;
        Ok(Span {
            id: row.get(0)?,
            file_path: row.get(1)?,
            kind: SpanKind::parse(&kind).unwrap_or(SpanKind::Function),
            symbol: row.get(3)?,
            start_line: row.get(4)?,
            end_line: row.get(5)?,
            start_byte: row.get(6)?,
            end_byte: row.get(7)?,
            source_hash: row.get(8)?,
            source: row.get(9)?,
            indexed_at: row.get(10)?,
        })
    }

    fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
        let status: String = row.get(3)?;
        Ok(FileRecord {
            path: row.get(0)?,
            content_hash: row.get(1)?,
            last_seen_commit: row.get(2)?,
            status: FileStatus::parse(&status).unwrap_or(FileStatus::Ok),
            error: row.get(4)?,
        })
    }
}

const SPAN_COLUMNS: &str =
    "id, file_path, kind, symbol, start_line, end_line, start_byte, end_byte, source_hash, source, indexed_at";

const SPAN_COLUMNS_QUALIFIED: &str =
    "s.id, s.file_path, s.kind, s.symbol, s.start_line, s.end_line, s.start_byte, s.end_byte, s.source_hash, s.source, s.indexed_at";

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
