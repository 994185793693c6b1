pub mod client;

pub use client::{EnricherClientConfig, HttpEnricher};

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::store::{now_unix, Enrichment, Span, SqliteStore};

/// Opaque summarization capability: span text in, summary out. Fallible and
/// retryable; the concrete implementation is chosen at process start.
#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    async fn summarize(&self, span_text: &str) -> Result<String>;
}

/// Outcome of one stage pass. Failed spans stay pending and are re-selected
/// on the next cycle; there is no retry loop within a cycle.
#[derive(Debug, Default)]
pub struct StageOutcome {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Generates summaries for spans whose enrichment is missing or stale.
///
/// Capability calls run concurrently up to `max_in_flight`; each result is
/// persisted in a single upsert, so an interrupted pass leaves completed
/// spans enriched and the rest pending.
pub struct EnrichmentStage {
    enricher: Arc<dyn Enricher>,
    batch_size: usize,
    max_in_flight: usize,
}

impl EnrichmentStage {
    pub fn new(enricher: Arc<dyn Enricher>, batch_size: usize, max_in_flight: usize) -> Self {
        Self {
            enricher,
            batch_size: batch_size.max(1),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub async fn run(
        &self,
        store: &Arc<SqliteStore>,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        // One attempt per span per cycle: select the work list up front.
        let pending = store.pending_enrichment_spans(None)?;
        let mut outcome = StageOutcome::default();
        if pending.is_empty() {
            return Ok(outcome);
        }
        tracing::info!(pending = pending.len(), "enrichment stage started");

        'batches: for chunk in pending.chunks(self.batch_size) {
            let mut in_flight: JoinSet<(Span, Result<String>)> = JoinSet::new();

            for span in chunk {
                if cancel.is_cancelled() {
                    outcome.cancelled = true;
                    self.drain(store, &mut in_flight, &mut outcome).await?;
                    break 'batches;
                }
                while in_flight.len() >= self.max_in_flight {
                    if let Some(joined) = in_flight.join_next().await {
                        self.persist(store, joined, &mut outcome)?;
                    }
                }

                let enricher = Arc::clone(&self.enricher);
                let span = span.clone();
                in_flight.spawn(async move {
                    let summary = enricher.summarize(&span.source).await;
                    (span, summary)
                });
            }

            self.drain(store, &mut in_flight, &mut outcome).await?;
        }

        tracing::info!(
            completed = outcome.completed,
            failed = outcome.failed,
            cancelled = outcome.cancelled,
            "enrichment stage finished"
        );
        Ok(outcome)
    }

    async fn drain(
        &self,
        store: &Arc<SqliteStore>,
        in_flight: &mut JoinSet<(Span, Result<String>)>,
        outcome: &mut StageOutcome,
    ) -> Result<()> {
        while let Some(joined) = in_flight.join_next().await {
            self.persist(store, joined, outcome)?;
        }
        Ok(())
    }

    fn persist(
        &self,
        store: &Arc<SqliteStore>,
        joined: std::result::Result<(Span, Result<String>), tokio::task::JoinError>,
        outcome: &mut StageOutcome,
    ) -> Result<()> {
        let Ok((span, summary)) = joined else {
            outcome.failed += 1;
            return Ok(());
        };
        match summary {
            Ok(summary) => {
                store.upsert_enrichment(&Enrichment {
                    span_id: span.id,
                    summary,
                    source_hash: span.source_hash,
                    generated_at: now_unix(),
                })?;
                outcome.completed += 1;
            }
            Err(e) => {
                tracing::warn!(
                    span = %span.id,
                    file = %span.file_path,
                    error = %e,
                    "enrichment failed, span stays pending"
                );
                outcome.failed += 1;
            }
        }
        Ok(())
    }
}
