pub mod client;

pub use client::{EmbedderClientConfig, HttpEmbedder};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::enrich::StageOutcome;
use crate::error::{AtlasError, Result};
use crate::store::{now_unix, EmbeddingRecord, Span, SqliteStore};

/// Named embedding configuration. The same span may carry vectors under
/// several profiles at once; staleness is tracked per profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingProfile {
    pub name: String,
    pub model: String,
    pub dim: usize,
}

impl EmbeddingProfile {
    pub const DEFAULT_NAME: &'static str = "default";
}

/// Opaque embedding capability with fixed output dimensionality per profile.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, profile: &EmbeddingProfile) -> Result<Vec<f32>>;
}

/// Same shape as the enrichment stage, keyed by (span, profile).
pub struct EmbeddingStage {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    max_in_flight: usize,
}

impl EmbeddingStage {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize, max_in_flight: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub async fn run_profile(
        &self,
        store: &Arc<SqliteStore>,
        profile: &EmbeddingProfile,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome> {
        let pending = store.pending_embedding_spans(&profile.name, None)?;
        let mut outcome = StageOutcome::default();
        if pending.is_empty() {
            return Ok(outcome);
        }
        tracing::info!(
            profile = %profile.name,
            pending = pending.len(),
            "embedding stage started"
        );

        'batches: for chunk in pending.chunks(self.batch_size) {
            let mut in_flight: JoinSet<(Span, Result<Vec<f32>>)> = JoinSet::new();

            for span in chunk {
                if cancel.is_cancelled() {
                    outcome.cancelled = true;
                    self.drain(store, profile, &mut in_flight, &mut outcome).await?;
                    break 'batches;
                }
                while in_flight.len() >= self.max_in_flight {
                    if let Some(joined) = in_flight.join_next().await {
                        self.persist(store, profile, joined, &mut outcome)?;
                    }
                }

                let embedder = Arc::clone(&self.embedder);
                let span = span.clone();
                let profile = profile.clone();
                in_flight.spawn(async move {
                    let vector = embedder.embed(&span.source, &profile).await;
                    (span, vector)
                });
            }

            self.drain(store, profile, &mut in_flight, &mut outcome).await?;
        }

        tracing::info!(
            profile = %profile.name,
            completed = outcome.completed,
            failed = outcome.failed,
            cancelled = outcome.cancelled,
            "embedding stage finished"
        );
        Ok(outcome)
    }

    async fn drain(
        &self,
        store: &Arc<SqliteStore>,
        profile: &EmbeddingProfile,
        in_flight: &mut JoinSet<(Span, Result<Vec<f32>>)>,
        outcome: &mut StageOutcome,
    ) -> Result<()> {
        while let Some(joined) = in_flight.join_next().await {
            self.persist(store, profile, joined, outcome)?;
        }
        Ok(())
    }

    fn persist(
        &self,
        store: &Arc<SqliteStore>,
        profile: &EmbeddingProfile,
        joined: std::result::Result<(Span, Result<Vec<f32>>), tokio::task::JoinError>,
        outcome: &mut StageOutcome,
    ) -> Result<()> {
        let Ok((span, vector)) = joined else {
            outcome.failed += 1;
            return Ok(());
        };
        let vector = vector.and_then(|v| {
            if v.len() == profile.dim {
                Ok(v)
            } else {
                Err(AtlasError::Capability(format!(
                    "embedder returned {} dimensions, profile '{}' expects {}",
                    v.len(),
                    profile.name,
                    profile.dim
                )))
            }
        });
        match vector {
            Ok(vector) => {
                store.upsert_embedding(&EmbeddingRecord {
                    span_id: span.id,
                    profile: profile.name.clone(),
                    dim: profile.dim,
                    vector,
                    source_hash: span.source_hash,
                    generated_at: now_unix(),
                })?;
                outcome.completed += 1;
            }
            Err(e) => {
                tracing::warn!(
                    span = %span.id,
                    profile = %profile.name,
                    error = %e,
                    "embedding failed, span stays pending"
                );
                outcome.failed += 1;
            }
        }
        Ok(())
    }
}

/// Cosine similarity in [-1, 1]; zero vectors compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileRecord, FileStatus, SpanKind};

    struct FakeEmbedder {
        dim: usize,
    }

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str, _profile: &EmbeddingProfile) -> Result<Vec<f32>> {
            let seed = text.len() as f32;
            Ok((0..self.dim).map(|i| seed + i as f32).collect())
        }
    }

    fn profile(name: &str, dim: usize) -> EmbeddingProfile {
        EmbeddingProfile {
            name: name.to_string(),
            model: "test-model".to_string(),
            dim,
        }
    }

    fn seeded_store(span_count: usize) -> Arc<SqliteStore> {
        let store = SqliteStore::in_memory().unwrap();
        let spans: Vec<Span> = (0..span_count)
            .map(|i| {
                Span::new(
                    "src/lib.rs",
                    SpanKind::Function,
                    Some(format!("func_{i}")),
                    i as u32 * 10 + 1,
                    i as u32 * 10 + 5,
                    i as u32 * 100,
                    i as u32 * 100 + 80,
                    format!("fn func_{i}() {{}}"),
                )
            })
            .collect();
        let file = FileRecord {
            path: "src/lib.rs".to_string(),
            content_hash: "h".to_string(),
            last_seen_commit: None,
            status: FileStatus::Ok,
            error: None,
        };
        store.replace_file_spans(&file, &spans, &[]).unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_embeds_per_profile_independently() {
        let store = seeded_store(3);
        let stage = EmbeddingStage::new(Arc::new(FakeEmbedder { dim: 4 }), 2, 2);

        let outcome = stage
            .run_profile(&store, &profile("default", 4), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.completed, 3);

        // `default` settled, `large` still fully pending.
        assert!(store.pending_embedding_spans("default", None).unwrap().is_empty());
        assert_eq!(store.pending_embedding_spans("large", None).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_span() {
        let store = seeded_store(2);
        let stage = EmbeddingStage::new(Arc::new(FakeEmbedder { dim: 4 }), 2, 1);

        let outcome = stage
            .run_profile(&store, &profile("default", 8), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.failed, 2);
        assert_eq!(store.pending_embedding_spans("default", None).unwrap().len(), 2);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
