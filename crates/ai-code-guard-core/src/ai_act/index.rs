use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::splitter::ActChunk;
use crate::llm::EmbeddingModel;

/// Number of chunks sent per embedding request.
pub const EMBED_BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read index at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("index at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("index entry {id} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        id: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: ActChunk,
    pub vector: Vec<f32>,
}

/// A chunk returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSection {
    pub chunk: ActChunk,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// In-memory vector index over the regulation, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActIndex {
    /// Embedding model that produced the vectors.
    pub model: String,
    /// blake3 hex digest of the source text.
    pub corpus_digest: String,
    pub dimension: usize,
    pub entries: Vec<IndexedChunk>,
}

/// Digest used to detect a changed corpus.
pub fn corpus_digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

impl ActIndex {
    /// Embed every chunk in batches and assemble an index.
    pub async fn build(
        chunks: Vec<ActChunk>,
        embedder: &dyn EmbeddingModel,
        corpus_digest: String,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(chunks.len());
        for (batch_idx, batch) in chunks.chunks(EMBED_BATCH_SIZE).enumerate() {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = embedder
                .embed(&texts)
                .await
                .with_context(|| format!("failed to embed chunk batch {batch_idx}"))?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding model returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                );
            }
            debug!(batch = batch_idx, size = batch.len(), "embedded chunk batch");
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexedChunk { chunk, vector }),
            );
        }

        let dimension = entries.first().map(|e| e.vector.len()).unwrap_or_default();
        let index = Self {
            model: embedder.model_id().to_string(),
            corpus_digest,
            dimension,
            entries,
        };
        index.validate()?;
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this index was built from the same corpus with the same embedding model.
    pub fn is_current(&self, model: &str, corpus_digest: &str) -> bool {
        self.model == model && self.corpus_digest == corpus_digest
    }

    /// Top `k` chunks by descending cosine similarity to `query`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredSection> {
        let mut scored: Vec<ScoredSection> = self
            .entries
            .iter()
            .map(|entry| ScoredSection {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(query, &entry.vector),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);
        scored
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec(self).context("failed to serialise vector index")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write vector index to {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let raw = fs::read(path).map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let index: Self = serde_json::from_slice(&raw).map_err(|source| IndexError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        index.validate()?;
        Ok(index)
    }

    fn validate(&self) -> Result<(), IndexError> {
        for entry in &self.entries {
            if entry.vector.len() != self.dimension {
                return Err(IndexError::DimensionMismatch {
                    id: entry.chunk.id,
                    expected: self.dimension,
                    found: entry.vector.len(),
                });
            }
        }
        Ok(())
    }
}

/// Cosine similarity; zero when either vector has no magnitude or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashingEmbeddings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn chunks(texts: &[&str]) -> Vec<ActChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(id, text)| ActChunk::new(id, *text))
            .collect()
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModel for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn model_id(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_returns_best_matches_first() {
        let embedder = HashingEmbeddings::default();
        let index = ActIndex::build(
            chunks(&[
                "Article 5 prohibited practices social scoring",
                "Article 6 classification rules for high-risk AI systems",
                "Article 50 transparency obligations for chatbots",
            ]),
            &embedder,
            corpus_digest("corpus"),
        )
        .await
        .unwrap();
        assert_eq!(index.model, HashingEmbeddings::MODEL_ID);
        assert_eq!(index.dimension, 256);

        let query = embedder.embed_one("high-risk classification rules");
        let results = index.search(&query, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.article.as_deref(), Some("6 classification rules for high-risk AI systems"));
        assert!(results[0].score >= results[1].score);
        assert!(index.search(&query, 10).len() == 3);
    }

    #[tokio::test]
    async fn build_embeds_in_batches() {
        let texts: Vec<String> = (0..(EMBED_BATCH_SIZE * 2 + 1))
            .map(|i| format!("chunk {i}"))
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let index = ActIndex::build(chunks(&refs), &embedder, "digest".into())
            .await
            .unwrap();
        assert_eq!(index.len(), texts.len());
        assert_eq!(embedder.calls.load(AtomicOrdering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persisted_index_round_trips_and_tracks_staleness() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("vectorstores").join("eu_ai_act.json");
        let embedder = HashingEmbeddings::new(8);
        let digest = corpus_digest("Article 1 text");
        let index = ActIndex::build(chunks(&["Article 1 text"]), &embedder, digest.clone())
            .await
            .unwrap();
        index.save(&path).unwrap();

        let loaded = ActIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert!(loaded.is_current(HashingEmbeddings::MODEL_ID, &digest));
        assert!(!loaded.is_current(HashingEmbeddings::MODEL_ID, &corpus_digest("changed")));
        assert!(!loaded.is_current("text-embedding-3-small", &digest));
    }

    #[test]
    fn corrupt_index_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("index.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ActIndex::load(&path),
            Err(IndexError::Corrupt { .. })
        ));
        assert!(matches!(
            ActIndex::load(&temp.path().join("missing.json")),
            Err(IndexError::Io { .. })
        ));
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let index = ActIndex {
            model: "m".into(),
            corpus_digest: "d".into(),
            dimension: 2,
            entries: vec![IndexedChunk {
                chunk: ActChunk::new(0, "text"),
                vector: vec![1.0, 2.0, 3.0],
            }],
        };
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("index.json");
        index.save(&path).unwrap();
        assert!(matches!(
            ActIndex::load(&path),
            Err(IndexError::DimensionMismatch { expected: 2, found: 3, .. })
        ));
    }
}
