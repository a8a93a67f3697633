//! In-memory nearest-neighbour store over the corpus.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::corpus::{CorpusEntry, CorpusError, CorpusFile};
use super::embedding::{normalize, Embedder};
use crate::error::PipelineError;

/// A corpus entry without its embedding (those live in the store's buffer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub description: String,
    pub command_template: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    #[serde(flatten)]
    pub entry: KnowledgeEntry,
    /// Cosine similarity in [-1, 1]
    pub similarity: f32,
}

/// Why a retrieval result looks the way it does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RetrievalStatus {
    Ok,
    /// Nothing to offer; not an error
    Empty { reason: String },
    /// Retrieval could not run (embedding backend down, dimension mismatch)
    Degraded { reason: String },
}

/// Most similar first; never longer than the requested k.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub entries: Vec<ScoredEntry>,
    #[serde(flatten)]
    pub status: RetrievalStatus,
}

impl RetrievalResult {
    pub fn empty(reason: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            status: RetrievalStatus::Empty {
                reason: reason.into(),
            },
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            status: RetrievalStatus::Degraded {
                reason: reason.into(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Why there is nothing to show, when there is nothing to show.
    pub fn empty_reason(&self) -> Option<&str> {
        match &self.status {
            RetrievalStatus::Ok if self.entries.is_empty() => Some("no reference commands"),
            RetrievalStatus::Ok => None,
            RetrievalStatus::Empty { reason } | RetrievalStatus::Degraded { reason } => Some(reason),
        }
    }
}

/// Read-only corpus plus query embedder. Share through `Arc`.
pub struct KnowledgeStore {
    entries: Vec<KnowledgeEntry>,
    /// Row-major, unit-length vectors: entry i is `vectors[i*dim..(i+1)*dim]`
    vectors: Vec<f32>,
    dimension: usize,
    embedding_model: Option<String>,
    build_id: Option<String>,
    embedder: Arc<dyn Embedder>,
    min_similarity: f32,
}

impl KnowledgeStore {
    /// A store with no corpus; every query is `empty`.
    pub fn empty(embedder: Arc<dyn Embedder>, min_similarity: f32) -> Self {
        Self {
            entries: Vec::new(),
            vectors: Vec::new(),
            dimension: 0,
            embedding_model: None,
            build_id: None,
            embedder,
            min_similarity,
        }
    }

    /// Build from a validated corpus.
    pub fn from_corpus(corpus: CorpusFile, embedder: Arc<dyn Embedder>, min_similarity: f32) -> Self {
        if corpus.embedding_model != embedder.model_id() {
            warn!(
                corpus_model = %corpus.embedding_model,
                query_model = %embedder.model_id(),
                "Corpus was embedded with a different model; similarities may be meaningless"
            );
        }

        let dimension = corpus.dimension;
        let mut entries = Vec::with_capacity(corpus.entries.len());
        let mut vectors = Vec::with_capacity(corpus.entries.len() * dimension);
        for CorpusEntry {
            id,
            description,
            command_template,
            mut embedding,
        } in corpus.entries
        {
            normalize(&mut embedding);
            vectors.extend_from_slice(&embedding);
            entries.push(KnowledgeEntry {
                id,
                description,
                command_template,
            });
        }

        Self {
            entries,
            vectors,
            dimension,
            embedding_model: Some(corpus.embedding_model),
            build_id: Some(corpus.build_id),
            embedder,
            min_similarity,
        }
    }

    /// Load `path`. A missing file gives an empty store; a corrupt one is an error.
    pub fn load(path: &Path, embedder: Arc<dyn Embedder>, min_similarity: f32) -> Result<Self, CorpusError> {
        if !path.exists() {
            info!("No corpus at {}, retrieval disabled", path.display());
            return Ok(Self::empty(embedder, min_similarity));
        }
        let corpus = CorpusFile::read(path)?;
        info!(
            "Loaded corpus {} ({} entries, dim {}, build {})",
            path.display(),
            corpus.entries.len(),
            corpus.dimension,
            corpus.build_id
        );
        Ok(Self::from_corpus(corpus, embedder, min_similarity))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn build_id(&self) -> Option<&str> {
        self.build_id.as_deref()
    }

    pub fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    pub fn entry(&self, index: usize) -> Option<&KnowledgeEntry> {
        self.entries.get(index)
    }

    /// Stored (normalised) embedding of entry `index`
    pub fn embedding(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Embed `text` and return up to `k` entries at or above `min_similarity`.
    pub async fn query(&self, text: &str, k: usize) -> Result<RetrievalResult, PipelineError> {
        if self.entries.is_empty() {
            return Ok(RetrievalResult::empty("corpus not loaded"));
        }
        if k == 0 {
            return Ok(RetrievalResult::empty("retrieval disabled (k = 0)"));
        }

        let mut query = self
            .embedder
            .embed(text)
            .await
            .map_err(|e| PipelineError::EmbeddingUnavailable(e.to_string()))?;
        if query.len() != self.dimension {
            return Err(PipelineError::EmbeddingUnavailable(format!(
                "query embedding has dimension {}, corpus has {}",
                query.len(),
                self.dimension
            )));
        }
        normalize(&mut query);

        let ranked = rank(&query, &self.vectors, self.dimension, k, self.min_similarity);
        if ranked.is_empty() {
            return Ok(RetrievalResult::empty(format!(
                "no reference command with similarity >= {:.2}",
                self.min_similarity
            )));
        }

        Ok(RetrievalResult {
            entries: ranked
                .into_iter()
                .map(|(i, similarity)| ScoredEntry {
                    entry: self.entries[i].clone(),
                    similarity,
                })
                .collect(),
            status: RetrievalStatus::Ok,
        })
    }
}

/// Exact scan: cosine of unit vectors, threshold, stable sort descending, top k.
pub fn rank(query: &[f32], vectors: &[f32], dimension: usize, k: usize, min_similarity: f32) -> Vec<(usize, f32)> {
    if dimension == 0 || k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, f32)> = vectors
        .chunks_exact(dimension)
        .enumerate()
        .map(|(i, row)| {
            let dot: f32 = row.iter().zip(query).map(|(a, b)| a * b).sum();
            (i, dot.clamp(-1.0, 1.0))
        })
        .filter(|(_, s)| *s >= min_similarity)
        .collect();
    // sort_by is stable: equal scores keep corpus order
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}
