//! Knowledge Store: known-good (description, command) pairs with embeddings.

pub mod corpus;
pub mod embedding;
pub mod ingest;
pub mod store;

use std::sync::Arc;

pub use corpus::{CorpusEntry, CorpusError, CorpusFile, CORPUS_FORMAT, CORPUS_VERSION};
pub use embedding::{Embedder, EmbeddingError, HashEmbedder, HttpEmbedder};
pub use ingest::{align_pairs, build_corpus, read_pairs, Pair, DEFAULT_BATCH_SIZE};
pub use store::{KnowledgeEntry, KnowledgeStore, RetrievalResult, RetrievalStatus, ScoredEntry};

use crate::config::{EmbeddingKind, ShellmasterConfig};

/// Embedder selected by `embedding.kind`.
pub fn embedder_from_config(config: &ShellmasterConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    Ok(match config.embedding.kind {
        EmbeddingKind::Http => Arc::new(HttpEmbedder::new(
            &config.embedding,
            &config.backend.api_key,
            config.backend.use_proxy,
        )?),
        EmbeddingKind::Hash => Arc::new(HashEmbedder::default()),
    })
}
