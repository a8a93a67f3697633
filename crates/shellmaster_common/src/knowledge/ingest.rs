//! Corpus building from line-aligned NL2Bash files.
//!
//! `all.nl` holds one description per line, `all.cm` the matching command on
//! the same line number. Pairs with a blank side are skipped; if the files
//! differ in length the longer one is truncated.

use std::fs;
use std::path::Path;
use tracing::warn;

use super::corpus::{CorpusEntry, CorpusError, CorpusFile};
use super::embedding::{EmbeddingError, Embedder};

/// Default number of descriptions per embedding request
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// A (description, command) pair before embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair {
    /// 1-based line number in the source files
    pub line: usize,
    pub description: String,
    pub command: String,
}

/// Read and align the two files.
pub fn read_pairs(nl_path: &Path, cm_path: &Path) -> Result<Vec<Pair>, CorpusError> {
    let read = |path: &Path| {
        fs::read(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .map_err(|source| CorpusError::Io {
                path: path.display().to_string(),
                source,
            })
    };
    let nl = read(nl_path)?;
    let cm = read(cm_path)?;
    Ok(align_pairs(&nl, &cm))
}

pub fn align_pairs(nl: &str, cm: &str) -> Vec<Pair> {
    let nl_lines: Vec<&str> = nl.lines().collect();
    let cm_lines: Vec<&str> = cm.lines().collect();
    if nl_lines.len() != cm_lines.len() {
        warn!(
            nl = nl_lines.len(),
            cm = cm_lines.len(),
            "Line counts differ; truncating to the shorter file"
        );
    }

    nl_lines
        .iter()
        .zip(cm_lines.iter())
        .enumerate()
        .filter_map(|(i, (d, c))| {
            let (d, c) = (d.trim(), c.trim());
            (!d.is_empty() && !c.is_empty()).then(|| Pair {
                line: i + 1,
                description: d.to_string(),
                command: c.to_string(),
            })
        })
        .collect()
}

/// Embed `pairs` in batches and assemble a corpus.
///
/// `progress` is called with (done, total) after every batch.
pub async fn build_corpus<F>(
    pairs: Vec<Pair>,
    embedder: &dyn Embedder,
    batch_size: usize,
    mut progress: F,
) -> Result<CorpusFile, CorpusError>
where
    F: FnMut(usize, usize),
{
    if pairs.is_empty() {
        return Err(CorpusError::Input("no usable (description, command) pairs".to_string()));
    }

    let total = pairs.len();
    let batch_size = batch_size.max(1);
    let mut entries = Vec::with_capacity(total);
    let mut dimension: Option<usize> = embedder.dimension();

    for chunk in pairs.chunks(batch_size) {
        let texts: Vec<String> = chunk.iter().map(|p| p.description.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != chunk.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                chunk.len(),
                vectors.len()
            ))
            .into());
        }

        for (pair, embedding) in chunk.iter().zip(vectors) {
            let expected = *dimension.get_or_insert(embedding.len());
            if embedding.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                }
                .into());
            }
            entries.push(CorpusEntry {
                id: format!("nl2bash-{}", pair.line),
                description: pair.description.clone(),
                command_template: pair.command.clone(),
                embedding,
            });
        }
        progress(entries.len(), total);
    }

    Ok(CorpusFile::new(
        entries,
        embedder.model_id(),
        dimension.unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::embedding::HashEmbedder;

    #[test]
    fn test_align_skips_blank_and_truncates() {
        let nl = "list files\n\nshow disk usage\nextra description\n";
        let cm = "ls -la\npwd\ndf -h\n";
        let pairs = align_pairs(nl, cm);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].line, 1);
        assert_eq!(pairs[1].line, 3);
        assert_eq!(pairs[1].command, "df -h");
    }

    #[tokio::test]
    async fn test_build_corpus_batches_and_reports_progress() {
        let pairs = align_pairs("a\nb\nc\n", "1\n2\n3\n");
        let embedder = HashEmbedder::new(16);
        let mut seen = Vec::new();
        let corpus = build_corpus(pairs, &embedder, 2, |done, total| seen.push((done, total)))
            .await
            .unwrap();
        assert_eq!(seen, vec![(2, 3), (3, 3)]);
        assert_eq!(corpus.dimension, 16);
        assert_eq!(corpus.embedding_model, "hash-16");
        corpus.validate().unwrap();
    }

    #[tokio::test]
    async fn test_build_corpus_rejects_empty_input() {
        let embedder = HashEmbedder::new(16);
        let result = build_corpus(Vec::new(), &embedder, 8, |_, _| {}).await;
        assert!(matches!(result, Err(CorpusError::Input(_))));
    }
}
