//! Corpus build, persistence and retrieval.

use std::fs;
use std::sync::Arc;

use shellmaster_common::knowledge::{
    build_corpus, read_pairs, CorpusError, CorpusFile, HashEmbedder, KnowledgeStore,
    RetrievalStatus,
};
use shellmaster_common::PipelineError;

const NL: &str = "\
show disk usage of all mounted filesystems
list files sorted by size
show free memory in human readable units
find all pdf files in the home directory
count lines in a file
";

const CM: &str = "\
df -h
ls -lS
free -h
find ~ -name '*.pdf'
wc -l file.txt
";

async fn built_corpus(dir: &std::path::Path, embedder: &HashEmbedder) -> CorpusFile {
    let nl = dir.join("all.nl");
    let cm = dir.join("all.cm");
    fs::write(&nl, NL).unwrap();
    fs::write(&cm, CM).unwrap();
    let pairs = read_pairs(&nl, &cm).unwrap();
    build_corpus(pairs, embedder, 2, |_, _| {}).await.unwrap()
}

#[tokio::test]
async fn test_build_write_load_and_query() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new(128);
    let corpus = built_corpus(dir.path(), &embedder).await;
    assert_eq!(corpus.entries.len(), 5);
    assert_eq!(corpus.entries[0].id, "nl2bash-1");

    let path = dir.path().join("corpus.json.gz");
    corpus.write(&path).unwrap();
    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    let store = KnowledgeStore::load(&path, Arc::new(HashEmbedder::new(128)), 0.1).unwrap();
    assert_eq!(store.len(), 5);
    assert_eq!(store.build_id(), Some(corpus.build_id.as_str()));

    let result = store.query("show disk usage", 2).await.unwrap();
    assert_eq!(result.status, RetrievalStatus::Ok);
    assert!(!result.is_empty() && result.len() <= 2);
    assert_eq!(result.entries[0].entry.command_template, "df -h");
    for pair in result.entries.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
    for scored in &result.entries {
        assert!(scored.similarity >= 0.1 && scored.similarity <= 1.0);
    }
}

#[tokio::test]
async fn test_retrieval_never_exceeds_k_or_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new(128);
    let corpus = built_corpus(dir.path(), &embedder).await;
    let store = KnowledgeStore::from_corpus(corpus, Arc::new(embedder), -1.0);

    for k in 0..7 {
        let result = store.query("files", k).await.unwrap();
        assert!(result.len() <= k);
    }
    // threshold of -1 admits everything
    assert_eq!(store.query("files", 10).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_tampered_corpus_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = HashEmbedder::new(64);
    let mut corpus = built_corpus(dir.path(), &embedder).await;
    corpus.entries[0].command_template = "rm -rf /".to_string();

    let path = dir.path().join("corpus.json");
    corpus.write(&path).unwrap();

    let result = KnowledgeStore::load(&path, Arc::new(embedder), 0.35);
    assert!(matches!(result, Err(CorpusError::ChecksumMismatch { .. })));
}

#[tokio::test]
async fn test_missing_corpus_gives_explicit_empty_result() {
    let dir = tempfile::tempdir().unwrap();
    let store = KnowledgeStore::load(
        &dir.path().join("absent.json.gz"),
        Arc::new(HashEmbedder::new(64)),
        0.35,
    )
    .unwrap();
    assert!(store.is_empty());

    let result = store.query("anything", 5).await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result.empty_reason(), Some("corpus not loaded"));
}

#[tokio::test]
async fn test_query_dimension_mismatch_is_embedding_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let corpus = built_corpus(dir.path(), &HashEmbedder::new(32)).await;
    let store = KnowledgeStore::from_corpus(corpus, Arc::new(HashEmbedder::new(64)), 0.35);

    let result = store.query("show disk usage", 3).await;
    assert!(matches!(result, Err(PipelineError::EmbeddingUnavailable(_))));
}

#[test]
fn test_not_a_corpus_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.json");
    fs::write(&path, r#"{"hello": "world"}"#).unwrap();
    assert!(matches!(CorpusFile::read(&path), Err(CorpusError::Parse(_))));
}
