//! Corpus file format.
//!
//! One JSON document, optionally gzip-compressed (`.gz` suffix or gzip magic):
//! a header (format tag, version, build id, embedding model, dimension,
//! creation time, checksum) followed by the entries with their embeddings.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

use super::embedding::EmbeddingError;

pub const CORPUS_FORMAT: &str = "shellmaster-corpus";
pub const CORPUS_VERSION: u32 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("Failed to access corpus {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid corpus JSON: {0}")]
    Parse(String),

    #[error("Not a corpus file (format tag '{0}')")]
    Format(String),

    #[error("Unsupported corpus version {0} (expected 1)")]
    UnsupportedVersion(u32),

    #[error("Entry '{id}' has dimension {actual}, corpus declares {expected}")]
    Dimension {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate entry id '{0}'")]
    DuplicateId(String),

    #[error("Checksum mismatch: header says {expected}, entries hash to {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Input files are unusable: {0}")]
    Input(String),

    #[error("Embedding failed while building corpus: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// One (description, command) pair with its embedding, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    pub description: String,
    pub command_template: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusFile {
    pub format: String,
    pub version: u32,
    pub build_id: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
    pub checksum: String,
    pub entries: Vec<CorpusEntry>,
}

impl CorpusFile {
    /// New corpus with a fresh build id and checksum.
    pub fn new(entries: Vec<CorpusEntry>, embedding_model: impl Into<String>, dimension: usize) -> Self {
        let checksum = Self::compute_checksum(&entries);
        Self {
            format: CORPUS_FORMAT.to_string(),
            version: CORPUS_VERSION,
            build_id: uuid::Uuid::new_v4().to_string(),
            embedding_model: embedding_model.into(),
            dimension,
            created_at: Utc::now(),
            checksum,
            entries,
        }
    }

    /// SHA-256 over every entry's id, description, command and embedding bytes.
    pub fn compute_checksum(entries: &[CorpusEntry]) -> String {
        let mut hasher = Sha256::new();
        for entry in entries {
            hasher.update(entry.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.description.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.command_template.as_bytes());
            hasher.update([0u8]);
            for x in &entry.embedding {
                hasher.update(x.to_le_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn validate(&self) -> Result<(), CorpusError> {
        if self.format != CORPUS_FORMAT {
            return Err(CorpusError::Format(self.format.clone()));
        }
        if self.version != CORPUS_VERSION {
            return Err(CorpusError::UnsupportedVersion(self.version));
        }

        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if entry.embedding.len() != self.dimension {
                return Err(CorpusError::Dimension {
                    id: entry.id.clone(),
                    expected: self.dimension,
                    actual: entry.embedding.len(),
                });
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(CorpusError::DuplicateId(entry.id.clone()));
            }
        }

        let actual = Self::compute_checksum(&self.entries);
        if actual != self.checksum {
            return Err(CorpusError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Read and validate a corpus file.
    pub fn read(path: &Path) -> Result<Self, CorpusError> {
        let io_err = |source| CorpusError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut bytes = Vec::new();
        File::open(path)
            .and_then(|f| BufReader::new(f).read_to_end(&mut bytes))
            .map_err(io_err)?;

        let json = if bytes.starts_with(&GZIP_MAGIC) {
            let mut out = Vec::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_end(&mut out)
                .map_err(io_err)?;
            out
        } else {
            bytes
        };

        let corpus: CorpusFile =
            serde_json::from_slice(&json).map_err(|e| CorpusError::Parse(e.to_string()))?;
        corpus.validate()?;
        Ok(corpus)
    }

    /// Write the corpus; gzip when `path` ends in `.gz`.
    pub fn write(&self, path: &Path) -> Result<(), CorpusError> {
        let io_err = |source| CorpusError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = File::create(path).map_err(io_err)?;
        let gz = path.extension().map(|e| e == "gz").unwrap_or(false);
        if gz {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut encoder, self).map_err(|e| CorpusError::Parse(e.to_string()))?;
            encoder.finish().and_then(|mut w| w.flush()).map_err(io_err)?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, self).map_err(|e| CorpusError::Parse(e.to_string()))?;
            writer.flush().map_err(io_err)?;
        }

        info!(
            "Wrote corpus {} ({} entries, build {})",
            path.display(),
            self.entries.len(),
            self.build_id
        );
        Ok(())
    }
}
