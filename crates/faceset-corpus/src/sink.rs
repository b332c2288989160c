//! Corpus persistence.
//!
//! The durable format is a single object with two parallel, index-aligned
//! fields: the label per sample and the embedding per sample. A corpus is
//! written whole, once per extraction run; a new run produces a new file.

use crate::builder::{Corpus, CorpusError};
use faceset_core::Embedding;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Destination for a finished corpus.
pub trait CorpusSink {
    fn persist(&self, corpus: &Corpus) -> Result<(), CorpusError>;
}

/// Serialized form: `{"names": [...], "embeddings": [[...], ...]}`.
#[derive(Serialize)]
struct CorpusRecord<'a> {
    names: &'a [String],
    embeddings: &'a [Embedding],
}

/// JSON file sink with an atomic write: the corpus is serialized to a
/// sibling temporary file and renamed into place, so a crash mid-write never
/// leaves a truncated corpus behind.
pub struct JsonCorpusSink {
    path: PathBuf,
}

impl JsonCorpusSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CorpusSink for JsonCorpusSink {
    fn persist(&self, corpus: &Corpus) -> Result<(), CorpusError> {
        let record = CorpusRecord {
            names: &corpus.names,
            embeddings: &corpus.embeddings,
        };
        let json = serde_json::to_vec(&record)?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &json).map_err(|source| CorpusError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| CorpusError::Io {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(
            path = %self.path.display(),
            samples = corpus.len(),
            bytes = json.len(),
            "corpus persisted"
        );
        Ok(())
    }
}
