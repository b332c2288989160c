//! faceset-corpus — Class-balanced training corpus assembly.
//!
//! Walks a labeled image tree plus an "unknown" background pool, balances
//! per-class sample counts by shuffle-and-truncate against the rarest named
//! class, runs the faceset-core pipeline per image, and persists the
//! resulting (name, embedding) collection through a caller-provided sink.

pub mod builder;
pub mod sink;

pub use builder::{Corpus, CorpusBuilder, CorpusError, UNKNOWN_LABEL};
pub use sink::{CorpusSink, JsonCorpusSink};
