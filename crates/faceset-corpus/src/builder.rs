//! Balanced corpus construction.
//!
//! Layout consumed: `training_root/<label>/*.<ext>` for named classes and a
//! flat `unknown_root/*.<ext>` for the background class. Balancing happens by
//! construction — every class list is shuffled and truncated to the rarest
//! named class's size — rather than by post-hoc resampling.

use crate::sink::CorpusSink;
use faceset_core::detector::DetectorEngine;
use faceset_core::embedder::EmbeddingEngine;
use faceset_core::pipeline::PipelineError;
use faceset_core::{frame, Embedding, FacePipeline};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reserved label for the negative/background class.
pub const UNKNOWN_LABEL: &str = "unknown";

/// File extensions treated as images during enumeration (case-insensitive).
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("training root has no class directories: {0}")]
    NoClasses(PathBuf),
    #[error("class '{0}' has no images; an empty class collapses the balanced set to nothing")]
    EmptyClass(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialize: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Ordered (name, embedding) collection built in one extraction pass.
///
/// `names` and `embeddings` are parallel and index-aligned; `labels` is the
/// set of classes observed, including [`UNKNOWN_LABEL`].
#[derive(Debug, Clone, PartialEq)]
pub struct Corpus {
    pub names: Vec<String>,
    pub embeddings: Vec<Embedding>,
    pub labels: BTreeSet<String>,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Number of samples carrying the given label.
    pub fn count_of(&self, label: &str) -> usize {
        self.names.iter().filter(|n| n.as_str() == label).count()
    }
}

/// One class's worth of enumerated image paths.
struct ClassList {
    label: String,
    paths: Vec<PathBuf>,
}

/// Builds a balanced corpus by driving the face pipeline over a labeled
/// image tree. Single worker, one image to completion at a time.
pub struct CorpusBuilder<D, E> {
    pipeline: FacePipeline<D, E>,
    seed: Option<u64>,
}

impl<D: DetectorEngine, E: EmbeddingEngine> CorpusBuilder<D, E> {
    pub fn new(pipeline: FacePipeline<D, E>) -> Self {
        Self {
            pipeline,
            seed: None,
        }
    }

    /// Fix the shuffle seed, making the sampled subset (and therefore the
    /// whole corpus) reproducible across runs. Without a seed the per-class
    /// counts are still deterministic but the chosen subset is not.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the corpus and persist it through `sink` in one pass.
    ///
    /// Per-image failures (unreadable file, no usable face, degenerate crop)
    /// skip the image and never abort the run; structural failures (bad
    /// directory tree, engine error, sink error) do.
    pub fn build(
        &mut self,
        training_root: &Path,
        unknown_root: &Path,
        sink: &dyn CorpusSink,
    ) -> Result<Corpus, CorpusError> {
        let mut classes = enumerate_classes(training_root)?;
        if classes.is_empty() {
            return Err(CorpusError::NoClasses(training_root.to_path_buf()));
        }
        for class in &classes {
            if class.paths.is_empty() {
                return Err(CorpusError::EmptyClass(class.label.clone()));
            }
        }

        // The unknown pool never shrinks the minimum; it is only capped by it.
        let num_pics = classes.iter().map(|c| c.paths.len()).min().unwrap_or(0);
        classes.push(ClassList {
            label: UNKNOWN_LABEL.to_string(),
            paths: list_images(unknown_root)?,
        });

        let mut rng: StdRng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        for class in &mut classes {
            class.paths.shuffle(&mut rng);
            class.paths.truncate(num_pics);
        }

        tracing::info!(
            classes = classes.len() - 1,
            num_pics,
            seeded = self.seed.is_some(),
            "building balanced corpus"
        );

        let mut corpus = Corpus {
            names: Vec::new(),
            embeddings: Vec::new(),
            labels: classes.iter().map(|c| c.label.clone()).collect(),
        };

        for class in &classes {
            for path in &class.paths {
                match self.embed_one(path)? {
                    Some(embedding) => {
                        corpus.names.push(class.label.clone());
                        corpus.embeddings.push(embedding);
                    }
                    None => {
                        tracing::debug!(path = %path.display(), "no usable face, image skipped");
                    }
                }
            }
        }

        tracing::info!(samples = corpus.len(), "corpus built, persisting");
        sink.persist(&corpus)?;

        Ok(corpus)
    }

    /// Load, resize, and embed the best-guess face of one image. Unreadable
    /// images are reported as absent, not as errors.
    fn embed_one(&mut self, path: &Path) -> Result<Option<Embedding>, CorpusError> {
        let image = match frame::load_rgb(path) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "unreadable image, skipping");
                return Ok(None);
            }
        };

        let prepared = self.pipeline.prepare(image);
        Ok(self.pipeline.embed_best(&prepared)?)
    }
}

/// Every subdirectory of the training root is a class; its name is the label.
/// Sorted by label for deterministic traversal.
fn enumerate_classes(training_root: &Path) -> Result<Vec<ClassList>, CorpusError> {
    let entries = std::fs::read_dir(training_root).map_err(|source| CorpusError::Io {
        path: training_root.to_path_buf(),
        source,
    })?;

    let mut classes = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CorpusError::Io {
            path: training_root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let label = entry.file_name().to_string_lossy().into_owned();
        classes.push(ClassList {
            label,
            paths: list_images(&path)?,
        });
    }

    classes.sort_by(|a, b| a.label.cmp(&b.label));
    Ok(classes)
}

/// Image files directly under `dir`, sorted by path.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let entries = std::fs::read_dir(dir).map_err(|source| CorpusError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CorpusError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && has_image_extension(&path) {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|known| *known == ext)
        })
        .unwrap_or(false)
}
