//! faceset-core — Face detection decoding and embedding extraction engine.
//!
//! Decodes SSD res10 detection tensors into confidence-gated pixel boxes and
//! turns face regions into 128-d OpenFace embeddings, both running via ONNX
//! Runtime for CPU inference. Inference engines are injected behind traits so
//! the numeric pipeline stays testable without model files.

pub mod detector;
pub mod embedder;
pub mod frame;
pub mod pipeline;
pub mod tensor;
pub mod types;

pub use detector::{BoxDecoder, DetectorEngine, OnnxDetector};
pub use embedder::{EmbeddingEngine, EmbeddingExtractor, OnnxEmbedder};
pub use pipeline::{FaceEditor, FacePipeline, Landmarker};
pub use tensor::DetectionTensor;
pub use types::{Detection, Embedding, FrameSize, PixelBox};
