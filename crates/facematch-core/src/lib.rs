//! facematch-core — face embedding extraction and gallery matching.
//!
//! Crops and normalizes faces for one of several embedding networks, runs
//! them via ONNX Runtime, and matches the resulting vectors against a
//! registered gallery under L2 or cosine scoring.

pub mod detector;
pub mod matcher;
pub mod models;
pub mod preprocess;
pub mod recognizer;
pub mod scoring;
pub mod types;

pub use detector::{DetectorError, FaceDetector, FullFrameDetector};
pub use matcher::{compare_pair, match_gallery, GalleryMatcher, Matcher, PAIR_SIMILARITY_THRESHOLD};
pub use models::{all_descriptors, ModelDescriptor, ModelVariant, Normalization};
pub use preprocess::PreprocessError;
pub use recognizer::{EmbeddingModel, InferenceSession, ModelLoader, OrtLoader, RecognizerError};
pub use scoring::ScoringError;
pub use types::{
    BoundingBox, Embedding, IdentityRecord, IdentityScore, MatchResult, Metric, PairComparison,
    Thresholds, UNKNOWN_LABEL,
};
