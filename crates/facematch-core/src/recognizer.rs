//! Embedding model adapter.
//!
//! [`EmbeddingModel`] wraps whichever network the active [`ModelDescriptor`]
//! names. Loading goes through a [`ModelLoader`]; the shipped [`OrtLoader`]
//! opens ONNX exports with ONNX Runtime.

use crate::models::ModelDescriptor;
use crate::preprocess::{self, PreprocessError};
use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; place the ONNX export in the model directory")]
    ModelNotFound(String),
    #[error("model not ready; initialize() must run after every set_model()")]
    ModelNotReady,
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One loaded network. Takes an NHWC tensor, returns the flat output buffer.
pub trait InferenceSession: Send {
    fn run(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, RecognizerError>;
}

/// Turns a descriptor into a loaded session.
pub trait ModelLoader: Send {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn InferenceSession>, RecognizerError>;
}

/// Loads `descriptor.asset` from a model directory with ONNX Runtime.
#[derive(Debug, Clone)]
pub struct OrtLoader {
    model_dir: PathBuf,
    intra_threads: usize,
}

impl OrtLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    pub fn model_path(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.model_dir.join(descriptor.asset)
    }
}

impl ModelLoader for OrtLoader {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn InferenceSession>, RecognizerError> {
        let path = self.model_path(descriptor);
        if !path.exists() {
            return Err(RecognizerError::ModelNotFound(path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(self.intra_threads)?
            .commit_from_file(&path)?;

        tracing::info!(
            path = %path.display(),
            model = descriptor.name,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded embedding model"
        );

        Ok(Box::new(OrtSession { session }))
    }
}

struct OrtSession {
    session: Session,
}

impl InferenceSession for OrtSession {
    fn run(&mut self, input: &Array4<f32>) -> Result<Vec<f32>, RecognizerError> {
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        Ok(raw_data.to_vec())
    }
}

/// Readiness of the adapter. Only `set_model` and `initialize` move it.
enum ModelState {
    Unloaded,
    Ready(Box<dyn InferenceSession>),
}

/// Embedding extractor parameterized by the active model descriptor.
///
/// `embed` takes `&mut self`, so one adapter runs at most one inference at a
/// time.
pub struct EmbeddingModel {
    descriptor: ModelDescriptor,
    loader: Box<dyn ModelLoader>,
    state: ModelState,
}

impl EmbeddingModel {
    pub fn new(descriptor: ModelDescriptor, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            descriptor,
            loader,
            state: ModelState::Unloaded,
        }
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    /// Swap the active model. The previous session is dropped and
    /// [`initialize`](Self::initialize) must run before the next embedding.
    pub fn set_model(&mut self, descriptor: ModelDescriptor) {
        tracing::info!(from = self.descriptor.name, to = descriptor.name, "switching embedding model");
        self.descriptor = descriptor;
        self.state = ModelState::Unloaded;
    }

    /// Load the active model. On failure the adapter stays unloaded.
    pub fn initialize(&mut self) -> Result<(), RecognizerError> {
        self.state = ModelState::Unloaded;
        let session = self.loader.load(&self.descriptor)?;
        self.state = ModelState::Ready(session);
        tracing::debug!(model = self.descriptor.name, "embedding model ready");
        Ok(())
    }

    /// Run the model on a prepared `[batch, n, n, 3]` tensor.
    ///
    /// Returns one embedding per output row, each `output_dims` long.
    pub fn embed(&mut self, input: &Array4<f32>) -> Result<Vec<Embedding>, RecognizerError> {
        let ModelState::Ready(session) = &mut self.state else {
            return Err(RecognizerError::ModelNotReady);
        };

        let n = self.descriptor.input_dims;
        let shape = input.shape();
        if shape[0] == 0 || shape[1..] != [n, n, 3] {
            return Err(RecognizerError::DimensionMismatch(format!(
                "{} expects input [_, {n}, {n}, 3], got {shape:?}",
                self.descriptor.name
            )));
        }

        let started = Instant::now();
        let raw = session.run(input)?;
        tracing::debug!(
            model = self.descriptor.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "inference finished"
        );

        let dims = self.descriptor.output_dims;
        Embedding::rows_from_flat(&raw, dims, self.descriptor.name).ok_or_else(|| {
            RecognizerError::DimensionMismatch(format!(
                "{} output has {} values, not a whole number of {dims}-dim rows",
                self.descriptor.name,
                raw.len()
            ))
        })
    }

    /// Preprocess a cropped face for the active model and embed it.
    pub fn embed_face(&mut self, face: &RgbImage) -> Result<Vec<Embedding>, RecognizerError> {
        if !self.is_ready() {
            return Err(RecognizerError::ModelNotReady);
        }
        let input = preprocess::prepare(face, &self.descriptor)?;
        self.embed(&input)
    }
}
