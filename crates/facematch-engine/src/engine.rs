use facematch_core::detector::DetectorError;
use facematch_core::preprocess::{self, PreprocessError};
use facematch_core::{
    compare_pair, match_gallery, BoundingBox, Embedding, EmbeddingModel, FaceDetector,
    IdentityRecord, IdentityScore, MatchResult, Metric, ModelDescriptor, ModelLoader,
    ModelVariant, PairComparison, RecognizerError, ScoringError, Thresholds,
};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("preprocess error: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("scoring error: {0}")]
    Scoring(#[from] ScoringError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("another recognition is in flight")]
    Busy,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Final result of one engine request.
#[derive(Debug)]
pub enum Outcome {
    /// The query matched a registered identity.
    Recognized {
        identity: IdentityRecord,
        score: f32,
        scores: Vec<IdentityScore>,
    },
    /// No identity passed the threshold, or the gallery was empty.
    NotFound {
        message: String,
        scores: Vec<IdentityScore>,
    },
    /// One match per detected face, in detector order.
    Faces(Vec<FaceMatch>),
    Registered(IdentityRecord),
    Compared(PairComparison),
    ModelChanged(ModelVariant),
    NoFace,
    Error(EngineError),
    /// Rejected up front: another request held the session.
    Busy,
}

/// Match result for one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub face: BoundingBox,
    pub result: MatchResult,
}

impl Outcome {
    fn empty_gallery() -> Self {
        Outcome::NotFound {
            message: "gallery is empty".into(),
            scores: Vec::new(),
        }
    }

    pub fn from_error(err: EngineError) -> Self {
        match err {
            EngineError::NoFaceDetected => Outcome::NoFace,
            EngineError::Busy => Outcome::Busy,
            other => Outcome::Error(other),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Recognized { .. } => "recognized",
            Outcome::NotFound { .. } => "not_found",
            Outcome::Faces(_) => "faces",
            Outcome::Registered(_) => "registered",
            Outcome::Compared(_) => "compared",
            Outcome::ModelChanged(_) => "model_changed",
            Outcome::NoFace => "no_face",
            Outcome::Error(_) => "error",
            Outcome::Busy => "busy",
        }
    }
}

/// Pipeline step of the session currently in flight.
///
/// `Idle` only while no session is claimed; a claimed session that the
/// engine thread has not picked up yet is `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Idle = 0,
    Queued = 1,
    Detecting = 2,
    Cropping = 3,
    Embedding = 4,
    Matching = 5,
}

impl Stage {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Stage::Queued,
            2 => Stage::Detecting,
            3 => Stage::Cropping,
            4 => Stage::Embedding,
            5 => Stage::Matching,
            _ => Stage::Idle,
        }
    }
}

/// Shared between handles and the engine thread.
/// `active` is 0 when idle, otherwise the token of the running session.
#[derive(Debug, Default)]
struct SessionState {
    active: AtomicU64,
    issued: AtomicU64,
    stage: AtomicU8,
}

/// Ownership of the single session slot. Released on drop, whichever way
/// the request ends: success, error, or the caller going away.
struct SessionGuard {
    state: Arc<SessionState>,
    token: u64,
}

impl SessionGuard {
    fn try_claim(state: &Arc<SessionState>) -> Option<Self> {
        let token = state.issued.fetch_add(1, Ordering::Relaxed) + 1;
        state
            .active
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        state.stage.store(Stage::Queued as u8, Ordering::Release);
        Some(Self {
            state: state.clone(),
            token,
        })
    }

    fn enter(&self, stage: Stage) {
        self.state.stage.store(stage as u8, Ordering::Release);
        tracing::trace!(session = self.token, ?stage, "stage");
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Only the holder clears its own token, so a stale guard is a no-op.
        if self.state.active.load(Ordering::Acquire) != self.token {
            return;
        }
        self.state.stage.store(Stage::Idle as u8, Ordering::Release);
        let _ = self.state.active.compare_exchange(
            self.token,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

enum EngineRequest {
    Recognize {
        image: RgbImage,
        gallery: Vec<IdentityRecord>,
        metric: Metric,
        thresholds: Thresholds,
        every_face: bool,
        guard: SessionGuard,
        reply: oneshot::Sender<Outcome>,
    },
    Register {
        image: RgbImage,
        label: String,
        guard: SessionGuard,
        reply: oneshot::Sender<Outcome>,
    },
    Compare {
        first: RgbImage,
        second: RgbImage,
        guard: SessionGuard,
        reply: oneshot::Sender<Outcome>,
    },
    SetModel {
        variant: ModelVariant,
        guard: SessionGuard,
        reply: oneshot::Sender<Outcome>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// At most one request runs at a time across all clones; a request made
/// while another is in flight returns [`Outcome::Busy`] without queuing.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    state: Arc<SessionState>,
}

impl EngineHandle {
    /// Detect, embed and match the first face in `image` against a
    /// snapshot of the gallery.
    pub async fn recognize(
        &self,
        image: RgbImage,
        gallery: Vec<IdentityRecord>,
        metric: Metric,
        thresholds: Thresholds,
    ) -> Outcome {
        self.submit_recognition(image, gallery, metric, thresholds, false)
            .await
    }

    /// Like [`recognize`](Self::recognize), but matches every detected face
    /// and answers [`Outcome::Faces`].
    pub async fn recognize_all(
        &self,
        image: RgbImage,
        gallery: Vec<IdentityRecord>,
        metric: Metric,
        thresholds: Thresholds,
    ) -> Outcome {
        self.submit_recognition(image, gallery, metric, thresholds, true)
            .await
    }

    async fn submit_recognition(
        &self,
        image: RgbImage,
        gallery: Vec<IdentityRecord>,
        metric: Metric,
        thresholds: Thresholds,
        every_face: bool,
    ) -> Outcome {
        let Some(guard) = self.claim() else {
            return Outcome::Busy;
        };
        // Nothing to match against: answer without detection or inference.
        if gallery.is_empty() {
            drop(guard);
            return Outcome::empty_gallery();
        }
        self.submit(guard, |guard, reply| EngineRequest::Recognize {
            image,
            gallery,
            metric,
            thresholds,
            every_face,
            guard,
            reply,
        })
        .await
    }

    /// Embed the first face in `image` into a new record. Storing it is
    /// up to the caller.
    pub async fn register(&self, image: RgbImage, label: impl Into<String>) -> Outcome {
        let label = label.into();
        self.dispatch(|guard, reply| EngineRequest::Register {
            image,
            label,
            guard,
            reply,
        })
        .await
    }

    /// Decide whether two images show the same person.
    pub async fn compare_pair(&self, first: RgbImage, second: RgbImage) -> Outcome {
        self.dispatch(|guard, reply| EngineRequest::Compare {
            first,
            second,
            guard,
            reply,
        })
        .await
    }

    /// Switch the embedding model. The new model loads on the next request.
    pub async fn set_model(&self, variant: ModelVariant) -> Outcome {
        self.dispatch(|guard, reply| EngineRequest::SetModel {
            variant,
            guard,
            reply,
        })
        .await
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.state.stage.load(Ordering::Acquire))
    }

    pub fn is_busy(&self) -> bool {
        self.state.active.load(Ordering::Acquire) != 0
    }

    fn claim(&self) -> Option<SessionGuard> {
        let guard = SessionGuard::try_claim(&self.state);
        if guard.is_none() {
            tracing::debug!("request rejected: session busy");
        }
        guard
    }

    async fn dispatch(
        &self,
        build: impl FnOnce(SessionGuard, oneshot::Sender<Outcome>) -> EngineRequest,
    ) -> Outcome {
        match self.claim() {
            Some(guard) => self.submit(guard, build).await,
            None => Outcome::Busy,
        }
    }

    async fn submit(
        &self,
        guard: SessionGuard,
        build: impl FnOnce(SessionGuard, oneshot::Sender<Outcome>) -> EngineRequest,
    ) -> Outcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(build(guard, reply_tx)).await.is_err() {
            return Outcome::Error(EngineError::ChannelClosed);
        }
        reply_rx
            .await
            .unwrap_or(Outcome::Error(EngineError::ChannelClosed))
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads the initial model synchronously so a missing model file fails
/// here rather than on the first request.
pub fn spawn_engine(
    descriptor: ModelDescriptor,
    detector: Box<dyn FaceDetector>,
    loader: Box<dyn ModelLoader>,
) -> Result<EngineHandle, EngineError> {
    let mut model = EmbeddingModel::new(descriptor, loader);
    model.initialize()?;
    tracing::info!(model = model.descriptor().name, "embedding model loaded");

    let mut worker = Worker { detector, model };
    // The session guard admits one request at a time, so one slot suffices.
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        state: Arc::new(SessionState::default()),
    })
}

struct Worker {
    detector: Box<dyn FaceDetector>,
    model: EmbeddingModel,
}

impl Worker {
    fn handle(&mut self, req: EngineRequest) {
        let (op, outcome, guard, reply) = match req {
            EngineRequest::Recognize {
                image,
                gallery,
                metric,
                thresholds,
                every_face,
                guard,
                reply,
            } => {
                if every_face {
                    let result = self.recognize_all(&guard, &image, &gallery, metric, thresholds);
                    ("recognize_all", result, guard, reply)
                } else {
                    let result = self.recognize(&guard, &image, &gallery, metric, thresholds);
                    ("recognize", result, guard, reply)
                }
            }
            EngineRequest::Register {
                image,
                label,
                guard,
                reply,
            } => {
                let result = self.register(&guard, &image, label);
                ("register", result, guard, reply)
            }
            EngineRequest::Compare {
                first,
                second,
                guard,
                reply,
            } => {
                let result = self.compare(&guard, &first, &second);
                ("compare", result, guard, reply)
            }
            EngineRequest::SetModel {
                variant,
                guard,
                reply,
            } => {
                self.model.set_model(variant.descriptor().clone());
                ("set_model", Ok(Outcome::ModelChanged(variant)), guard, reply)
            }
        };

        let outcome = outcome.unwrap_or_else(Outcome::from_error);
        match &outcome {
            Outcome::Error(err) => tracing::warn!(op, error = %err, "request failed"),
            other => tracing::info!(op, outcome = other.kind(), "request finished"),
        }

        // Release before replying so the caller observes an idle engine.
        drop(guard);
        let _ = reply.send(outcome);
    }

    /// Every face the detector finds, best first. Never empty.
    fn detect(&mut self, guard: &SessionGuard, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PreprocessError::InvalidImage("image has zero width or height".into()).into());
        }
        guard.enter(Stage::Detecting);
        let faces = self.detector.find_faces(image)?;
        if faces.is_empty() {
            return Err(EngineError::NoFaceDetected);
        }
        tracing::debug!(faces = faces.len(), confidence = faces[0].confidence, "faces detected");
        Ok(faces)
    }

    fn crop(&self, guard: &SessionGuard, image: &RgbImage, face: &BoundingBox) -> Result<RgbImage, EngineError> {
        guard.enter(Stage::Cropping);
        Ok(preprocess::crop_face(image, face)?)
    }

    fn first_face(&mut self, guard: &SessionGuard, image: &RgbImage) -> Result<RgbImage, EngineError> {
        let faces = self.detect(guard, image)?;
        self.crop(guard, image, &faces[0])
    }

    fn embed(&mut self, guard: &SessionGuard, face: &RgbImage) -> Result<Embedding, EngineError> {
        guard.enter(Stage::Embedding);
        if !self.model.is_ready() {
            self.model.initialize()?;
        }
        self.model
            .embed_face(face)?
            .into_iter()
            .next()
            .ok_or_else(|| RecognizerError::InferenceFailed("model produced no embedding".into()).into())
    }

    fn recognize(
        &mut self,
        guard: &SessionGuard,
        image: &RgbImage,
        gallery: &[IdentityRecord],
        metric: Metric,
        thresholds: Thresholds,
    ) -> Result<Outcome, EngineError> {
        let face = self.first_face(guard, image)?;
        let query = self.embed(guard, &face)?;

        guard.enter(Stage::Matching);
        let result = match_gallery(metric, &query.values, gallery, thresholds)?;
        let message = format!("no identity within threshold\n{}", result.score_summary());
        Ok(match result.best_identity {
            Some(identity) if result.accepted => Outcome::Recognized {
                identity,
                score: result.score,
                scores: result.scores,
            },
            _ => Outcome::NotFound {
                message,
                scores: result.scores,
            },
        })
    }

    fn recognize_all(
        &mut self,
        guard: &SessionGuard,
        image: &RgbImage,
        gallery: &[IdentityRecord],
        metric: Metric,
        thresholds: Thresholds,
    ) -> Result<Outcome, EngineError> {
        let faces = self.detect(guard, image)?;
        let mut matches = Vec::with_capacity(faces.len());
        for face in faces {
            let crop = self.crop(guard, image, &face)?;
            let query = self.embed(guard, &crop)?;

            guard.enter(Stage::Matching);
            let result = match_gallery(metric, &query.values, gallery, thresholds)?;
            matches.push(FaceMatch { face, result });
        }
        Ok(Outcome::Faces(matches))
    }

    fn register(&mut self, guard: &SessionGuard, image: &RgbImage, label: String) -> Result<Outcome, EngineError> {
        let face = self.first_face(guard, image)?;
        let embedding = self.embed(guard, &face)?;
        Ok(Outcome::Registered(IdentityRecord::new(label, embedding)))
    }

    fn compare(&mut self, guard: &SessionGuard, first: &RgbImage, second: &RgbImage) -> Result<Outcome, EngineError> {
        // Detect in both before paying for any inference.
        let first_face = self.first_face(guard, first)?;
        let second_face = self.first_face(guard, second)?;
        let a = self.embed(guard, &first_face)?;
        let b = self.embed(guard, &second_face)?;

        guard.enter(Stage::Matching);
        Ok(Outcome::Compared(compare_pair(&a, &b)?))
    }
}
