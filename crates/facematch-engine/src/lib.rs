//! facematch-engine — recognition orchestrator.
//!
//! Runs detection, embedding and matching on a dedicated thread behind a
//! cloneable async handle, admitting one request at a time.

pub mod config;
pub mod engine;
pub mod gallery;

pub use config::{ConfigError, EngineConfig};
pub use engine::{spawn_engine, EngineError, EngineHandle, FaceMatch, Outcome, Stage};
pub use gallery::{GalleryStore, MemoryGallery};
