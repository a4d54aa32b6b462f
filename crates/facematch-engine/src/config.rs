//! Engine configuration.
//!
//! Defaults, optionally overlaid by a TOML file, then by `FACEMATCH_*`
//! environment variables.
//!
//! ```toml
//! model = "facenet-512"
//! model_dir = "/usr/share/facematch/models"
//! metric = "cosine"
//! cosine_threshold = 0.35
//! intra_threads = 4
//! ```

use facematch_core::{Metric, ModelDescriptor, ModelVariant, Thresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Active embedding model.
    pub model: ModelVariant,
    /// Directory holding the ONNX model files.
    pub model_dir: PathBuf,
    /// Metric used by `recognize` when the caller does not pick one.
    pub metric: Metric,
    /// Overrides the model's tuned cosine threshold.
    pub cosine_threshold: Option<f32>,
    /// Overrides the model's tuned L2 threshold.
    pub l2_threshold: Option<f32>,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelVariant::default(),
            model_dir: PathBuf::from("models"),
            metric: Metric::default(),
            cosine_threshold: None,
            l2_threshold: None,
            intra_threads: 2,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), model = %config.model, "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FACEMATCH_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Values that fail to parse are ignored
    /// with a warning and the current value is kept.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.model = parse_or("FACEMATCH_MODEL", &lookup, self.model);
        if let Some(dir) = lookup("FACEMATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        self.metric = parse_or("FACEMATCH_METRIC", &lookup, self.metric);
        if let Some(t) = parse_opt::<f32>("FACEMATCH_COSINE_THRESHOLD", &lookup) {
            self.cosine_threshold = Some(t);
        }
        if let Some(t) = parse_opt::<f32>("FACEMATCH_L2_THRESHOLD", &lookup) {
            self.l2_threshold = Some(t);
        }
        self.intra_threads = parse_or("FACEMATCH_INTRA_THREADS", &lookup, self.intra_threads);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be at least 1".into()));
        }
        for (name, value) in [("cosine_threshold", self.cosine_threshold), ("l2_threshold", self.l2_threshold)] {
            if matches!(value, Some(v) if !v.is_finite()) {
                return Err(ConfigError::Invalid(format!("{name} must be finite")));
            }
        }
        Ok(())
    }

    pub fn descriptor(&self) -> &'static ModelDescriptor {
        self.model.descriptor()
    }

    /// Thresholds for the active model, with any configured overrides.
    pub fn thresholds(&self) -> Thresholds {
        let tuned = self.descriptor().thresholds();
        Thresholds {
            cosine: self.cosine_threshold.unwrap_or(tuned.cosine),
            l2: self.l2_threshold.unwrap_or(tuned.l2),
        }
    }
}

fn parse_opt<T: FromStr>(key: &str, lookup: &impl Fn(&str) -> Option<String>) -> Option<T> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable override");
            None
        }
    }
}

fn parse_or<T: FromStr>(key: &str, lookup: &impl Fn(&str) -> Option<String>, current: T) -> T {
    parse_opt(key, lookup).unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.model, ModelVariant::FaceNet);
        assert_eq!(config.metric, Metric::L2);
        let t = config.thresholds();
        assert!((t.cosine - 0.4).abs() < 1e-6);
        assert!((t.l2 - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("model = \"mobilefacenet\"\nmetric = \"cosine\"").unwrap();
        assert_eq!(config.model, ModelVariant::MobileFaceNet);
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.intra_threads, 2);
        assert_eq!(config.descriptor().output_dims, 192);
    }

    #[test]
    fn test_unknown_model_is_parse_error() {
        let err = EngineConfig::from_toml_str("model = \"arcface\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = EngineConfig::from_toml_str("intra_threads = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_threshold_override_beats_descriptor() {
        let config = EngineConfig::from_toml_str("model = \"facenet-512\"\nl2_threshold = 20.0").unwrap();
        let t = config.thresholds();
        assert!((t.l2 - 20.0).abs() < 1e-6);
        assert!((t.cosine - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default().apply_overrides(lookup(&[
            ("FACEMATCH_MODEL", "facenet-512-quantized"),
            ("FACEMATCH_MODEL_DIR", "/opt/models"),
            ("FACEMATCH_METRIC", "cosine"),
            ("FACEMATCH_COSINE_THRESHOLD", "0.55"),
        ]));
        assert_eq!(config.model, ModelVariant::FaceNet512Quantized);
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.metric, Metric::Cosine);
        assert_eq!(config.cosine_threshold, Some(0.55));
        assert_eq!(config.l2_threshold, None);
    }

    #[test]
    fn test_bad_env_value_keeps_current() {
        let config = EngineConfig::default().apply_overrides(lookup(&[
            ("FACEMATCH_METRIC", "manhattan"),
            ("FACEMATCH_INTRA_THREADS", "many"),
        ]));
        assert_eq!(config.metric, Metric::L2);
        assert_eq!(config.intra_threads, 2);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "model = \"facenet\"\nmodel_dir = \"/srv/models\"\nintra_threads = 4").unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.intra_threads, 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/facematch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
