use rollcall_vision::{default_data_dir, default_model_dir, FaceModelKind, UnknownModel};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("threshold must be a finite, non-negative distance, got {0}")]
    InvalidThreshold(f32),
    #[error("queue_depth must be at least 1")]
    InvalidQueueDepth,
    #[error(transparent)]
    UnknownModel(#[from] UnknownModel),
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            _ => Err(()),
        }
    }
}

/// Daemon configuration.
///
/// Defaults, then an optional TOML file named by `ROLLCALL_CONFIG`, then
/// `ROLLCALL_*` environment variables, each layer overriding the last.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Maximum Euclidean distance for a match. Lower is stricter.
    pub threshold: f32,
    /// MODEL identifier selecting the embedder (and its embedding space).
    pub model: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Reference embedding store written by `rollcall enroll`.
    pub store_path: PathBuf,
    /// Attendance CSV.
    pub ledger_path: PathBuf,
    pub bus: BusKind,
    /// Pending requests the engine thread will queue before callers wait.
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            threshold: 4.0,
            model: FaceModelKind::default().name().to_string(),
            model_dir: default_model_dir(),
            store_path: data_dir.join("embeddings.json"),
            ledger_path: data_dir.join("attendance_log.csv"),
            bus: BusKind::Session,
            queue_depth: 8,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    fn apply_env<F>(&mut self, get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("ROLLCALL_THRESHOLD") {
            self.threshold = parse_env("ROLLCALL_THRESHOLD", &v)?;
        }
        if let Some(v) = get("ROLLCALL_MODEL") {
            self.model = v;
        }
        if let Some(v) = get("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ROLLCALL_STORE_PATH") {
            self.store_path = PathBuf::from(v);
        }
        if let Some(v) = get("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = get("ROLLCALL_BUS") {
            self.bus = parse_env("ROLLCALL_BUS", &v)?;
        }
        if let Some(v) = get("ROLLCALL_QUEUE_DEPTH") {
            self.queue_depth = parse_env("ROLLCALL_QUEUE_DEPTH", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }
        self.model_kind()?;
        Ok(())
    }

    pub fn model_kind(&self) -> Result<FaceModelKind, UnknownModel> {
        self.model.parse()
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
