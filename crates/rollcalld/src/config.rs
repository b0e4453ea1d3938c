use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("ROLLCALL_EMBEDDING_DIM is {configured} but the face encoder produces {encoder}-dim embeddings")]
    DimensionMismatch { configured: usize, encoder: usize },
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Supabase project holding enrollments.
    pub supabase_url: String,
    /// Supabase service key.
    pub supabase_key: String,
    /// Table holding `user_id`, `face_encoding` and the `users(email)` relation.
    pub enrollment_table: String,
    pub bind_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    pub refresh_interval: Duration,
    /// Upper bound on one enrollment fetch.
    pub fetch_timeout: Duration,
    /// Embedding length accepted from the enrollment store.
    pub embedding_dim: usize,
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        Ok(Self {
            supabase_url: required("SUPABASE_URL")?.trim_end_matches('/').to_string(),
            supabase_key: required("SUPABASE_KEY")?,
            enrollment_table: lookup("ROLLCALL_ENROLLMENT_TABLE").unwrap_or_else(|| "attendees".to_string()),
            bind_addr: parse_or(&lookup, "ROLLCALL_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 5002)))?,
            model_dir: lookup("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(rollcall_core::default_model_dir),
            tolerance: parse_or(&lookup, "ROLLCALL_TOLERANCE", rollcall_core::DEFAULT_TOLERANCE)?,
            refresh_interval: Duration::from_secs(parse_or(&lookup, "ROLLCALL_REFRESH_INTERVAL_SECS", 300)?),
            fetch_timeout: Duration::from_secs(parse_or(&lookup, "ROLLCALL_FETCH_TIMEOUT_SECS", 30)?),
            embedding_dim: parse_or(&lookup, "ROLLCALL_EMBEDDING_DIM", rollcall_core::ARCFACE_EMBEDDING_DIM)?,
            max_upload_bytes: parse_or(&lookup, "ROLLCALL_MAX_UPLOAD_BYTES", 16 * 1024 * 1024)?,
        })
    }

    /// Enrollments are only comparable with probes of the same length.
    pub fn check_encoder_dimension(&self, encoder: usize) -> Result<(), ConfigError> {
        if self.embedding_dim != encoder {
            return Err(ConfigError::DimensionMismatch {
                configured: self.embedding_dim,
                encoder,
            });
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
