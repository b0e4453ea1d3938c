//! rollcall-core: recognition cache and face encoding.
//!
//! Holds immutable snapshots of enrolled identities behind an atomically
//! swappable cache, matches probe embeddings by Euclidean distance, and
//! produces embeddings with SCRFD detection and ArcFace recognition via
//! ONNX Runtime.

pub mod alignment;
pub mod cache;
pub mod detector;
pub mod encoder;
pub mod recognizer;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use cache::CacheManager;
pub use encoder::{EncodeError, FaceEncoder, OnnxFaceEncoder};
pub use recognizer::ARCFACE_EMBEDDING_DIM;
pub use store::{EmbeddingStore, IngestReport, RawEnrollment, RawUser};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, KnownIdentity, MatchResult, Matcher, UserId};

/// Default tolerance for a positive match, in Euclidean distance.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("rollcall").join("models")
}
