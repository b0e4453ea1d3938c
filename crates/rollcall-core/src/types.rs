use std::fmt;

use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    /// `None` for embeddings ingested from the enrollment store.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Opaque user identifier, kept in whatever shape the enrollment store used.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Text(String),
    Number(i64),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Text(s) => f.write_str(s),
            UserId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId::Text(value.to_string())
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        UserId::Number(value)
    }
}

/// An enrolled attendee whose face can be recognized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownIdentity {
    pub user_id: UserId,
    pub email: String,
    pub embedding: Embedding,
}

/// Outcome of matching one probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    /// Euclidean distance to the matched identity.
    pub distance: Option<f32>,
    /// The probe itself, attached whether or not it matched.
    pub embedding: Embedding,
}

impl MatchResult {
    pub fn unmatched(embedding: Embedding) -> Self {
        Self {
            matched: false,
            user_id: None,
            email: None,
            distance: None,
            embedding,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownIdentity], tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// The closest identity wins when its distance is within `tolerance`.
/// Ties keep the identity that appears first in the gallery. Identities whose
/// embedding dimension differs from the probe's are never candidates.
#[derive(Debug, Default, Clone, Copy)]
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[KnownIdentity], tolerance: f32) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, identity) in gallery.iter().enumerate() {
            if identity.embedding.dimension() != probe.dimension() {
                continue;
            }
            let dist = probe.euclidean_distance(&identity.embedding);
            // Strict comparison: NaN never wins, earlier entries win ties.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist <= tolerance => {
                let identity = &gallery[idx];
                MatchResult {
                    matched: true,
                    user_id: Some(identity.user_id.clone()),
                    email: Some(identity.email.clone()),
                    distance: Some(best_dist),
                    embedding: probe.clone(),
                }
            }
            _ => MatchResult::unmatched(probe.clone()),
        }
    }
}
