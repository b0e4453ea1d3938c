//! Immutable snapshots of enrolled identities.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::types::{Embedding, KnownIdentity, Matcher, MatchResult, UserId};

/// One enrollment row as returned by the remote store.
///
/// Fields are loosely typed so a single malformed row is dropped during
/// ingestion instead of failing the whole fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEnrollment {
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub face_encoding: Option<Value>,
    #[serde(default)]
    pub users: Option<RawUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub email: Option<String>,
}

/// Counts from building a store out of raw rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Immutable set of known identities, replaced wholesale on every refresh.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    identities: Vec<KnownIdentity>,
    loaded_at: DateTime<Utc>,
}

impl EmbeddingStore {
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(identities: Vec<KnownIdentity>) -> Self {
        Self {
            identities,
            loaded_at: Utc::now(),
        }
    }

    /// Build a store from raw enrollment rows, keeping only rows that carry
    /// a user id, an email and a numeric embedding of exactly `dimension`
    /// values. Row order is preserved.
    pub fn from_records(records: Vec<RawEnrollment>, dimension: usize) -> (Self, IngestReport) {
        let mut report = IngestReport::default();
        let mut identities = Vec::with_capacity(records.len());

        for record in records {
            match validate(record, dimension) {
                Some(identity) => {
                    report.accepted += 1;
                    identities.push(identity);
                }
                None => report.rejected += 1,
            }
        }

        (Self::new(identities), report)
    }

    pub fn identities(&self) -> &[KnownIdentity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Match every probe against this snapshot, preserving probe order.
    pub fn match_all<M: Matcher>(
        &self,
        matcher: &M,
        probes: &[Embedding],
        tolerance: f32,
    ) -> Vec<MatchResult> {
        probes
            .iter()
            .map(|probe| matcher.compare(probe, &self.identities, tolerance))
            .collect()
    }
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::empty()
    }
}

fn validate(record: RawEnrollment, dimension: usize) -> Option<KnownIdentity> {
    let user_id = parse_user_id(record.user_id?)?;
    let email = record.users?.email.filter(|e| !e.trim().is_empty())?;
    let values = parse_encoding(record.face_encoding?)?;

    if values.is_empty() || values.len() != dimension {
        tracing::debug!(
            %user_id,
            got = values.len(),
            expected = dimension,
            "dropping enrollment with wrong embedding dimension"
        );
        return None;
    }

    Some(KnownIdentity {
        user_id,
        email,
        embedding: Embedding::new(values),
    })
}

/// Ids must be non-empty strings or integers that fit in `i64` (Postgres
/// `bigint`). Fractional or larger numbers are rejected rather than rounded,
/// so an id is never echoed back altered.
fn parse_user_id(value: Value) -> Option<UserId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(UserId::Text(s)),
        Value::Number(n) => n.as_i64().map(UserId::Number),
        _ => None,
    }
}

fn parse_encoding(value: Value) -> Option<Vec<f32>> {
    let Value::Array(items) = value else {
        return None;
    };
    items
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}
