//! Persisted face identity records and their JSON encoding.
//!
//! One record per identity:
//!
//! ```text
//! { "identityId": "alice", "embedding": [0.01, ...], "formatVersion": "1" }
//! ```

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-component tolerance used by record equality.
const EMBEDDING_EQ_TOLERANCE: f32 = 1e-6;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("identity id must not be empty")]
    EmptyIdentity,
    #[error("embedding for '{0}' contains NaN or infinite components")]
    NonFiniteEmbedding(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// An identity and its canonical (L2-normalized) embedding.
///
/// Immutable once constructed. Decoding goes through the same validation as
/// [`FaceIdentityRecord::new`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawRecord")]
pub struct FaceIdentityRecord {
    identity_id: String,
    embedding: Embedding,
    format_version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRecord {
    identity_id: String,
    embedding: Embedding,
    format_version: String,
}

impl TryFrom<RawRecord> for FaceIdentityRecord {
    type Error = RecordError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        Self::new(raw.identity_id, raw.embedding, raw.format_version)
    }
}

impl FaceIdentityRecord {
    pub fn new(
        identity_id: impl Into<String>,
        embedding: Embedding,
        format_version: impl Into<String>,
    ) -> Result<Self, RecordError> {
        let identity_id = identity_id.into();
        if identity_id.is_empty() {
            return Err(RecordError::EmptyIdentity);
        }
        // JSON has no NaN/infinity, so such a record could never be read back.
        if !embedding.is_finite() {
            return Err(RecordError::NonFiniteEmbedding(identity_id));
        }
        Ok(Self {
            identity_id,
            embedding,
            format_version: format_version.into(),
        })
    }

    pub fn identity_id(&self) -> &str {
        &self.identity_id
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    pub fn format_version(&self) -> &str {
        &self.format_version
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(src: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(src)?)
    }
}

/// Same identity and every embedding component within 1e-6.
///
/// The format tag does not take part in equality.
impl PartialEq for FaceIdentityRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity_id == other.identity_id
            && self.embedding.len() == other.embedding.len()
            && self
                .embedding
                .values()
                .iter()
                .zip(other.embedding.values())
                .all(|(a, b)| (a - b).abs() <= EMBEDDING_EQ_TOLERANCE)
    }
}

/// Encode a gallery as a pretty-printed JSON array of records.
pub fn encode_records(records: &[FaceIdentityRecord]) -> Result<String, RecordError> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Decode a JSON array of records. Any invalid record fails the whole batch.
pub fn decode_records(src: &str) -> Result<Vec<FaceIdentityRecord>, RecordError> {
    Ok(serde_json::from_str(src)?)
}
