//! L2 recognizer: 1:1 verification and 1:N identification.
//!
//! Stateless. Every input is a caller-owned snapshot, so one `Recognizer`
//! can be used from any number of threads without synchronization.

use crate::record::FaceIdentityRecord;
use crate::types::{DimensionMismatch, Embedding};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecognizerError {
    #[error("cannot average an empty set of embeddings")]
    EmptyInput,
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatch),
    #[error("candidate '{identity_id}': {source}")]
    CandidateDimension {
        identity_id: String,
        #[source]
        source: DimensionMismatch,
    },
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Identity of the matched record (if any).
    pub identity_id: Option<String>,
    /// L2 distance to the closest candidate, matched or not. `None` for an empty gallery.
    pub distance: Option<f32>,
    /// Threshold the comparison was made against.
    pub threshold: f32,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[FaceIdentityRecord],
        threshold: f32,
    ) -> Result<MatchResult, RecognizerError>;
}

/// Euclidean-distance recognizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recognizer;

impl Recognizer {
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> Result<f32, RecognizerError> {
        Ok(a.euclidean_distance(b)?)
    }

    /// Same identity iff `distance < threshold`. A distance equal to the threshold is a rejection.
    pub fn verify(&self, a: &Embedding, b: &Embedding, threshold: f32) -> Result<bool, RecognizerError> {
        Ok(self.distance(a, b)? < threshold)
    }

    /// Identity of the closest candidate strictly under `threshold`, if any.
    ///
    /// The first candidate at the minimum distance wins ties.
    pub fn recognize(
        &self,
        query: &Embedding,
        candidates: &[FaceIdentityRecord],
        threshold: f32,
    ) -> Result<Option<String>, RecognizerError> {
        Ok(self.compare(query, candidates, threshold)?.identity_id)
    }

    /// Component-wise mean of `vectors`, L2-normalized.
    pub fn average_embeddings(&self, vectors: &[Embedding]) -> Result<Embedding, RecognizerError> {
        let mean = Embedding::mean(vectors)?.ok_or(RecognizerError::EmptyInput)?;
        Ok(mean.l2_normalized())
    }
}

impl Matcher for Recognizer {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[FaceIdentityRecord],
        threshold: f32,
    ) -> Result<MatchResult, RecognizerError> {
        let mut closest = f32::INFINITY;
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        // Full linear scan, no early exit.
        for (i, record) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(record.embedding()).map_err(|source| {
                RecognizerError::CandidateDimension {
                    identity_id: record.identity_id().to_string(),
                    source,
                }
            })?;

            if dist < closest {
                closest = dist;
            }
            if dist < best_dist && dist < threshold {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        let distance = (!gallery.is_empty() && closest.is_finite()).then_some(closest);

        Ok(match best_idx {
            Some(idx) => {
                tracing::debug!(
                    identity_id = gallery[idx].identity_id(),
                    distance = best_dist,
                    threshold,
                    "match found"
                );
                MatchResult {
                    matched: true,
                    identity_id: Some(gallery[idx].identity_id().to_string()),
                    distance: Some(best_dist),
                    threshold,
                }
            }
            None => MatchResult {
                matched: false,
                identity_id: None,
                distance,
                threshold,
            },
        })
    }
}
