//! Multi-sample enrollment.
//!
//! Collects a sliding window of samples per identity and reduces a complete
//! window to one canonical, unit-norm embedding.
//!
//! Each new sample is checked only against the most recent sample for that
//! identity, not against the running mean. This keeps insertion O(1) but
//! lets a slow drift across many samples pass the pairwise check.

use crate::config::FaceConfig;
use crate::types::{DimensionMismatch, Embedding};
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrollmentError {
    #[error(
        "sample for '{identity_id}' is {distance:.4} from the previous sample, exceeding bound {bound:.4}"
    )]
    InconsistentSample {
        identity_id: String,
        distance: f32,
        bound: f32,
    },
    #[error("identity id must not be empty")]
    EmptyIdentity,
    #[error("sample for '{identity_id}' contains NaN or infinite components")]
    NonFiniteSample { identity_id: String },
    #[error("sample for '{identity_id}': {source}")]
    DimensionMismatch {
        identity_id: String,
        #[source]
        source: DimensionMismatch,
    },
}

/// Per-identity sample buffers.
///
/// Not synchronized; callers sharing one manager across tasks must serialize
/// access (the CLI engine owns it on a single thread).
#[derive(Debug)]
pub struct EnrollmentManager {
    required_samples: usize,
    consistency_bound: f32,
    sessions: HashMap<String, VecDeque<Embedding>>,
}

impl EnrollmentManager {
    /// `required_samples` is clamped to at least 1; an empty window could never complete.
    pub fn new(required_samples: usize, consistency_bound: f32) -> Self {
        Self {
            required_samples: required_samples.max(1),
            consistency_bound,
            sessions: HashMap::new(),
        }
    }

    pub fn from_config(config: &FaceConfig) -> Self {
        Self::new(config.required_enrollment_samples, config.consistency_bound)
    }

    pub fn required_samples(&self) -> usize {
        self.required_samples
    }

    pub fn consistency_bound(&self) -> f32 {
        self.consistency_bound
    }

    /// Append a sample, evicting the oldest once the window is full.
    ///
    /// On error the identity's buffer is left exactly as it was.
    pub fn add_sample(&mut self, identity_id: &str, sample: Embedding) -> Result<(), EnrollmentError> {
        if identity_id.is_empty() {
            return Err(EnrollmentError::EmptyIdentity);
        }
        if !sample.is_finite() {
            return Err(EnrollmentError::NonFiniteSample {
                identity_id: identity_id.to_string(),
            });
        }

        if let Some(last) = self.sessions.get(identity_id).and_then(|buf| buf.back()) {
            let distance = last.euclidean_distance(&sample).map_err(|source| {
                EnrollmentError::DimensionMismatch {
                    identity_id: identity_id.to_string(),
                    source,
                }
            })?;

            // Negated so a NaN distance is rejected too.
            if !(distance <= self.consistency_bound) {
                tracing::debug!(
                    identity_id,
                    distance,
                    bound = self.consistency_bound,
                    "enroll: inconsistent sample rejected"
                );
                return Err(EnrollmentError::InconsistentSample {
                    identity_id: identity_id.to_string(),
                    distance,
                    bound: self.consistency_bound,
                });
            }
        }

        let buffer = self.sessions.entry(identity_id.to_string()).or_default();
        while buffer.len() >= self.required_samples {
            buffer.pop_front();
        }
        buffer.push_back(sample);

        tracing::debug!(
            identity_id,
            samples = buffer.len(),
            required = self.required_samples,
            "enroll: sample accepted"
        );
        Ok(())
    }

    /// Buffered samples for an identity; 0 if never seen.
    pub fn sample_count(&self, identity_id: &str) -> usize {
        self.sessions.get(identity_id).map_or(0, VecDeque::len)
    }

    pub fn is_complete(&self, identity_id: &str) -> bool {
        self.sample_count(identity_id) == self.required_samples
    }

    /// Mean of the buffered samples, L2-normalized. `None` until complete.
    ///
    /// Leaves the buffer in place, so repeated calls return the same result.
    /// An all-zero mean is returned as-is.
    pub fn build_final_embedding(&self, identity_id: &str) -> Option<Embedding> {
        if !self.is_complete(identity_id) {
            return None;
        }
        let samples = self.sessions.get(identity_id)?;
        // Every buffered sample passed the dimension check in add_sample.
        let mean = Embedding::mean(samples).ok().flatten()?;
        if mean.norm() == 0.0 {
            tracing::warn!(identity_id, "enroll: degenerate all-zero mean embedding");
        }
        Some(mean.l2_normalized())
    }

    /// Identities whose window is currently full.
    pub fn enrolled_identities(&self) -> BTreeSet<String> {
        self.sessions
            .iter()
            .filter(|(_, buf)| buf.len() == self.required_samples)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn clear_identity(&mut self, identity_id: &str) {
        if self.sessions.remove(identity_id).is_some() {
            tracing::debug!(identity_id, "enroll: session cleared");
        }
    }

    pub fn clear_all(&mut self) {
        self.sessions.clear();
    }
}
