use faceid_core::{
    BoundingBox, DimensionMismatch, Embedding, EnrollmentError, EnrollmentManager, FaceConfig,
    FaceIdentityRecord, MatchResult, Matcher, QualityGate, QualityVerdict, Recognizer,
    RecognizerError, RecordError,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("quality check failed: {0}")]
    QualityRejected(QualityVerdict),
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
    #[error("embedding contains NaN or infinite components")]
    NonFiniteEmbedding,
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("record '{identity_id}': {source}")]
    ImportDimension {
        identity_id: String,
        #[source]
        source: DimensionMismatch,
    },
    #[error("duplicate identity '{identity_id}' in imported records")]
    DuplicateIdentity { identity_id: String },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// One externally extracted embedding, with the detection it came from (if known).
#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    pub embedding: Embedding,
    #[serde(default)]
    pub detection: Option<BoundingBox>,
}

impl From<Embedding> for Sample {
    fn from(embedding: Embedding) -> Self {
        Self {
            embedding,
            detection: None,
        }
    }
}

/// Enrollment state for one identity after a sample was accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollProgress {
    pub samples: usize,
    pub required: usize,
    pub complete: bool,
}

/// Result of a 1:1 verification.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub matched: bool,
    pub distance: f32,
    pub threshold: f32,
}

/// Messages sent from handles to the engine thread.
enum EngineRequest {
    AddSample {
        identity_id: String,
        sample: Sample,
        reply: oneshot::Sender<Result<EnrollProgress, EngineError>>,
    },
    Export {
        reply: oneshot::Sender<Result<Vec<FaceIdentityRecord>, EngineError>>,
    },
    Import {
        records: Vec<FaceIdentityRecord>,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Recognize {
        sample: Sample,
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
    Verify {
        a: Sample,
        b: Sample,
        reply: oneshot::Sender<Result<Verification, EngineError>>,
    },
    ClearIdentity {
        identity_id: String,
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Quality-gate, normalize and buffer one enrollment sample.
    pub async fn add_sample(
        &self,
        identity_id: &str,
        sample: Sample,
    ) -> Result<EnrollProgress, EngineError> {
        let identity_id = identity_id.to_string();
        self.request(|reply| EngineRequest::AddSample {
            identity_id,
            sample,
            reply,
        })
        .await?
    }

    /// One canonical record per completed enrollment, ordered by identity.
    pub async fn export(&self) -> Result<Vec<FaceIdentityRecord>, EngineError> {
        self.request(|reply| EngineRequest::Export { reply }).await?
    }

    /// Replace the candidate pool used by [`recognize`](Self::recognize).
    pub async fn import(&self, records: Vec<FaceIdentityRecord>) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Import { records, reply })
            .await?
    }

    pub async fn recognize(&self, sample: Sample) -> Result<MatchResult, EngineError> {
        self.request(|reply| EngineRequest::Recognize { sample, reply })
            .await?
    }

    /// Both samples go through the same preparation as enrollment samples.
    pub async fn verify(&self, a: Sample, b: Sample) -> Result<Verification, EngineError> {
        self.request(|reply| EngineRequest::Verify { a, b, reply })
            .await?
    }

    /// Drop an identity's enrollment session.
    pub async fn clear_identity(&self, identity_id: &str) -> Result<(), EngineError> {
        let identity_id = identity_id.to_string();
        self.request(|reply| EngineRequest::ClearIdentity { identity_id, reply })
            .await
    }
}

/// Engine state. Lives on, and is only touched by, the engine thread.
struct Engine {
    config: Arc<FaceConfig>,
    gate: QualityGate,
    enrollment: EnrollmentManager,
    recognizer: Recognizer,
    gallery: Vec<FaceIdentityRecord>,
}

/// Spawn the engine on a dedicated OS thread.
///
/// All enrollment state is owned by that thread, so concurrent handles are
/// serialized through its request queue.
pub fn spawn_engine(config: Arc<FaceConfig>) -> Result<EngineHandle, EngineError> {
    let mut engine = Engine {
        gate: QualityGate::from_config(&config),
        enrollment: EnrollmentManager::from_config(&config),
        recognizer: Recognizer,
        gallery: Vec::new(),
        config,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || {
            tracing::debug!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::debug!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

impl Engine {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::AddSample {
                identity_id,
                sample,
                reply,
            } => {
                let _ = reply.send(self.add_sample(&identity_id, sample));
            }
            EngineRequest::Export { reply } => {
                let _ = reply.send(self.export());
            }
            EngineRequest::Import { records, reply } => {
                let _ = reply.send(self.import(records));
            }
            EngineRequest::Recognize { sample, reply } => {
                let _ = reply.send(self.recognize(sample));
            }
            EngineRequest::Verify { a, b, reply } => {
                let _ = reply.send(self.verify(a, b));
            }
            EngineRequest::ClearIdentity { identity_id, reply } => {
                self.enrollment.clear_identity(&identity_id);
                let _ = reply.send(());
            }
        }
    }

    /// Dimension and finiteness checks, quality gate (when detection metadata
    /// is present), L2 normalization.
    fn prepare(&self, sample: Sample) -> Result<Embedding, EngineError> {
        sample.embedding.check_dim(self.config.embedding_dim)?;
        // An infinite component would normalize to NaN.
        if !sample.embedding.is_finite() {
            return Err(EngineError::NonFiniteEmbedding);
        }

        if let Some(detection) = &sample.detection {
            let verdict = self.gate.evaluate(detection);
            if !verdict.is_accepted() {
                return Err(EngineError::QualityRejected(verdict));
            }
        }

        Ok(sample.embedding.l2_normalized())
    }

    fn add_sample(&mut self, identity_id: &str, sample: Sample) -> Result<EnrollProgress, EngineError> {
        let embedding = self.prepare(sample)?;
        self.enrollment.add_sample(identity_id, embedding)?;

        let progress = EnrollProgress {
            samples: self.enrollment.sample_count(identity_id),
            required: self.enrollment.required_samples(),
            complete: self.enrollment.is_complete(identity_id),
        };
        tracing::debug!(
            identity_id,
            samples = progress.samples,
            required = progress.required,
            "enroll: progress"
        );
        Ok(progress)
    }

    fn finalize(&self, identity_id: &str) -> Result<Option<FaceIdentityRecord>, EngineError> {
        let Some(embedding) = self.enrollment.build_final_embedding(identity_id) else {
            return Ok(None);
        };
        let record = FaceIdentityRecord::new(identity_id, embedding, &self.config.format_version)?;
        tracing::info!(identity_id, "enroll: identity finalized");
        Ok(Some(record))
    }

    fn export(&self) -> Result<Vec<FaceIdentityRecord>, EngineError> {
        let mut records = Vec::new();
        for identity_id in self.enrollment.enrolled_identities() {
            if let Some(record) = self.finalize(&identity_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Validate every record first; a bad record leaves the current pool untouched.
    ///
    /// Identity ids must be unique within the batch.
    fn import(&mut self, records: Vec<FaceIdentityRecord>) -> Result<usize, EngineError> {
        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.identity_id()) {
                return Err(EngineError::DuplicateIdentity {
                    identity_id: record.identity_id().to_string(),
                });
            }
            record
                .embedding()
                .check_dim(self.config.embedding_dim)
                .map_err(|source| EngineError::ImportDimension {
                    identity_id: record.identity_id().to_string(),
                    source,
                })?;
        }

        let count = records.len();
        self.gallery = records;
        tracing::info!(count, "candidate pool replaced");
        Ok(count)
    }

    fn recognize(&self, sample: Sample) -> Result<MatchResult, EngineError> {
        let query = self.prepare(sample)?;
        let result = self
            .recognizer
            .compare(&query, &self.gallery, self.config.recognition_threshold)?;

        tracing::info!(
            matched = result.matched,
            identity_id = result.identity_id.as_deref().unwrap_or(""),
            distance = result.distance.unwrap_or(f32::NAN),
            candidates = self.gallery.len(),
            "recognize"
        );
        Ok(result)
    }

    fn verify(&self, a: Sample, b: Sample) -> Result<Verification, EngineError> {
        let a = self.prepare(a)?;
        let b = self.prepare(b)?;
        let threshold = self.config.recognition_threshold;

        Ok(Verification {
            matched: self.recognizer.verify(&a, &b, threshold)?,
            distance: self.recognizer.distance(&a, &b)?,
            threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Arc<FaceConfig> {
        Arc::new(FaceConfig {
            required_enrollment_samples: 3,
            embedding_dim: 3,
            min_face_size: 80,
            max_roll_angle: 20.0,
            ..FaceConfig::default()
        })
    }

    fn sample(values: &[f32]) -> Sample {
        Embedding::new(values.to_vec()).into()
    }

    fn detection(width: f32, right_eye_y: f32) -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width,
            height: width,
            confidence: 0.9,
            landmarks: Some([
                (40.0, 50.0),
                (80.0, right_eye_y),
                (60.0, 70.0),
                (45.0, 90.0),
                (75.0, 90.0),
            ]),
        }
    }

    async fn enroll(engine: &EngineHandle, id: &str, values: &[f32]) {
        for _ in 0..3 {
            engine.add_sample(id, sample(values)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_enroll_export_recognize() {
        let engine = spawn_engine(test_config()).unwrap();

        let p1 = engine.add_sample("p1", sample(&[6.0, 0.0, 8.0])).await.unwrap();
        assert_eq!(p1.samples, 1);
        assert!(!p1.complete);
        assert!(engine.export().await.unwrap().is_empty());

        engine.add_sample("p1", sample(&[0.61, 0.0, 0.79])).await.unwrap();
        let done = engine.add_sample("p1", sample(&[0.6, 0.01, 0.8])).await.unwrap();
        assert!(done.complete);
        assert_eq!(done.required, 3);

        let mut records = engine.export().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = records.remove(0);
        assert_eq!(record.identity_id(), "p1");
        assert_eq!(record.format_version(), "1");
        assert!((record.embedding().norm() - 1.0).abs() < 1e-3);

        assert_eq!(engine.import(vec![record]).await.unwrap(), 1);
        let result = engine.recognize(sample(&[0.6, 0.0, 0.8])).await.unwrap();
        assert!(result.matched);
        assert_eq!(result.identity_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_samples_are_normalized_before_enrollment() {
        let engine = spawn_engine(test_config()).unwrap();
        // Raw magnitudes differ wildly, directions match.
        engine.add_sample("p", sample(&[3.0, 0.0, 4.0])).await.unwrap();
        let progress = engine.add_sample("p", sample(&[300.0, 0.0, 400.0])).await.unwrap();
        assert_eq!(progress.samples, 2);
    }

    #[tokio::test]
    async fn test_quality_rejection_keeps_state() {
        let engine = spawn_engine(test_config()).unwrap();

        let small = Sample {
            embedding: Embedding::new(vec![0.6, 0.0, 0.8]),
            detection: Some(detection(40.0, 50.0)),
        };
        let err = engine.add_sample("p", small).await.unwrap_err();
        match err {
            EngineError::QualityRejected(verdict) => {
                assert_eq!(verdict.hint(), "move closer to the camera");
            }
            other => panic!("expected QualityRejected, got {other:?}"),
        }

        let tilted = Sample {
            embedding: Embedding::new(vec![0.6, 0.0, 0.8]),
            detection: Some(detection(120.0, 90.0)),
        };
        assert!(matches!(
            engine.add_sample("p", tilted).await.unwrap_err(),
            EngineError::QualityRejected(QualityVerdict::ExcessiveRoll { .. })
        ));

        let good = Sample {
            embedding: Embedding::new(vec![0.6, 0.0, 0.8]),
            detection: Some(detection(120.0, 52.0)),
        };
        assert_eq!(engine.add_sample("p", good).await.unwrap().samples, 1);
    }

    #[tokio::test]
    async fn test_dimension_checked_against_config() {
        let engine = spawn_engine(test_config()).unwrap();
        let err = engine.add_sample("p", sample(&[1.0, 0.0])).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Dimension(DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn test_inconsistent_sample_surfaces_context() {
        let engine = spawn_engine(test_config()).unwrap();
        engine.add_sample("p", sample(&[1.0, 0.0, 0.0])).await.unwrap();
        let err = engine.add_sample("p", sample(&[-1.0, 0.0, 0.0])).await.unwrap_err();
        match err {
            EngineError::Enrollment(EnrollmentError::InconsistentSample {
                identity_id,
                distance,
                ..
            }) => {
                assert_eq!(identity_id, "p");
                assert!((distance - 2.0).abs() < 1e-6);
            }
            other => panic!("expected InconsistentSample, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_export_only_completed() {
        let engine = spawn_engine(test_config()).unwrap();
        enroll(&engine, "b", &[0.0, 1.0, 0.0]).await;
        enroll(&engine, "a", &[1.0, 0.0, 0.0]).await;
        engine.add_sample("partial", sample(&[0.0, 0.0, 1.0])).await.unwrap();

        let records = engine.export().await.unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.identity_id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_import_replaces_pool() {
        let engine = spawn_engine(test_config()).unwrap();
        let a = FaceIdentityRecord::new("a", Embedding::new(vec![1.0, 0.0, 0.0]), "1").unwrap();
        let b = FaceIdentityRecord::new("b", Embedding::new(vec![0.0, 1.0, 0.0]), "1").unwrap();

        engine.import(vec![a]).await.unwrap();
        let query = sample(&[1.0, 0.0, 0.0]);
        assert!(engine.recognize(query.clone()).await.unwrap().matched);

        engine.import(vec![b]).await.unwrap();
        let result = engine.recognize(query).await.unwrap();
        assert!(!result.matched);
        assert!(result.distance.is_some());
    }

    #[tokio::test]
    async fn test_import_rejects_wrong_dimension() {
        let engine = spawn_engine(test_config()).unwrap();
        let good = FaceIdentityRecord::new("a", Embedding::new(vec![1.0, 0.0, 0.0]), "1").unwrap();
        let bad = FaceIdentityRecord::new("bad", Embedding::new(vec![1.0, 0.0]), "1").unwrap();

        engine.import(vec![good]).await.unwrap();
        let err = engine.import(vec![bad]).await.unwrap_err();
        assert!(matches!(err, EngineError::ImportDimension { ref identity_id, .. } if identity_id == "bad"));

        // Previous pool still active.
        assert!(engine.recognize(sample(&[1.0, 0.0, 0.0])).await.unwrap().matched);
    }

    #[tokio::test]
    async fn test_import_rejects_duplicate_identity() {
        let engine = spawn_engine(test_config()).unwrap();
        let a = FaceIdentityRecord::new("a", Embedding::new(vec![1.0, 0.0, 0.0]), "1").unwrap();
        engine.import(vec![a]).await.unwrap();

        let first = FaceIdentityRecord::new("dup", Embedding::new(vec![0.0, 1.0, 0.0]), "1").unwrap();
        let second = FaceIdentityRecord::new("dup", Embedding::new(vec![0.0, 0.0, 1.0]), "1").unwrap();
        let err = engine.import(vec![first, second]).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateIdentity { ref identity_id } if identity_id == "dup"));

        // Previous pool still active.
        let result = engine.recognize(sample(&[1.0, 0.0, 0.0])).await.unwrap();
        assert_eq!(result.identity_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_verify() {
        let engine = spawn_engine(test_config()).unwrap();
        let same = engine
            .verify(sample(&[3.0, 0.0, 4.0]), sample(&[0.6, 0.0, 0.8]))
            .await
            .unwrap();
        assert!(same.matched);
        assert!(same.distance < 1e-6);

        let opposite = engine
            .verify(sample(&[1.0, 0.0, 0.0]), sample(&[-1.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert!(!opposite.matched);
        assert!((opposite.distance - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_verify_distance_at_threshold_is_rejected() {
        let config = Arc::new(FaceConfig {
            recognition_threshold: 2.0,
            ..(*test_config()).clone()
        });
        let engine = spawn_engine(config).unwrap();
        // Opposite unit vectors are exactly 2.0 apart.
        let v = engine
            .verify(sample(&[1.0, 0.0, 0.0]), sample(&[-1.0, 0.0, 0.0]))
            .await
            .unwrap();
        assert!((v.distance - 2.0).abs() < 1e-6);
        assert!(!v.matched);
    }

    #[tokio::test]
    async fn test_verify_applies_quality_gate() {
        let engine = spawn_engine(test_config()).unwrap();
        let small = Sample {
            embedding: Embedding::new(vec![0.6, 0.0, 0.8]),
            detection: Some(detection(40.0, 50.0)),
        };
        let err = engine
            .verify(small, sample(&[0.6, 0.0, 0.8]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::QualityRejected(QualityVerdict::FaceTooSmall { .. })
        ));

        let good = Sample {
            embedding: Embedding::new(vec![0.6, 0.0, 0.8]),
            detection: Some(detection(120.0, 52.0)),
        };
        assert!(engine.verify(sample(&[0.6, 0.0, 0.8]), good).await.unwrap().matched);
    }

    #[tokio::test]
    async fn test_non_finite_samples_rejected() {
        let engine = spawn_engine(test_config()).unwrap();
        engine.add_sample("p", sample(&[0.6, 0.0, 0.8])).await.unwrap();

        let nan = engine.add_sample("p", sample(&[f32::NAN, 0.0, 0.8])).await.unwrap_err();
        assert!(matches!(nan, EngineError::NonFiniteEmbedding));

        // serde_json reads an out-of-range f32 literal as infinity.
        let inf: Embedding = serde_json::from_str("[1e39, 0.0, 0.0]").unwrap();
        let err = engine.add_sample("p", inf.clone().into()).await.unwrap_err();
        assert!(matches!(err, EngineError::NonFiniteEmbedding));
        assert!(matches!(
            engine.recognize(inf.clone().into()).await.unwrap_err(),
            EngineError::NonFiniteEmbedding
        ));
        assert!(matches!(
            engine.verify(inf.into(), sample(&[1.0, 0.0, 0.0])).await.unwrap_err(),
            EngineError::NonFiniteEmbedding
        ));

        // The session is untouched and still completes with finite samples.
        let progress = engine.add_sample("p", sample(&[0.6, 0.0, 0.8])).await.unwrap();
        assert_eq!(progress.samples, 2);
        engine.add_sample("p", sample(&[0.6, 0.0, 0.8])).await.unwrap();
        let records = engine.export().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].embedding().is_finite());
    }

    #[tokio::test]
    async fn test_empty_identity_is_an_enrollment_error() {
        let engine = spawn_engine(test_config()).unwrap();
        let err = engine.add_sample("", sample(&[0.6, 0.0, 0.8])).await.unwrap_err();
        assert!(matches!(err, EngineError::Enrollment(EnrollmentError::EmptyIdentity)));
    }

    #[tokio::test]
    async fn test_clear_identity() {
        let engine = spawn_engine(test_config()).unwrap();
        enroll(&engine, "a", &[1.0, 0.0, 0.0]).await;
        enroll(&engine, "b", &[0.0, 1.0, 0.0]).await;

        engine.clear_identity("a").await.unwrap();
        engine.clear_identity("never-enrolled").await.unwrap();

        let records = engine.export().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity_id(), "b");
    }
}
