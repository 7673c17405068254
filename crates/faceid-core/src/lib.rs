//! faceid-core — Face identity enrollment and recognition over embeddings.
//!
//! Works purely on fixed-length embedding vectors produced by an external
//! detector/aligner/model pipeline: gates detections on quality, builds a
//! canonical embedding from several enrollment samples, and matches fresh
//! embeddings by L2 distance.

pub mod config;
pub mod enrollment;
pub mod quality;
pub mod recognizer;
pub mod record;
pub mod types;

pub use config::{ConfigError, FaceConfig};
pub use enrollment::{EnrollmentError, EnrollmentManager};
pub use quality::{QualityGate, QualityVerdict};
pub use recognizer::{MatchResult, Matcher, Recognizer, RecognizerError};
pub use record::{decode_records, encode_records, FaceIdentityRecord, RecordError};
pub use types::{BoundingBox, DimensionMismatch, Embedding};
