use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Two vectors of different dimensionality were compared.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: expected {expected}, got {actual}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Produced by an external detector; the core only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(default)]
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Left and right eye centres, if the detector supplied landmarks.
    pub fn eyes(&self) -> Option<((f32, f32), (f32, f32))> {
        self.landmarks.map(|lms| (lms[0], lms[1]))
    }
}

/// Face embedding vector (192-dimensional in the reference deployment).
///
/// Serializes as a bare JSON array of floats.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fail unless this embedding has exactly `expected` components.
    pub fn check_dim(&self, expected: usize) -> Result<(), DimensionMismatch> {
        if self.values.len() == expected {
            Ok(())
        } else {
            Err(DimensionMismatch {
                expected,
                actual: self.values.len(),
            })
        }
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Scale to unit Euclidean norm.
    ///
    /// A zero vector has no direction and is returned unchanged.
    pub fn l2_normalized(&self) -> Embedding {
        let norm = self.norm();
        if norm > 0.0 {
            Embedding::new(self.values.iter().map(|x| x / norm).collect())
        } else {
            self.clone()
        }
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Always processes all dimensions; unequal lengths are an error rather
    /// than a silent truncation.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, DimensionMismatch> {
        other.check_dim(self.len())?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }

    /// Component-wise arithmetic mean. `None` when there are no samples.
    ///
    /// The dimension of the first sample fixes the expected dimension for the rest.
    pub fn mean<'a, I>(samples: I) -> Result<Option<Embedding>, DimensionMismatch>
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        let mut iter = samples.into_iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };

        let mut sum: Vec<f32> = first.values.clone();
        let mut count = 1usize;
        for sample in iter {
            sample.check_dim(sum.len())?;
            for (acc, v) in sum.iter_mut().zip(sample.values.iter()) {
                *acc += v;
            }
            count += 1;
        }

        let n = count as f32;
        Ok(Some(Embedding::new(sum.into_iter().map(|s| s / n).collect())))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}
