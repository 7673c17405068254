//! Detection quality gate.
//!
//! Decides from detector metadata alone whether a face is worth aligning and
//! embedding: the box must be large enough and the head roughly level.

use crate::config::FaceConfig;
use crate::types::BoundingBox;
use std::fmt;

/// Outcome of a quality evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Accepted,
    FaceTooSmall { width: f32, height: f32, min: u32 },
    ExcessiveRoll { roll_degrees: f32, max: f32 },
    /// Roll cannot be estimated without eye landmarks.
    MissingLandmarks,
}

impl QualityVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, QualityVerdict::Accepted)
    }

    /// Short instruction suitable for showing to the person in front of the camera.
    pub fn hint(&self) -> &'static str {
        match self {
            QualityVerdict::Accepted => "ok",
            QualityVerdict::FaceTooSmall { .. } => "move closer to the camera",
            QualityVerdict::ExcessiveRoll { .. } => "hold your head level",
            QualityVerdict::MissingLandmarks => "face not clearly visible, try again",
        }
    }
}

impl fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityVerdict::Accepted => write!(f, "accepted"),
            QualityVerdict::FaceTooSmall { width, height, min } => {
                write!(f, "face too small: {width:.0}x{height:.0} px, minimum {min} px")
            }
            QualityVerdict::ExcessiveRoll { roll_degrees, max } => {
                write!(f, "head roll {roll_degrees:.1}° exceeds {max:.1}°")
            }
            QualityVerdict::MissingLandmarks => write!(f, "detection has no eye landmarks"),
        }
    }
}

/// Head roll in degrees, estimated from the line between the eye centres.
pub fn roll_degrees(left_eye: (f32, f32), right_eye: (f32, f32)) -> f32 {
    (right_eye.1 - left_eye.1)
        .atan2(right_eye.0 - left_eye.0)
        .to_degrees()
}

/// Pure predicate over detection metadata. Never mutates its input.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    min_face_size: u32,
    max_roll_angle: f32,
}

impl QualityGate {
    pub fn new(min_face_size: u32, max_roll_angle: f32) -> Self {
        Self {
            min_face_size,
            max_roll_angle,
        }
    }

    pub fn from_config(config: &FaceConfig) -> Self {
        Self::new(config.min_face_size, config.max_roll_angle)
    }

    pub fn accept(&self, face: &BoundingBox) -> bool {
        self.evaluate(face).is_accepted()
    }

    pub fn evaluate(&self, face: &BoundingBox) -> QualityVerdict {
        let min = self.min_face_size as f32;
        // Negated comparisons so NaN geometry is rejected too.
        if !(face.width >= min && face.height >= min) {
            tracing::debug!(
                width = face.width,
                height = face.height,
                min = self.min_face_size,
                "quality: face too small"
            );
            return QualityVerdict::FaceTooSmall {
                width: face.width,
                height: face.height,
                min: self.min_face_size,
            };
        }

        let Some((left_eye, right_eye)) = face.eyes() else {
            tracing::debug!("quality: detection has no landmarks");
            return QualityVerdict::MissingLandmarks;
        };

        let roll = roll_degrees(left_eye, right_eye);
        if !(roll.abs() <= self.max_roll_angle) {
            tracing::debug!(roll, max = self.max_roll_angle, "quality: excessive roll");
            return QualityVerdict::ExcessiveRoll {
                roll_degrees: roll,
                max: self.max_roll_angle,
            };
        }

        QualityVerdict::Accepted
    }
}
