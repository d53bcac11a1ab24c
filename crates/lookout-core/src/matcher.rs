//! Matcher seam: verification result, comparison errors, model and distance metric table.

use crate::gallery::ReferenceImage;
use crate::preprocess::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComparisonError {
    #[error("recognition model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Outcome of comparing a candidate frame against one reference image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    pub verified: bool,
    pub distance: f32,
}

/// Scoring function comparing a sampled frame against a single reference image.
///
/// Implementations may block for an arbitrary duration. They are shared
/// between concurrently launched verification workers.
pub trait Matcher: Send + Sync {
    fn verify(
        &self,
        candidate: &Snapshot,
        reference: &ReferenceImage,
    ) -> Result<Verification, ComparisonError>;
}

/// Face recognition model used to embed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecognitionModel {
    #[default]
    #[serde(rename = "VGG-Face")]
    VggFace,
    #[serde(rename = "Facenet")]
    Facenet,
    #[serde(rename = "OpenFace")]
    OpenFace,
}

impl RecognitionModel {
    /// Canonical model name, also used as the asset name for provisioning.
    pub fn name(self) -> &'static str {
        match self {
            Self::VggFace => "VGG-Face",
            Self::Facenet => "Facenet",
            Self::OpenFace => "OpenFace",
        }
    }

    /// Square input side length expected by the model.
    pub fn input_size(self) -> usize {
        match self {
            Self::VggFace => 224,
            Self::Facenet => 160,
            Self::OpenFace => 96,
        }
    }

    /// Distance at or below which two faces are considered the same person.
    pub fn threshold(self, metric: DistanceMetric) -> f32 {
        use DistanceMetric::*;
        match (self, metric) {
            (Self::VggFace, Cosine) => 0.68,
            (Self::VggFace, Euclidean) => 1.17,
            (Self::VggFace, EuclideanL2) => 1.17,
            (Self::Facenet, Cosine) => 0.40,
            (Self::Facenet, Euclidean) => 10.0,
            (Self::Facenet, EuclideanL2) => 0.80,
            (Self::OpenFace, Cosine) => 0.10,
            (Self::OpenFace, Euclidean) => 0.55,
            (Self::OpenFace, EuclideanL2) => 0.55,
        }
    }
}

impl fmt::Display for RecognitionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How two embeddings are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

/// Face embedding vector produced by a recognition model.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Zero vectors compare as 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Copy of this embedding scaled to unit length.
    pub fn l2_normalized(&self) -> Embedding {
        let norm = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding { values }
    }

    /// Distance under `metric`; lower means more alike.
    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => 1.0 - self.similarity(other),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::EuclideanL2 => self
                .l2_normalized()
                .euclidean_distance(&other.l2_normalized()),
        }
    }
}
