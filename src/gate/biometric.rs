//! Face-embedding comparison.
//!
//! Embeddings are fixed-dimension `f32` vectors produced by the external
//! face-analysis capability; two embeddings are compared by cosine
//! similarity. The matcher never touches stored state and never decides
//! account status.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::gate::extractor::ExtractorError;

pub type Embedding = Vec<f32>;

/// Default similarity threshold; strictly above it counts as a match.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BiometricError {
    #[error("empty embedding")]
    EmptyEmbedding,
    #[error("embedding dimensions differ: {live} vs {stored}")]
    DimensionMismatch { live: usize, stored: usize },
    #[error("zero-norm embedding")]
    ZeroNorm,
}

/// The external feature-extraction capability.
///
/// Implementations turn raw image bytes into at most one face embedding;
/// `None` means no face was detected, which the engine treats as a
/// non-match, not a fault.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        image: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<Embedding>, ExtractorError>> + Send + 'a>>;
}

/// Cosine similarity `dot(a,b) / (‖a‖·‖b‖)`, in [-1, 1].
///
/// # Errors
///
/// Fails on empty, dimension-mismatched, or zero-norm vectors; a division
/// by zero is never allowed to surface as `NaN`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, BiometricError> {
    if a.is_empty() || b.is_empty() {
        return Err(BiometricError::EmptyEmbedding);
    }
    if a.len() != b.len() {
        return Err(BiometricError::DimensionMismatch {
            live: a.len(),
            stored: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(BiometricError::ZeroNorm);
    }

    #[allow(clippy::cast_possible_truncation)]
    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32;
    Ok(similarity)
}

/// Decides whether a live embedding depicts the enrolled person.
#[derive(Debug, Clone, Copy)]
pub struct FaceMatcher {
    threshold: f32,
}

impl FaceMatcher {
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score `live` against `stored` and apply the threshold.
    ///
    /// Returns `(matched, similarity)`; equal-to-threshold is a non-match.
    ///
    /// # Errors
    ///
    /// Propagates [`BiometricError`] for degenerate vectors.
    pub fn matches(&self, live: &[f32], stored: &[f32]) -> Result<(bool, f32), BiometricError> {
        let similarity = cosine_similarity(live, stored)?;
        Ok((similarity > self.threshold, similarity))
    }
}
