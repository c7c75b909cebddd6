//! JSON text encoding for persisted summary vectors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding a stored vector.
#[derive(Debug, Error)]
pub enum VectorCodecError {
    /// The column did not hold a JSON float array.
    #[error("malformed vector column: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The vector contained NaN or infinity.
    #[error("vector contains non-finite component at position {0}")]
    NonFinite(usize),
    /// The decoded vector length differs from the configured dimension.
    #[error("vector has dimension {actual}, expected {expected}")]
    Dimension {
        /// Configured dimension.
        expected: usize,
        /// Decoded length.
        actual: usize,
    },
}

/// A vector as stored in the `summary_vector` text column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedVector(String);

impl EncodedVector {
    /// Encode `vector` as a JSON array.
    pub fn encode(vector: &[f32]) -> Result<Self, VectorCodecError> {
        if let Some(position) = vector.iter().position(|value| !value.is_finite()) {
            return Err(VectorCodecError::NonFinite(position));
        }
        Ok(Self(serde_json::to_string(vector)?))
    }

    /// Wrap a raw column value without validating it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw column value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode the column, checking the dimension when one is supplied.
    pub fn decode(&self, expected_dimension: Option<usize>) -> Result<Vec<f32>, VectorCodecError> {
        let vector: Vec<f32> = serde_json::from_str(&self.0)?;
        if let Some(expected) = expected_dimension
            && vector.len() != expected
        {
            return Err(VectorCodecError::Dimension {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}
