//! Error types for unet-model crate.

use thiserror::Error;

/// Errors that can occur while configuring or building a U-Net.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid model configuration.
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    /// Input shape cannot be processed by the configured network.
    #[error("invalid input shape {shape}: {reason}")]
    InvalidInputShape {
        /// The rejected shape, formatted as `(H, W, C)`.
        shape: String,
        /// Reason for rejection.
        reason: String,
    },

    /// Shape mismatch during inference.
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape.
        expected: String,
        /// Actual shape.
        actual: String,
    },
}

impl ModelError {
    /// Creates an invalid config error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Creates an invalid input shape error.
    #[must_use]
    pub fn invalid_input_shape(shape: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInputShape {
            shape: shape.into(),
            reason: reason.into(),
        }
    }

    /// Creates a shape mismatch error.
    #[must_use]
    pub fn shape_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Result type for unet-model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_invalid_config() {
        let err = ModelError::invalid_config("base_filters must be > 0");
        assert!(err.to_string().contains("invalid model configuration"));
        assert!(err.to_string().contains("base_filters must be > 0"));
    }

    #[test]
    fn error_invalid_input_shape() {
        let err = ModelError::invalid_input_shape("(100, 100, 3)", "not divisible by 16");
        assert!(err.to_string().contains("(100, 100, 3)"));
        assert!(err.to_string().contains("not divisible by 16"));
    }

    #[test]
    fn error_shape_mismatch() {
        let err = ModelError::shape_mismatch("[1, 3, 64, 64]", "[1, 4, 64, 64]");
        assert!(err.to_string().contains("[1, 3, 64, 64]"));
        assert!(err.to_string().contains("[1, 4, 64, 64]"));
    }
}
