//! Error types for request enhancement.

/// Errors that can occur while enhancing generation requests.
#[derive(Debug, thiserror::Error)]
pub enum EnhancerError {
    /// The image could not be brought under the byte ceiling within the
    /// allotted re-encode attempts.
    #[error("unable to compress image below {limit} bytes after {attempts} attempts")]
    CompressionLimitExceeded {
        /// Byte ceiling that every attempt exceeded.
        limit: usize,
        /// Number of re-encode attempts made.
        attempts: u32,
    },

    /// A request could not be built or its payload had an unusable shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to decode or re-encode an image.
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Network or HTTP error from the underlying transport.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error (e.g., reading the selected file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EnhancerError {
    /// Returns true if this error should be surfaced to the user as a
    /// dismissible warning.
    ///
    /// Everything else is logged and degrades silently: a request that cannot
    /// be decorated is forwarded as-is rather than blocked.
    pub fn should_notify_user(&self) -> bool {
        matches!(
            self,
            Self::CompressionLimitExceeded { .. } | Self::Image(_) | Self::Io(_)
        )
    }
}

/// Result type alias for request enhancement operations.
pub type Result<T> = std::result::Result<T, EnhancerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_notify_user() {
        let limit = EnhancerError::CompressionLimitExceeded {
            limit: 4 * 1024 * 1024,
            attempts: 10,
        };
        assert!(limit.should_notify_user());

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!EnhancerError::Json(json).should_notify_user());

        assert!(!EnhancerError::InvalidRequest("bad payload".into()).should_notify_user());
    }

    #[test]
    fn test_error_display() {
        let err = EnhancerError::CompressionLimitExceeded {
            limit: 4194304,
            attempts: 10,
        };
        assert_eq!(
            err.to_string(),
            "unable to compress image below 4194304 bytes after 10 attempts"
        );

        let err = EnhancerError::InvalidRequest("payload is not a JSON object".into());
        assert_eq!(
            err.to_string(),
            "invalid request: payload is not a JSON object"
        );
    }
}
