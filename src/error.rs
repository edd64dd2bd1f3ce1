//! Error types for the enhancement pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error taxonomy for the enhancement pipeline.
///
/// The orchestrator maps these onto per-image warnings: `Fetch` and `Decode`
/// skip the affected image, `Operation` skips a single enhancement step,
/// `Encoding` skips one variant/format combination, and `Delivery` is
/// surfaced in the result without an internal retry.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input/output errors (buffer handling, scratch files, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image format or processing errors from the imaging stack
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Source bytes could not be fetched (network, timeout, non-success status)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Source bytes were fetched but could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A single enhancement operation failed
    #[error("Enhancement operation '{operation}' failed: {reason}")]
    Operation {
        /// Name of the operation that failed
        operation: String,
        /// Why it failed
        reason: String,
    },

    /// Encoding a variant into an output format failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The asset sink rejected an encoded asset
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create a new fetch error
    pub fn fetch<S: Into<String>>(msg: S) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new per-operation error
    pub fn operation<S: Into<String>, R: Into<String>>(operation: S, reason: R) -> Self {
        Self::Operation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a new encoding error
    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a new delivery error
    pub fn delivery<S: Into<String>>(msg: S) -> Self {
        Self::Delivery(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {})",
            parameter, value, valid_range
        ))
    }

    /// Create a timeout error for the named boundary call.
    ///
    /// Timeouts on fetch and delivery map onto their respective variants so
    /// the orchestrator classifies them like any other boundary failure.
    pub fn boundary_timeout(boundary: &str, secs: u64) -> Self {
        match boundary {
            "fetch" => Self::Fetch(format!("timed out after {}s", secs)),
            "deliver" => Self::Delivery(format!("timed out after {}s", secs)),
            other => Self::Operation {
                operation: other.to_string(),
                reason: format!("timed out after {}s", secs),
            },
        }
    }
}
