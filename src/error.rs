//! Error types for keyframe curation

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Curation error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A configuration value is out of range. Raised before any scoring starts.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single keyframe record is malformed (non-unit quaternion, empty image).
    #[error("Invalid keyframe {keyframe_id}: {reason}")]
    InvalidInput {
        /// Id of the offending keyframe
        keyframe_id: u64,
        /// Human readable cause
        reason: String,
    },

    /// No keyframes were supplied
    #[error("No keyframes supplied")]
    EmptyInput,
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    pub(crate) fn input(keyframe_id: u64, reason: impl Into<String>) -> Self {
        Error::InvalidInput {
            keyframe_id,
            reason: reason.into(),
        }
    }
}
