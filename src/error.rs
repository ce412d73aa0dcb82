//! Error types and handling for the sigmap engine

use thiserror::Error;

/// Result type alias for sigmap operations
pub type Result<T> = std::result::Result<T, SigmapError>;

/// Main error type for the sigmap engine
#[derive(Error, Debug)]
pub enum SigmapError {
    /// I/O errors from transport operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Expression string failed to compile
    #[error("expression parse error: {message}")]
    Parse {
        /// Description of the parse failure
        message: String,
    },

    /// A linear-mode request is missing source or destination extrema
    #[error("range unknown for linear mode")]
    RangeUnknown,

    /// A vector did not match the slot's declared length
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Length declared by the slot
        expected: usize,
        /// Length actually supplied
        actual: usize,
    },

    /// A slot index was outside the map's source range
    #[error("slot index {index} outside [0, {limit})")]
    OutOfBounds {
        /// Index supplied by the message
        index: usize,
        /// Number of source slots
        limit: usize,
    },

    /// History or variable-table allocation failed
    #[error("allocation failure: {message}")]
    Alloc {
        /// Description of the failed allocation
        message: String,
    },

    /// A history read was attempted before any sample was written
    #[error("history not yet written")]
    NotYetWritten,

    /// A history read reached past the retained samples
    #[error("history index {requested} out of range (retained {available})")]
    OutOfHistory {
        /// Requested steps into the past
        requested: usize,
        /// Samples currently retained
        available: usize,
    },

    /// Invalid configuration parameter
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration issue
        message: String,
    },

    /// A wire frame failed to decode
    #[error("invalid frame: {message}")]
    InvalidFrame {
        /// Reason the frame is invalid
        message: String,
    },
}

impl SigmapError {
    /// Create a new expression parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a new allocation failure error
    pub fn alloc(message: impl Into<String>) -> Self {
        Self::Alloc {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new invalid frame error
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// Check if this error leaves the map usable in its prior state
    ///
    /// Parse and range errors reject a mode transition but preserve the
    /// previous mode; length mismatches skip a single field. Allocation
    /// failures are fatal to the owning map.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Alloc { .. } | Self::Io(_))
    }

    /// Check if this error belongs to the admin control plane
    pub fn is_admin_error(&self) -> bool {
        matches!(
            self,
            Self::Parse { .. }
                | Self::RangeUnknown
                | Self::LengthMismatch { .. }
                | Self::OutOfBounds { .. }
        )
    }

    /// Check if this error came from a history buffer access
    pub fn is_history_error(&self) -> bool {
        matches!(self, Self::NotYetWritten | Self::OutOfHistory { .. })
    }
}
