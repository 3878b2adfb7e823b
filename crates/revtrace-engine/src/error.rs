use std::fmt;

/// Result type for revtrace-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the engine layer
#[derive(Debug)]
pub enum Error {
    /// Store layer error
    Store(revtrace_store::Error),

    /// A detector failed; recorded on its run ledger, never fatal to a batch
    Detector { detector_id: String, message: String },

    /// Invalid operation (illegal issue transition, closed-issue mutation)
    InvalidTransition(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Detector {
                detector_id,
                message,
            } => write!(f, "Detector {} failed: {}", detector_id, message),
            Error::InvalidTransition(msg) => write!(f, "Invalid transition: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Detector { .. } | Error::InvalidTransition(_) => None,
        }
    }
}

impl From<revtrace_store::Error> for Error {
    fn from(err: revtrace_store::Error) -> Self {
        Error::Store(err)
    }
}
