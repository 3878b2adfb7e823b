use std::fmt;

/// Result type for revtrace-providers operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the providers layer.
/// The ingest worker routes on the variant: `Signature` marks the raw row
/// `skipped`, `Json`/`Parse` mark it `failed`.
#[derive(Debug)]
pub enum Error {
    /// JSON parsing failed
    Json(serde_json::Error),

    /// Payload parsing failed (missing required fields, invalid format, etc.)
    Parse(String),

    /// Signature verification failed (bad HMAC, replay, missing header)
    Signature(String),

    /// Normalizer not found for a source
    Provider(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::Signature(msg) => write!(f, "Signature error: {}", msg),
            Error::Provider(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(err) => Some(err),
            Error::Parse(_) | Error::Signature(_) | Error::Provider(_) => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
