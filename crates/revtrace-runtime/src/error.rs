use std::fmt;

/// Result type for revtrace-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Store layer error
    Store(revtrace_store::Error),

    /// Provider layer error
    Provider(revtrace_providers::Error),

    /// Engine layer error
    Engine(revtrace_engine::Error),

    /// Configuration error
    Config(String),

    /// Secret encryption/decryption failed
    Crypto(String),

    /// Invalid operation or state
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Provider(err) => write!(f, "Provider error: {}", err),
            Error::Engine(err) => write!(f, "Engine error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Crypto(msg) => write!(f, "Crypto error: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Provider(err) => Some(err),
            Error::Engine(err) => Some(err),
            Error::Config(_) | Error::Crypto(_) | Error::InvalidOperation(_) => None,
        }
    }
}

impl From<revtrace_store::Error> for Error {
    fn from(err: revtrace_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<revtrace_providers::Error> for Error {
    fn from(err: revtrace_providers::Error) -> Self {
        Error::Provider(err)
    }
}

impl From<revtrace_engine::Error> for Error {
    fn from(err: revtrace_engine::Error) -> Self {
        Error::Engine(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
