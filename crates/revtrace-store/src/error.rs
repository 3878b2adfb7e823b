use std::fmt;

/// Result type for revtrace-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the store layer
#[derive(Debug)]
pub enum Error {
    /// Database operation failed
    Database(rusqlite::Error),

    /// A stored value failed to decode into its domain type
    Decode(String),

    /// The database schema version is newer than this binary knows about.
    /// Startup must abort; downgrades are not supported.
    MigrationDrift { found: i32, expected: i32 },

    /// Query-specific error (invalid input, not found, etc.)
    Query(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Database(err) => write!(f, "Database error: {}", err),
            Error::Decode(msg) => write!(f, "Decode error: {}", msg),
            Error::MigrationDrift { found, expected } => write!(
                f,
                "Migration drift: database at version {} but binary knows {}",
                found, expected
            ),
            Error::Query(msg) => write!(f, "Query error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Database(err) => Some(err),
            Error::Decode(_) | Error::MigrationDrift { .. } | Error::Query(_) => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<revtrace_types::Error> for Error {
    fn from(err: revtrace_types::Error) -> Self {
        Error::Decode(err.to_string())
    }
}
