use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Module too large: {0}")]
    TooLarge(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),
}

impl SourceError {
    /// Not-found is the only error a `SourceList` or the resolver walk may skip past.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

/// Error type for Go source parsing
#[derive(Debug, Error)]
pub enum ParseError {
    /// Failed to parse the file structure
    #[error("Failed to parse file: {0}")]
    ParseFailed(String),

    /// Tree-sitter related error
    #[error("Tree-sitter error: {0}")]
    TreeSitter(String),

    /// Files of one directory declare different package names
    #[error("Found packages {first} and {second} in {dir}")]
    MultiplePackages {
        dir: String,
        first: String,
        second: String,
    },

    /// No buildable files remain after platform filtering
    #[error("No buildable Go source files in {0}")]
    NoFiles(String),
}

/// Request-level error taxonomy shared by the fetch coordinator, the loader
/// and the HTTP handlers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Package not found")]
    NotFound,

    #[error("Module path mismatch: {requested} declares module {actual}")]
    Mismatch { requested: String, actual: String },

    #[error("No packages found in module")]
    NoPackages,

    #[error("Invalid import path: {0}")]
    InvalidPath(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),

    #[error("Blocked")]
    Blocked,

    #[error("Too many concurrent fetches")]
    TooManyFetches,

    #[error("Already fetching")]
    AlreadyFetching,

    #[error("Fetch timed out")]
    Timeout,

    #[error(transparent)]
    Source(SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Fetch task failed: {0}")]
    Task(String),
}

impl Error {
    /// Capacity and deadline errors: the work is (or will be) happening, try again shortly.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TooManyFetches | Error::AlreadyFetching | Error::Timeout
        )
    }
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(_) => Error::NotFound,
            SourceError::InvalidVersion(version) => Error::InvalidVersion(version),
            other => Error::Source(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn source_not_found_becomes_not_found() {
        let err: Error = SourceError::NotFound("example.com/foo".to_string()).into();
        assert!(matches!(err, Error::NotFound));
    }

    #[test]
    fn source_invalid_version_becomes_client_error() {
        let err: Error = SourceError::InvalidVersion("v1.x".to_string()).into();
        assert!(matches!(err, Error::InvalidVersion(v) if v == "v1.x"));
    }

    #[test]
    fn other_source_errors_are_wrapped() {
        let err: Error = SourceError::InvalidResponse("bad".to_string()).into();
        assert!(matches!(err, Error::Source(SourceError::InvalidResponse(_))));
    }

    #[rstest]
    #[case(Error::TooManyFetches, true)]
    #[case(Error::AlreadyFetching, true)]
    #[case(Error::Timeout, true)]
    #[case(Error::NotFound, false)]
    #[case(Error::Blocked, false)]
    #[case(Error::NoPackages, false)]
    fn is_retryable_returns_expected(#[case] err: Error, #[case] expected: bool) {
        assert_eq!(err.is_retryable(), expected);
    }
}
