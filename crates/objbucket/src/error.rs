//! Error types for the objbucket crate

use thiserror::Error;

/// Result type alias using `BucketError`
pub type Result<T> = std::result::Result<T, BucketError>;

/// Errors that can occur during bucket operations.
///
/// Backends translate their own error shapes into these variants so that
/// callers can classify failures without knowing which backend produced
/// them. Decorators that add context must go through [`BucketError::context`],
/// which keeps the underlying classification intact.
#[derive(Error, Debug)]
pub enum BucketError {
    /// Object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Caller is not permitted to perform the operation
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// An upload precondition was not met
    #[error("upload condition not met: {0}")]
    ConditionNotMet(String),

    /// The operation was cancelled before completion
    #[error("operation cancelled")]
    Cancelled,

    /// A requested option is not supported by the backend
    #[error("bucket {bucket}: option {option} not supported")]
    UnsupportedOption {
        bucket: String,
        option: &'static str,
    },

    /// The caller supplied an invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Encryption framing error
    #[error("crypto error: {0}")]
    Crypto(#[from] objbucket_crypto::CryptoError),

    /// An error wrapped with additional context
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<BucketError>,
    },

    /// Backend-specific error with no finer classification
    #[error("{0}")]
    Other(String),
}

impl BucketError {
    /// Wrap this error with additional context, preserving its classification.
    pub fn context(self, context: impl Into<String>) -> Self {
        BucketError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    fn root(&self) -> &BucketError {
        match self {
            BucketError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            BucketError::NotFound(_) => true,
            BucketError::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error means the caller lacks permission.
    pub fn is_access_denied(&self) -> bool {
        match self.root() {
            BucketError::AccessDenied(_) => true,
            BucketError::Io(err) => err.kind() == std::io::ErrorKind::PermissionDenied,
            _ => false,
        }
    }

    /// Whether this error means an upload precondition failed.
    pub fn is_condition_not_met(&self) -> bool {
        matches!(self.root(), BucketError::ConditionNotMet(_))
    }

    /// Whether this error means the operation was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), BucketError::Cancelled)
    }
}
