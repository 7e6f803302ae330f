//! VFS error types.

use std::io;
use thiserror::Error;

/// Coarse classification of a [`VfsError`], independent of its message.
///
/// Callers match on the kind rather than on variants when they only care
/// about the condition, e.g. "was this ultimately a cancellation?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    MountPointNotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    IsADirectory,
    InvalidPath,
    InvalidPattern,
    Unsupported,
    UnsupportedAttributes,
    InvalidTransactionContext,
    Cancelled,
    EndOfSequence,
    Io,
    Other,
}

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// No mount point is a prefix of the requested path.
    #[error("mount point not found: {0}")]
    MountPointNotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Router pattern rejected at registration.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// Operation is not supported by this filesystem.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Attribute kind not understood by the backend.
    #[error("unsupported attributes: {0}")]
    UnsupportedAttributes(String),

    /// Commit or rollback without a matching begin.
    #[error("invalid transaction context: {0}")]
    InvalidTransactionContext(String),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// No more pages. Not a failure.
    #[error("end of sequence")]
    EndOfSequence,

    /// An error with additional context.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<VfsError>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a MountPointNotFound error.
    pub fn mount_point_not_found(path: impl Into<String>) -> Self {
        Self::MountPointNotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create an InvalidPattern error.
    pub fn invalid_pattern(msg: impl Into<String>) -> Self {
        Self::InvalidPattern(msg.into())
    }

    /// Create an Unsupported error naming the operation and who rejected it.
    pub fn unsupported(op: &str, who: &str) -> Self {
        Self::Unsupported(format!("{op} not supported: {who}"))
    }

    /// Create an UnsupportedAttributes error.
    pub fn unsupported_attributes(what: impl Into<String>) -> Self {
        Self::UnsupportedAttributes(what.into())
    }

    /// Create an InvalidTransactionContext error.
    pub fn invalid_transaction(msg: impl Into<String>) -> Self {
        Self::InvalidTransactionContext(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Wrap this error with a message, keeping it as the cause.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Kind of the innermost cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VfsError::NotFound(_) => ErrorKind::NotFound,
            VfsError::MountPointNotFound(_) => ErrorKind::MountPointNotFound,
            VfsError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            VfsError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            VfsError::NotADirectory(_) => ErrorKind::NotADirectory,
            VfsError::IsADirectory(_) => ErrorKind::IsADirectory,
            VfsError::InvalidPath(_) => ErrorKind::InvalidPath,
            VfsError::InvalidPattern(_) => ErrorKind::InvalidPattern,
            VfsError::Unsupported(_) => ErrorKind::Unsupported,
            VfsError::UnsupportedAttributes(_) => ErrorKind::UnsupportedAttributes,
            VfsError::InvalidTransactionContext(_) => ErrorKind::InvalidTransactionContext,
            VfsError::Cancelled => ErrorKind::Cancelled,
            VfsError::EndOfSequence => ErrorKind::EndOfSequence,
            VfsError::Context { source, .. } => source.kind(),
            VfsError::Io(e) => {
                if let Some(inner) = e.get_ref().and_then(|i| i.downcast_ref::<VfsError>()) {
                    return inner.kind();
                }
                match e.kind() {
                    io::ErrorKind::NotFound => ErrorKind::NotFound,
                    io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
                    io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                    io::ErrorKind::Unsupported => ErrorKind::Unsupported,
                    io::ErrorKind::Interrupted => ErrorKind::Cancelled,
                    _ => ErrorKind::Io,
                }
            }
            VfsError::Other(_) => ErrorKind::Other,
        }
    }

    /// Returns true if any error in the cause chain has the given kind.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        if self.kind() == kind {
            return true;
        }
        match self {
            VfsError::Context { source, .. } => source.has_kind(kind),
            VfsError::Io(e) => e
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<VfsError>())
                .is_some_and(|inner| inner.has_kind(kind)),
            _ => false,
        }
    }

    /// Returns true for a not-found condition, including missing mount points.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound | ErrorKind::MountPointNotFound
        )
    }

    /// Returns true for the paging sentinel.
    pub fn is_end_of_sequence(&self) -> bool {
        self.kind() == ErrorKind::EndOfSequence
    }
}

/// Convert VfsError to std::io::Error for `Read`/`Write` implementations.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        let kind = match e.kind() {
            ErrorKind::NotFound | ErrorKind::MountPointNotFound => io::ErrorKind::NotFound,
            ErrorKind::AlreadyExists => io::ErrorKind::AlreadyExists,
            ErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            ErrorKind::NotADirectory => io::ErrorKind::NotADirectory,
            ErrorKind::IsADirectory => io::ErrorKind::IsADirectory,
            ErrorKind::InvalidPath | ErrorKind::InvalidPattern => io::ErrorKind::InvalidInput,
            ErrorKind::Unsupported | ErrorKind::UnsupportedAttributes => {
                io::ErrorKind::Unsupported
            }
            ErrorKind::Cancelled => io::ErrorKind::Interrupted,
            ErrorKind::EndOfSequence => io::ErrorKind::UnexpectedEof,
            ErrorKind::InvalidTransactionContext | ErrorKind::Io | ErrorKind::Other => {
                io::ErrorKind::Other
            }
        };
        match e {
            VfsError::Io(inner) => inner,
            other => io::Error::new(kind, other),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
