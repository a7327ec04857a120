//! Typed errors for the scoped file service.
//!
//! Callers branch on the variant (lock vs. not-found vs. too-large); storage
//! backend failures are wrapped into [`Error::Driver`] with the operation that
//! failed as context.

use crate::utils::format_bytes;

/// Boxed source error carried by [`Error::Driver`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for file service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// File service errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// File or scope resource absent.
    #[error("file not found: {path}")]
    NotFound { path: String },

    /// Mutation attempted against a locked bot.
    #[error("bot '{bot_id}' is locked, cannot modify '{path}'")]
    BotLocked { bot_id: String, path: String },

    /// Content exceeds the scope's size ceiling.
    #[error("file '{path}' is too large ({}, limit is {})", human_size(.size), human_size(.limit))]
    FileTooLarge { path: String, size: u64, limit: u64 },

    /// Discrete read/write/delete on a directory-glob scope.
    #[error("cannot {operation} under directory-glob scope '{base_dir}'")]
    UnsupportedOperation {
        operation: &'static str,
        base_dir: String,
    },

    /// Malformed bot identifier or base-directory pattern.
    #[error("invalid scope identifier: {0}")]
    InvalidScopeIdentifier(String),

    /// Structured content failed to parse.
    #[error("failed to parse '{path}': {reason}")]
    ParseError { path: String, reason: String },

    /// Wrapped storage backend failure.
    #[error("{context}: {source}")]
    Driver {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Archive creation failed.
    #[error("archive error: {0}")]
    Archive(String),
}

fn human_size(bytes: &u64) -> String {
    format_bytes(*bytes)
}

impl Error {
    /// Create a not found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a bot locked error.
    pub fn bot_locked(bot_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::BotLocked {
            bot_id: bot_id.into(),
            path: path.into(),
        }
    }

    /// Create a file too large error.
    pub fn file_too_large(path: impl Into<String>, size: u64, limit: u64) -> Self {
        Self::FileTooLarge {
            path: path.into(),
            size,
            limit,
        }
    }

    /// Create an unsupported operation error.
    pub fn unsupported(operation: &'static str, base_dir: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation,
            base_dir: base_dir.into(),
        }
    }

    /// Create an invalid scope identifier error.
    pub fn invalid_scope(reason: impl Into<String>) -> Self {
        Self::InvalidScopeIdentifier(reason.into())
    }

    /// Create a parse error.
    pub fn parse(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a backend error with the operation that failed.
    pub fn driver(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Driver {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Wrap an I/O error, mapping `NotFound` to [`Error::NotFound`].
    pub fn io(context: impl Into<String>, path: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::not_found(path)
        } else {
            Self::driver(context, source)
        }
    }

    /// Returns true for the missing-resource class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::driver("Task join error", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = Error::io(
            "Failed to read file",
            "data/global/x.json",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "file not found: data/global/x.json");
    }

    #[test]
    fn test_io_other_is_wrapped_with_context() {
        let err = Error::io(
            "Failed to read file data/global/x.json",
            "data/global/x.json",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, Error::Driver { .. }));
        assert!(
            err.to_string()
                .starts_with("Failed to read file data/global/x.json")
        );
    }

    #[test]
    fn test_file_too_large_message_names_file() {
        let err = Error::file_too_large("data/global/big.json", 2048, 1024);
        assert_eq!(
            err.to_string(),
            "file 'data/global/big.json' is too large (2.0 KB, limit is 1.0 KB)"
        );
    }
}
