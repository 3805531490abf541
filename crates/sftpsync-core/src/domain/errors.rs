//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! path resolution failures and context containment violations.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path is not within the profile's context directory
    #[error("File '{path}' not within context '{context}'")]
    PathNotInContext {
        /// The offending file path
        path: String,
        /// The context it was expected to live under
        context: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("".to_string());
        assert_eq!(err.to_string(), "Invalid path: ");

        let err = DomainError::PathNotInContext {
            path: "/etc/passwd".to_string(),
            context: "/home/user/site".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "File '/etc/passwd' not within context '/home/user/site'"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidPath("a".to_string());
        let err2 = DomainError::InvalidPath("a".to_string());
        let err3 = DomainError::InvalidPath("b".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
