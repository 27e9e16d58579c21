//! Error types for distpack
//!
//! Provides structured error handling with context and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for descriptor loading, resolution and packaging
#[derive(Error, Debug)]
pub enum DistError {
    /// Malformed or invalid package descriptor
    #[error("Descriptor error: {message}")]
    Descriptor {
        message: String,
        path: PathBuf,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Version string that cannot be parsed
    #[error("Invalid version '{input}': {message}")]
    Version { input: String, message: String },

    /// Dependency specification that cannot be parsed
    #[error("Invalid requirement '{input}': {message}")]
    Requirement { input: String, message: String },

    /// No version satisfies a constraint
    #[error("Resolution error: {message}")]
    Resolution {
        message: String,
        package: String,
        constraints: Vec<String>,
    },

    /// Two constraints are mutually exclusive
    #[error("Conflict error: {message}")]
    Conflict {
        message: String,
        package: String,
        constraints: Vec<String>,
    },

    /// Errors related to data file bundling
    #[error("Bundle error: {message}")]
    Bundle { message: String, path: PathBuf },

    /// Errors related to writing or reading archives
    #[error("Archive error: {message}")]
    Archive {
        message: String,
        path: PathBuf,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Errors related to installing an archive
    #[error("Install error: {message}")]
    Install { message: String, path: PathBuf },

    /// File system operation errors
    #[error("File system error: {operation} failed on {path}")]
    FileSystem {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl DistError {
    /// Create a new descriptor error
    pub fn descriptor<P: Into<PathBuf>>(message: impl Into<String>, path: P) -> Self {
        Self::Descriptor {
            message: message.into(),
            path: path.into(),
            source: None,
        }
    }

    /// Create a new descriptor error wrapping an underlying cause
    pub fn descriptor_with_source<P, E>(message: impl Into<String>, path: P, source: E) -> Self
    where
        P: Into<PathBuf>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Descriptor {
            message: message.into(),
            path: path.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new version error
    pub fn version(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Version {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Create a new requirement error
    pub fn requirement(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Requirement {
            input: input.into(),
            message: message.into(),
        }
    }

    /// Create a new resolution error
    pub fn resolution(
        message: impl Into<String>,
        package: impl Into<String>,
        constraints: Vec<String>,
    ) -> Self {
        Self::Resolution {
            message: message.into(),
            package: package.into(),
            constraints,
        }
    }

    /// Create a new conflict error
    pub fn conflict(
        message: impl Into<String>,
        package: impl Into<String>,
        constraints: Vec<String>,
    ) -> Self {
        Self::Conflict {
            message: message.into(),
            package: package.into(),
            constraints,
        }
    }

    /// Create a new bundle error
    pub fn bundle<P: Into<PathBuf>>(message: impl Into<String>, path: P) -> Self {
        Self::Bundle {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Create a new archive error
    pub fn archive<P: Into<PathBuf>>(message: impl Into<String>, path: P) -> Self {
        Self::Archive {
            message: message.into(),
            path: path.into(),
            source: None,
        }
    }

    /// Create a new archive error wrapping an I/O failure
    pub fn archive_io<P: Into<PathBuf>>(
        message: impl Into<String>,
        path: P,
        source: std::io::Error,
    ) -> Self {
        Self::Archive {
            message: message.into(),
            path: path.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new install error
    pub fn install<P: Into<PathBuf>>(message: impl Into<String>, path: P) -> Self {
        Self::Install {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Create a new file system error
    pub fn file_system<P: Into<PathBuf>>(
        operation: impl Into<String>,
        path: P,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, DistError>;
