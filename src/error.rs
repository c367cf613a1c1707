//! Error types for autoload generation.
//!
//! Failures fall in three groups:
//! - configuration errors abort the whole generation pass before scanning,
//! - scan errors abort the rule being scanned (callers may downgrade them),
//! - read errors name the file that could not be turned into declarations.
//!
//! Ambiguous classes, PSR violations and duplicate files are not errors; they
//! are collected into the report instead.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid autoload declarations.
    Configuration,
    /// A declared path could not be scanned.
    Scan,
    /// A source file could not be read or parsed.
    Read,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "psr-4 namespaces must end with a namespace separator, '{namespace}' does not, use '{namespace}\\' (package {package})"
    )]
    InvalidPsr4Namespace { package: String, namespace: String },

    #[error(
        "PSR-4 autoloading is incompatible with the target-dir property, remove the target-dir in package '{package}'"
    )]
    Psr4WithTargetDir { package: String },

    #[error("invalid autoload rule in package '{package}': {message}")]
    InvalidRule { package: String, message: String },

    #[error(
        "could not scan for classes inside \"{}\" which does not appear to be a file nor a folder",
        path.display()
    )]
    CouldNotScan { path: PathBuf },

    #[error("invalid glob pattern \"{pattern}\": {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("file at \"{}\" does not exist, check your classmap definitions", path.display())]
    FileNotFound { path: PathBuf },

    #[error("file at \"{}\" is not readable, check its permissions", path.display())]
    FileNotReadable { path: PathBuf },

    #[error("file at \"{}\" could not be parsed as PHP, it may be binary or corrupted", path.display())]
    FileUnparseable { path: PathBuf },

    #[error("I/O error at \"{}\": {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap an I/O error, mapping the common kinds to their dedicated variants.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::FileNotReadable { path },
            _ => Self::Io { path, source: err },
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPsr4Namespace { .. }
            | Self::Psr4WithTargetDir { .. }
            | Self::InvalidRule { .. } => ErrorKind::Configuration,
            Self::CouldNotScan { .. } | Self::Glob { .. } => ErrorKind::Scan,
            Self::FileNotFound { .. }
            | Self::FileNotReadable { .. }
            | Self::FileUnparseable { .. }
            | Self::Io { .. } => ErrorKind::Read,
        }
    }

    /// Path the error refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::CouldNotScan { path }
            | Self::FileNotFound { path }
            | Self::FileNotReadable { path }
            | Self::FileUnparseable { path }
            | Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
