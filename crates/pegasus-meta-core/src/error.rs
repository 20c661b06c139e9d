//! Error types for the fingerprinting engine and metadata store

use std::path::PathBuf;
use thiserror::Error;

/// Result type used across the core library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// I/O failure on a specific file
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container could not be opened or read
    #[error("Archive error in {}: {message}", .path.display())]
    Archive { path: PathBuf, message: String },

    /// File extension claims a container format its first bytes do not match
    #[error("{} does not look like a {expected} archive", .path.display())]
    SignatureMismatch { path: PathBuf, expected: &'static str },

    /// Checksum cache file could not be parsed or serialized
    #[error("Checksum cache error in {}: {message}", .path.display())]
    Cache { path: PathBuf, message: String },

    /// Reference catalog query failed
    #[error("Catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    /// Update or edit requested on a folder without a metadata file
    #[error("No existing metadata store at {}", .0.display())]
    StoreMissing(PathBuf),

    /// Platform definition file could not be read at all
    #[error("Platform registry error: {0}")]
    Registry(String),

    /// Settings file could not be parsed or written
    #[error("Settings error: {0}")]
    Settings(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
