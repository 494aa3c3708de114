//! Error types for HeaderHound

use std::path::PathBuf;
use thiserror::Error;

/// HeaderHound error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A `//#SOURCE=` magic flag named a file that is not on disk.
    /// This is a broken build declaration, not an environment race,
    /// so it is surfaced rather than skipped.
    #[error("{file}: magic flag //#SOURCE={flag} resolves to {resolved} which does not exist")]
    MissingSource {
        file: PathBuf,
        flag: String,
        resolved: PathBuf,
    },

    /// The reference preprocessor could not be invoked or exited non-zero.
    /// There is no safe empty-result fallback for a dependency query, so
    /// this is fatal to the caller.
    #[error("preprocessor invocation failed for {file}: {message}")]
    Preprocessor { file: PathBuf, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for HeaderHound
pub type Result<T> = std::result::Result<T, Error>;
