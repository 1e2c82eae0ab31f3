// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a tailer error, for consumers that only need to
/// know what went missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DirectoryNotFound,
    FileNotFound,
    Unspecified,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}: directory not found: {source}", path.display())]
    DirectoryNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: directory was removed while being watched", path.display())]
    DirectoryRemoved { path: PathBuf },

    #[error("{}: file not found", path.display())]
    FileNotFound { path: PathBuf },

    #[error("{glob}: no such file")]
    NoMatchingFile { glob: String },

    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{message}: {source}")]
    Watch {
        message: String,
        #[source]
        source: notify::Error,
    },

    #[error("{pattern}: invalid glob pattern: {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DirectoryNotFound { .. } => ErrorKind::DirectoryNotFound,
            Error::FileNotFound { .. } | Error::NoMatchingFile { .. } => ErrorKind::FileNotFound,
            Error::DirectoryRemoved { .. }
            | Error::Io { .. }
            | Error::Watch { .. }
            | Error::InvalidGlob { .. }
            | Error::Config(_) => ErrorKind::Unspecified,
        }
    }

    /// The error text without its cause.
    pub fn message(&self) -> String {
        match self {
            Error::DirectoryNotFound { path, .. } => {
                format!("{}: directory not found", path.display())
            }
            Error::Io { message, .. } | Error::Watch { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source,
        }
    }

    pub(crate) fn watch(message: impl Into<String>, source: notify::Error) -> Self {
        Error::Watch {
            message: message.into(),
            source,
        }
    }
}
