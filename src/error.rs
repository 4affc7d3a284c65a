//! Crate-level error type and the flat [`ErrorKind`] used in outcome reports.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::descriptor::{EntryNotFound, FormatError};
use crate::manifest::ManifestError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed descriptor: {0}")]
    Format(#[from] FormatError),
    #[error(transparent)]
    NotFound(#[from] EntryNotFound),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("HMAC digest mismatch for {0}")]
    DigestMismatch(String),
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("cancelled before processing")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure class recorded for every failed file or module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Format,
    NotFound,
    Authentication,
    DigestMismatch,
    KeyDerivation,
    Io,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format(_) => ErrorKind::Format,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Crypto(CryptoError::Authentication) => ErrorKind::Authentication,
            Error::Crypto(_) => ErrorKind::KeyDerivation,
            Error::DigestMismatch(_) => ErrorKind::DigestMismatch,
            Error::Io { .. } => ErrorKind::Io,
            Error::Manifest(ManifestError::Io(_)) => ErrorKind::Io,
            Error::Manifest(_) => ErrorKind::Format,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}
