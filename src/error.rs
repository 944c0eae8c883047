use std::{io, path::PathBuf};

use thiserror::Error;

use crate::dds::DdsError;

/// Errors surfaced by the mirroring pipeline.
///
/// Invalid coordinates never show up here: the geo functions answer them with
/// a sentinel value and a warning instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered 404 for an optional resource.
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A manifest, model or listing did not have the expected shape.
    #[error("malformed remote data in {origin}: {reason}")]
    MalformedRemoteData { origin: String, reason: String },

    #[error("invalid flight plan {}: {reason}", path.display())]
    Plan { path: PathBuf, reason: String },

    #[error("failed formatting imagery URL: {0}")]
    UrlTemplate(String),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("texture encoding failed: {0}")]
    Texture(#[from] DdsError),

    #[error("failed extracting archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("background task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("concurrency gate closed")]
    GateClosed,
}

impl Error {
    /// Whether this is the recoverable "no data here" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether a single referenced resource can be skipped without failing
    /// the tile that referenced it.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::MalformedRemoteData { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedRemoteData {
            origin: origin.into(),
            reason: reason.into(),
        }
    }
}
