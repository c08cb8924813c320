//! Errors surfaced to callers of the histogram service and the HTTP API.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{name} must be a number, got {value:?}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("malformed confidence range term {term:?}, expected N or LO-HI")]
    MalformedRange { term: String },

    #[error("at least one label is required")]
    MissingLabels,

    #[error("image {0} not found in index")]
    ImageNotFound(String),

    #[error("failed to fetch or decode image: {0}")]
    ImageFetch(String),

    #[error("histogram rebuild failed: {0:#}")]
    RebuildFailed(anyhow::Error),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the caller sent something unusable, as opposed to a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidParameter { .. } | Error::MalformedRange { .. } | Error::MissingLabels
        )
    }
}
