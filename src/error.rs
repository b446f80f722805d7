//! Error taxonomy for ingestion.
//!
//! Component-level failures are recorded on the component and never abort
//! siblings. Only [`IngestError::ImportFailed`] is meant to reach the caller
//! of an import.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source could not provide {type_identifier}: {message}")]
    SourceFetch {
        type_identifier: String,
        message: String,
    },
    #[error("no data was provided")]
    NoData,
    #[error("ingest was cancelled")]
    Cancelled,
    #[error("blank response from {0}")]
    BlankResponse(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("could not decode {what}: {message}")]
    Decode { what: &'static str, message: String },
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("could not archive {url}: {message}")]
    WebArchive { url: String, message: String },
    #[error("none of the offered representations could be imported")]
    ImportFailed,
}

impl IngestError {
    pub fn decode(what: &'static str, err: impl std::fmt::Display) -> Self {
        IngestError::Decode {
            what,
            message: err.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, IngestError::Cancelled)
    }
}

impl From<url::ParseError> for IngestError {
    fn from(err: url::ParseError) -> Self {
        IngestError::InvalidUrl(err.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
