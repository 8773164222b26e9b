// error.rs - Error taxonomy for the ingestion pipeline.
//
// Per-item errors (fetch, embed, store write, single comparisons) are caught and
// recorded by the pipeline. PipelineError is the set that aborts a run.

use serde::Serialize;
use thiserror::Error;

/// The source provider could not list or deliver an item.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("mail provider request failed: {0}")]
    Http(String),

    #[error("mail provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode message {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("message {0} not found")]
    Missing(String),
}

/// The embedding model could not be downloaded or loaded. Fatal to the run.
#[derive(Debug, Error)]
#[error("embedding model unavailable: {0:#}")]
pub struct ModelUnavailable(pub anyhow::Error);

/// Inference failed for one input.
#[derive(Debug, Error)]
#[error("embedding failed: {0:#}")]
pub struct EmbedError(pub anyhow::Error);

/// A single vector comparison could not be scored.
#[derive(Debug, Error, PartialEq)]
pub enum SimilarityError {
    #[error("zero-norm vector cannot be compared")]
    DegenerateVector,

    #[error("vector length mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// The structured store rejected a read or write.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(String),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("store record {page_id} is malformed: {reason}")]
    Decode { page_id: String, reason: String },

    #[error("store record {0} not found")]
    NotFound(String),
}

/// Errors that abort `Pipeline::run`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("listing messages failed: {0}")]
    List(#[source] FetchError),

    #[error("reading the existing corpus failed: {0}")]
    CorpusRead(#[source] StoreError),
}

/// Coarse failure class reported per item in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Fetch,
    Embed,
    Store,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Fetch => "fetch",
            FailureKind::Embed => "embed",
            FailureKind::Store => "store",
        };
        f.write_str(s)
    }
}

/// Maps a ureq error onto the source taxonomy, keeping the response body for HTTP statuses.
pub fn fetch_error_from_ureq(err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(status, resp) => FetchError::Status {
            status,
            body: resp.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(t) => FetchError::Http(t.to_string()),
    }
}

/// Maps a ureq error onto the store taxonomy.
pub fn store_error_from_ureq(err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::Status(status, resp) => StoreError::Status {
            status,
            body: resp.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(t) => StoreError::Http(t.to_string()),
    }
}
