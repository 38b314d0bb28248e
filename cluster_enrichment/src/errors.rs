use polars::error::PolarsError;
use thiserror::Error;

/// Failures talking to the enrichment service. Every variant is a
/// single-attempt outcome; nothing here is retried.
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("Enrichr addList failed with status {status}: {body}")]
    Submission { status: u16, body: String },
    #[error("Enrichr enrich failed with status {status}: {body}")]
    Fetch { status: u16, body: String },
    #[error("malformed Enrichr response: {0}")]
    MalformedResponse(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot find an adjusted p value or CD column for cluster {cluster}")]
    MissingColumn { cluster: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
