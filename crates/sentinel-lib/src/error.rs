//! Error types for the detection pipeline

use thiserror::Error;

/// Failure fetching observations. Fatal to a detection pass.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to reach cost source: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cost source returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to read cost file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed cost records: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid cost source URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Failure delivering one alert through one channel
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected alert with {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Invalid detector parameters
#[derive(Debug, Error, PartialEq)]
pub enum DetectorError {
    #[error("sensitivity must be finite and non-negative, got {0}")]
    InvalidSensitivity(f64),

    #[error("evaluation window must cover at least one bucket")]
    EmptyEvaluationWindow,

    #[error("minimum samples must be at least 1")]
    ZeroMinimumSamples,
}

/// Failure of a whole detection pass
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data source failure: {0}")]
    Source(#[from] SourceError),

    #[error("lookback of {0} hours reaches before the earliest representable time")]
    LookbackOutOfRange(i64),

    #[error("a detection pass is already running")]
    RunInProgress,

    #[error("pipeline is missing its {0}")]
    MissingComponent(&'static str),
}
