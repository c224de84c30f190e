use std::fmt;

use replay_common::document::DocumentError;
use thiserror::Error;

/// The two calculation endpoints under comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::A => "a",
            Side::B => "b",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Side::A => write!(f, "endpoint A"),
            Side::B => write!(f, "endpoint B"),
        }
    }
}

/// Enumeration of errors for a single call to a calculation endpoint.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request could not be completed: {0}")]
    RequestError(reqwest::Error),
    #[error("request returned an error status: {0}")]
    StatusError(reqwest::Error),
    #[error("failed to read response body: {0}")]
    BodyError(reqwest::Error),
    #[error("connection pool has been closed")]
    PoolClosedError,
    /// Only produced by transports that do not speak HTTP.
    #[error("{0}")]
    OtherError(String),
}

/// Enumeration of errors that fail the comparison of one record without affecting any other.
#[derive(Error, Debug)]
pub enum ComparisonError {
    #[error("request document is malformed: {0}")]
    PrepareError(DocumentError),
    #[error("request to {side} failed: {error}")]
    TransportError { side: Side, error: TransportError },
    #[error("response from {side} is malformed: {error}")]
    ResponseError { side: Side, error: DocumentError },
}

impl ComparisonError {
    /// The step of the comparison that failed, used to label logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            ComparisonError::PrepareError(_) => "prepare",
            ComparisonError::TransportError { .. } => "send",
            ComparisonError::ResponseError { .. } => "extract",
        }
    }
}

/// Enumeration of errors writing the report.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to create report {path}: {error}")]
    CreateError { path: String, error: std::io::Error },
    #[error("failed to append to report: {0}")]
    AppendError(std::io::Error),
}

/// Enumeration of errors reading recorded invoices.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

/// Enumeration of errors discovering the version an endpoint runs.
#[derive(Error, Debug)]
pub enum VersionError {
    #[error("failed to fetch version page from {side}: {error}")]
    RequestError { side: Side, error: reqwest::Error },
    #[error("{side} version page has no row labelled {label:?}")]
    NotFoundError { side: Side, label: String },
}

/// Enumeration of errors that abort a replay run.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to build the HTTP client: {0}")]
    ClientError(reqwest::Error),
    #[error("invalid endpoint url: {0}")]
    EndpointError(#[from] url::ParseError),
    #[error(transparent)]
    ReportError(#[from] ReportError),
    #[error(transparent)]
    SourceError(#[from] SourceError),
    #[error(transparent)]
    VersionError(#[from] VersionError),
    #[error("comparison admission has been closed")]
    AdmissionClosedError(#[from] tokio::sync::AcquireError),
}
