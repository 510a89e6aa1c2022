//! Handler error types

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while parsing a request or building its response.
///
/// None of these are retried: the endpoint layer answers the request with
/// `status()` and the error message as a plain text body.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("urlencoded request body requires a content-length header")]
    MissingContentLength,

    #[error("invalid content-length header: {0}")]
    InvalidContentLength(String),

    #[error("request body is shorter than content-length ({actual} < {expected} bytes)")]
    TruncatedBody { expected: usize, actual: usize },

    #[error("form data is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed percent-encoding in form data: {0:?}")]
    MalformedPercentEncoding(String),

    #[error("multipart form data could not be parsed: {0}")]
    Multipart(#[from] multer::Error),

    #[error("failed to serialize request snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HandlerError {
    /// HTTP status the endpoint answers with when this error reaches it.
    pub fn status(&self) -> StatusCode {
        match self {
            HandlerError::MissingContentLength => StatusCode::LENGTH_REQUIRED,
            HandlerError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::MissingContentLength => "missing_content_length",
            HandlerError::InvalidContentLength(_) => "invalid_content_length",
            HandlerError::TruncatedBody { .. } => "truncated_body",
            HandlerError::InvalidUtf8 => "invalid_utf8",
            HandlerError::MalformedPercentEncoding(_) => "malformed_percent_encoding",
            HandlerError::Multipart(_) => "multipart",
            HandlerError::Serialize(_) => "serialize",
        }
    }
}

/// Result alias for handler operations.
pub type Result<T> = std::result::Result<T, HandlerError>;
