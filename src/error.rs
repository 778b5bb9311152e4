// Error types shared by the rate limiter, the retry executor and the booking coordinator

use std::time::Duration;
use thiserror::Error;

// Coarse classification used by retry policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    Response,
    Rejected,
    Cancelled,
    Unexpected,
}

// Errors talking to the external scheduling service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error(transparent)]
    RateLimitExceeded(#[from] RateLimitExceeded),

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    // Permanent outcome, e.g. the slot was claimed by someone else
    #[error("Booking rejected: {message}")]
    Rejected { message: String },

    #[error("Captcha error: {0}")]
    Captcha(String),

    #[error("Attempt cancelled")]
    Cancelled,

    #[error("Other error: {0}")]
    Other(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NetworkError(_) => ErrorKind::Network,
            ApiError::Timeout(_) => ErrorKind::Timeout,
            ApiError::RateLimitExceeded(_) => ErrorKind::RateLimited,
            ApiError::ApiResponseError { .. } => ErrorKind::Response,
            ApiError::Rejected { .. } => ErrorKind::Rejected,
            ApiError::Cancelled => ErrorKind::Cancelled,
            ApiError::Captcha(_) | ApiError::Other(_) => ErrorKind::Unexpected,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::ApiResponseError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            ApiError::NetworkError(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::ApiResponseError {
                status_code: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ApiError::Other(format!("malformed response: {err}"))
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Rate limit exceeded for {resource} (needed to wait {wait:?})")]
pub struct RateLimitExceeded {
    pub resource: String,
    pub wait: Duration,
}

// Terminal result of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    #[error("non-retryable failure: {0}")]
    Fatal(E),
}

#[derive(Error, Debug, PartialEq)]
pub enum CoordinatorError {
    #[error("concurrency cap must be at least 1")]
    InvalidConcurrencyCap,

    #[error("overall timeout must be greater than zero")]
    InvalidTimeout,
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),
}
