//! Error taxonomy shared by ingestion and analytics.
//!
//! A missing feed credential is NOT an error; see [`crate::feed::FeedResponse`].

use thiserror::Error;

use crate::store::StoreError;

/// Machine code for a market the analytics operation cannot handle.
pub const UNSUPPORTED_MARKET: &str = "UNSUPPORTED_MARKET";
/// Machine code for a market the feed endpoint cannot serve.
pub const INVALID_MARKET: &str = "INVALID_MARKET";

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported market '{market}' ({code})")]
    UnsupportedMarket { market: String, code: &'static str },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("odds feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("odds feed error (status {status}): {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("failed to decode odds feed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("odds feed timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coarse classification used by callers translating errors into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedMarket,
    ValidationFailure,
    UpstreamFailure,
    StoreFailure,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedMarket { .. } => ErrorKind::UnsupportedMarket,
            Error::Validation(_) => ErrorKind::ValidationFailure,
            Error::Http(_) | Error::UpstreamStatus { .. } | Error::Decode(_) | Error::Timeout(_) => {
                ErrorKind::UpstreamFailure
            }
            Error::Store(_) => ErrorKind::StoreFailure,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedMarket { code, .. } => *code,
            Error::Validation(_) => "VALIDATION_FAILED",
            Error::Timeout(_) => "UPSTREAM_TIMEOUT",
            Error::Http(_) | Error::UpstreamStatus { .. } | Error::Decode(_) => "UPSTREAM_FAILURE",
            Error::Store(_) => "STORE_FAILURE",
        }
    }

    /// True for caller mistakes (4xx-equivalent), false for server-side faults.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnsupportedMarket | ErrorKind::ValidationFailure
        )
    }

    pub(crate) fn unsupported_market(market: &str, code: &'static str) -> Self {
        Error::UnsupportedMarket {
            market: market.to_string(),
            code,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
