//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tally_core::BlockError;
use tally_ledger::{AppendError, LedgerError, UsageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Candidate block was refused by the ledger.
    #[error(transparent)]
    Rejected(#[from] AppendError),

    /// Request body is not a wire-format block.
    #[error("malformed block: {0}")]
    BadBlock(String),

    #[error("invalid input: {0}")]
    BadRequest(String),

    /// Requested value was refused against the current usage table.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Lost every append race; the caller may try again.
    #[error("{0}")]
    Contended(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Append(e) => Self::Rejected(e),
            LedgerError::Usage(e) => Self::Usage(e),
            LedgerError::Block(
                e @ (BlockError::EmptySubject
                | BlockError::EmptyAuthor
                | BlockError::NonIncreasing { .. }),
            ) => Self::BadRequest(e.to_string()),
            e @ LedgerError::RetriesExhausted { .. } => Self::Contended(e.to_string()),
            e => Self::Internal(e.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rejected(AppendError::StaleTip { .. }) => StatusCode::CONFLICT,
            Self::Rejected(AppendError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Rejected(_) | Self::BadBlock(_) | Self::BadRequest(_) | Self::Usage(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Contended(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Rejected(err) => err.is_retryable(),
            Self::Contended(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.to_string(),
            "retryable": self.retryable(),
        });
        (self.status(), Json(body)).into_response()
    }
}
