// meridian/core/api/src/types/error.rs

use jsonrpc_core::{Error, ErrorCode};
use meridian_sequencer::{CoordinatorError, MempoolError};
use thiserror::Error;

/// Server-defined JSON-RPC error codes
pub const BUNDLE_REJECTED: i64 = -32010;
pub const TRANSACTION_REJECTED: i64 = -32011;
pub const MINER_CLOSED: i64 = -32012;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidParams(String),

    #[error("bundle rejected: {0}")]
    BundleRejected(String),

    #[error("transaction rejected: {0}")]
    TransactionRejected(#[from] MempoolError),

    #[error("miner is closed")]
    MinerClosed,

    #[error("miner error: {0}")]
    Miner(String),
}

impl ApiError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ApiError::InvalidParams(msg.into())
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::Rejected(reason) => ApiError::BundleRejected(reason.to_string()),
            CoordinatorError::Closed => ApiError::MinerClosed,
            other => ApiError::Miner(other.to_string()),
        }
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        let code = match &e {
            ApiError::InvalidParams(_) => ErrorCode::InvalidParams,
            ApiError::BundleRejected(_) => ErrorCode::ServerError(BUNDLE_REJECTED),
            ApiError::TransactionRejected(_) => ErrorCode::ServerError(TRANSACTION_REJECTED),
            ApiError::MinerClosed => ErrorCode::ServerError(MINER_CLOSED),
            ApiError::Miner(_) => ErrorCode::InternalError,
        };
        Error {
            code,
            message: e.to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_sequencer::RejectReason;

    #[test]
    fn test_rejection_keeps_reason() {
        let err: Error = ApiError::from(CoordinatorError::Rejected(RejectReason::EmptyBundle)).into();
        assert_eq!(err.code, ErrorCode::ServerError(BUNDLE_REJECTED));
        assert_eq!(err.message, "bundle rejected: bundle has no transactions");
    }

    #[test]
    fn test_invalid_params_code() {
        let err: Error = ApiError::invalid("bad hash").into();
        assert_eq!(err.code, ErrorCode::InvalidParams);
    }
}
