use rouille::Response;
use serde::Serialize;

use crate::{ledger::error::LedgerError, pin::PinError, storage::error::StorageError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthenticated(String),
    Forbidden(String),
    Locked(String),
    TooManyRequests(String),
    /// seller payment failed, nothing changed, safe to retry
    TransferFailed(String),
    /// seller paid, royalty not, needs the royalty leg completed
    PartiallySettled(String),
    Unavailable(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'a str,
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let msg = err.to_string();
        match err {
            LedgerError::NotFound(_) => ApiError::NotFound(msg),
            LedgerError::Unauthorized { .. } => ApiError::Forbidden(msg),
            LedgerError::InvalidInput(_) => ApiError::BadRequest(msg),
            LedgerError::Locked(_) => ApiError::Locked(msg),
            LedgerError::ExternalTransferFailed(_) => ApiError::TransferFailed(msg),
            LedgerError::RoyaltyTransferFailed { .. } => ApiError::PartiallySettled(msg),
            LedgerError::AllocatorExhausted | LedgerError::Halted | LedgerError::Draining => {
                ApiError::Unavailable(msg)
            }
            LedgerError::SchemaMismatch { .. } => ApiError::Internal(msg),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        log::error!("storage failure: {err}");
        ApiError::Internal("internal server error".into())
    }
}

impl From<PinError> for ApiError {
    fn from(err: PinError) -> Self {
        match err {
            PinError::Empty => ApiError::BadRequest(err.to_string()),
            PinError::Fs(_) => {
                log::error!("pinning failure: {err}");
                ApiError::Internal("internal server error".into())
            }
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthenticated(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::Locked(_) => 409,
            ApiError::TooManyRequests(_) => 429,
            ApiError::TransferFailed(_) | ApiError::PartiallySettled(_) => 502,
            ApiError::Unavailable(_) => 503,
            ApiError::Internal(_) => 500,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "invalid_input",
            ApiError::Unauthenticated(_) => "unauthenticated",
            ApiError::Forbidden(_) => "unauthorized",
            ApiError::Locked(_) => "locked",
            ApiError::TooManyRequests(_) => "rate_limited",
            ApiError::TransferFailed(_) => "external_transfer_failed",
            ApiError::PartiallySettled(_) => "royalty_transfer_failed",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Internal(_) => "internal",
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Unauthenticated(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Locked(msg)
            | ApiError::TooManyRequests(msg)
            | ApiError::TransferFailed(msg)
            | ApiError::PartiallySettled(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg,
        }
    }

    pub fn into_response(self) -> Response {
        Response::json(&ErrorBody {
            error: self.kind(),
            message: self.message(),
        })
        .with_status_code(self.status_code())
    }
}
