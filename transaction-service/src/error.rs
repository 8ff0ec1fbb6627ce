use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Transaction type with id {0} not found")]
    TransferTypeNotFound(i32),

    #[error("Transaction with id {0} not found")]
    TransactionNotFound(Uuid),

    /// A catalog row the service relies on is missing (unseeded environment)
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Message bus error: {0}")]
    Bus(#[from] message_bus::Error),

    /// Record persisted, creation event not yet published
    #[error("Transaction {transaction_id} stored but its event was not published: {reason}")]
    DualWriteFailure { transaction_id: Uuid, reason: String },

    /// Verdict for an id the store does not (yet) hold
    #[error("Verdict received for unknown transaction {0}")]
    UnknownEntityOnVerdict(Uuid),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UnknownEntityOnVerdict(_)
            | Error::Configuration(_)
            | Error::Database(_)
            | Error::DualWriteFailure { .. } => true,
            Error::Bus(e) => e.is_transient(),
            Error::TransferTypeNotFound(_)
            | Error::TransactionNotFound(_)
            | Error::Validation(_)
            | Error::Internal(_) => false,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Error::TransferTypeNotFound(_) | Error::TransactionNotFound(_) => "not_found",
            Error::Configuration(_) => "configuration_error",
            Error::Validation(_) => "validation_error",
            Error::Database(_) => "database_error",
            Error::Bus(_) => "messaging_error",
            Error::DualWriteFailure { .. } => "dual_write_failure",
            Error::UnknownEntityOnVerdict(_) => "unknown_entity",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        // Store and catalog problems are not the caller's business
        let message = match status_code {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            _ => self.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::TransferTypeNotFound(_) => StatusCode::NOT_FOUND,
            Error::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Bus(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::DualWriteFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UnknownEntityOnVerdict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
