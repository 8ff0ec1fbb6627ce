use async_trait::async_trait;
use message_bus::{HandlerError, Message, MessageHandler, TransactionValidated};
use std::sync::Arc;
use tracing::{error, warn};

use crate::error::Error;
use crate::service::TransactionService;

/// Applies `transaction-validated` verdicts to the store
pub struct VerdictConsumer {
    service: Arc<TransactionService>,
}

impl VerdictConsumer {
    pub fn new(service: Arc<TransactionService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for VerdictConsumer {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let event: TransactionValidated = message.decode().map_err(|e| {
            warn!(message_id = %message.id, "Undecodable verdict: {}", e);
            HandlerError::Permanent(e.to_string())
        })?;

        let id = event.transaction_external_id;
        match self.service.apply_verdict(id, event.status).await {
            Ok(_) => Ok(()),
            Err(e @ Error::UnknownEntityOnVerdict(_)) => {
                // May be a replication race rather than a genuine inconsistency
                warn!(transaction_id = %id, "{}; will retry", e);
                Err(HandlerError::Transient(e.to_string()))
            }
            Err(e @ Error::Configuration(_)) => {
                error!(transaction_id = %id, "Status catalog not seeded: {}", e);
                Err(HandlerError::Transient(e.to_string()))
            }
            Err(e) if e.is_retryable() => {
                warn!(transaction_id = %id, "Failed to apply verdict: {}", e);
                Err(HandlerError::Transient(e.to_string()))
            }
            Err(e) => {
                error!(transaction_id = %id, "Verdict cannot be applied: {}", e);
                Err(HandlerError::Permanent(e.to_string()))
            }
        }
    }
}
