//! Error types for anti-fraud service

use thiserror::Error;

/// Anti-fraud error
#[derive(Debug, Error)]
pub enum Error {
    /// Event payload does not satisfy the `transaction-created` contract
    #[error("Decode error: {0}")]
    Decode(String),

    /// Message bus error
    #[error("Message bus error: {0}")]
    Bus(message_bus::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether redelivering the same message may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Decode(_) | Error::InvalidConfig(_) => false,
            Error::Bus(e) => !matches!(e, message_bus::Error::Serialization(_)),
            Error::Io(_) => true,
        }
    }
}

impl From<message_bus::Error> for Error {
    fn from(err: message_bus::Error) -> Self {
        match err {
            message_bus::Error::Decode { .. } => Error::Decode(err.to_string()),
            other => Error::Bus(other),
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use message_bus::Topic;

    #[test]
    fn test_decode_errors_are_not_retryable() {
        let err: Error = message_bus::Error::Decode {
            topic: Topic::TransactionCreated,
            reason: "missing field `value`".into(),
        }
        .into();
        assert!(matches!(err, Error::Decode(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_publish_errors_are_retryable() {
        let err: Error = message_bus::Error::Publish("broker down".into()).into();
        assert!(err.is_retryable());
    }
}
