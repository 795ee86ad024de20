//! Error types for the bridge tracker

use thiserror::Error;

/// Main error type for the tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure reported by the exchange service. The message is shown to
    /// the user verbatim, so it carries no prefix of its own.
    #[error("{0}")]
    Exchange(String),

    #[error("Relay error: {0}")]
    Relay(String),

    /// Server side failure of a provider service
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Chain RPC error: {0}")]
    ChainRpc(String),

    #[error("Bridge transaction {hash} not found")]
    TransactionNotFound { hash: String },

    #[error("Bridge transaction {hash} already exists")]
    DuplicateTransaction { hash: String },

    #[error("Invalid bridge transaction: {0}")]
    InvalidTransaction(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            TrackerError::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            TrackerError::ChainRpc(_)
            | TrackerError::Unavailable(_)
            | TrackerError::Database(_) => true,
            _ => false,
        }
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_message_is_verbatim() {
        let err = TrackerError::Exchange("rate expired".to_string());
        assert_eq!(err.to_string(), "rate expired");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_chain_rpc_is_retryable() {
        assert!(TrackerError::ChainRpc("timeout".into()).is_retryable());
        assert!(TrackerError::Unavailable("bad gateway".into()).is_retryable());
        assert!(!TrackerError::Relay("unknown transfer".into()).is_retryable());
        assert!(!TrackerError::TransactionNotFound { hash: "0x1".into() }.is_retryable());
    }
}
