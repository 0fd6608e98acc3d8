//! Error types for the Zero keeper

use ethers::types::Address;
use thiserror::Error;

/// Main error type for the keeper
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error on {queue}: {message}")]
    Queue { queue: String, message: String },

    #[error("Malformed payload in {queue}: {message}")]
    MalformedPayload { queue: String, message: String },

    #[error("Invalid transfer request: {0}")]
    InvalidRequest(String),

    #[error("No controller found: {contract:?}")]
    UnknownController { contract: Address },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("UTXO lookup failed: {0}")]
    UtxoLookup(String),

    #[error("Signing network error: {0}")]
    SigningNetwork(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Insufficient balance on chain {chain_id}: have {have}, need {need}")]
    InsufficientBalance {
        chain_id: u64,
        have: String,
        need: String,
    },

    #[error("Rate limited on chain {chain_id}")]
    RateLimited { chain_id: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::Database(_)
                | RelayerError::Queue { .. }
                | RelayerError::UtxoLookup(_)
                | RelayerError::SigningNetwork(_)
                | RelayerError::ChainConnection { .. }
                | RelayerError::Transaction(_)
                | RelayerError::Nonce { .. }
                | RelayerError::GasEstimation(_)
                | RelayerError::Timeout { .. }
                | RelayerError::RateLimited { .. }
        )
    }

    /// Errors that will fail the same way no matter how often the item is retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RelayerError::MalformedPayload { .. }
                | RelayerError::InvalidRequest(_)
                | RelayerError::UnknownController { .. }
                | RelayerError::Encoding(_)
                | RelayerError::ChainNotFound { .. }
                | RelayerError::InsufficientBalance { .. }
                | RelayerError::Contract(_)
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::InsufficientBalance { .. } | RelayerError::Wallet(_)
        )
    }

    pub(crate) fn malformed(queue: &str, err: impl std::fmt::Display) -> Self {
        RelayerError::MalformedPayload {
            queue: queue.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type for keeper operations
pub type RelayerResult<T> = Result<T, RelayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_is_disjoint() {
        let transient = RelayerError::UtxoLookup("503".to_string());
        assert!(transient.is_retryable());
        assert!(!transient.is_permanent());

        let permanent = RelayerError::UnknownController {
            contract: Address::zero(),
        };
        assert!(permanent.is_permanent());
        assert!(!permanent.is_retryable());

        let funds = RelayerError::InsufficientBalance {
            chain_id: 137,
            have: "0".to_string(),
            need: "1".to_string(),
        };
        assert!(funds.is_permanent());
        assert!(funds.should_alert());
    }
}
