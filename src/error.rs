//! Error types for the reward distributor

use alloy_primitives::{Address, U256};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, DistributorError>;

/// Main error type for the library
#[derive(Debug, Error)]
pub enum DistributorError {
    /// An endpoint could not be dialed at startup
    #[error("Connection error: endpoint {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    /// A single endpoint failed an RPC operation
    #[error("RPC error: {operation} on {endpoint}: {message}")]
    Rpc {
        endpoint: String,
        operation: &'static str,
        message: String,
    },

    /// The gateway has no live endpoint (never dialed or already closed)
    #[error("No RPC endpoint available")]
    NoEndpoints,

    /// The shared cancellation token fired while waiting
    #[error("Operation cancelled")]
    Cancelled,

    /// Calldata encoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Return data decoding error
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Keystore could not be read or decrypted
    #[error("Keystore decryption error: {0}")]
    Decryption(String),

    /// The declared sender differs from the keystore address
    #[error("Sender mismatch: declared {expected}, keystore {actual}")]
    IdentityMismatch { expected: Address, actual: Address },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reward batch failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Title line of the reward list is malformed
    #[error("Title line error: {0}")]
    TitleLine(String),

    /// Reward classification of the run and of the input file differ
    #[error("Reward classification mismatch: configured {configured}, input file {from_file}")]
    ClassificationMismatch { configured: String, from_file: String },

    /// Sender cannot cover the batch
    #[error("Insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: U256, required: U256 },

    /// Signing error
    #[error("Signature error: {0}")]
    Signing(String),

    /// A transfer could not be built, signed or sent
    #[error("Transfer to {account} failed at {stage}: {source}")]
    Submission {
        account: Address,
        stage: &'static str,
        #[source]
        source: Box<DistributorError>,
    },

    /// The batch stopped on its first failed transfer
    #[error("Batch aborted at {account}: {sent} of {total} rewards sent ({sent_amount} of {total_amount}): {source}")]
    BatchAborted {
        account: Address,
        sent: usize,
        total: usize,
        sent_amount: U256,
        total_amount: U256,
        #[source]
        source: Box<DistributorError>,
    },

    /// Persistence collaborator error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DistributorError {
    /// Wraps an error with the account and pipeline stage it happened at
    pub fn at_stage(self, account: Address, stage: &'static str) -> Self {
        DistributorError::Submission {
            account,
            stage,
            source: Box::new(self),
        }
    }
}

impl From<config::ConfigError> for DistributorError {
    fn from(e: config::ConfigError) -> Self {
        DistributorError::Config(e.to_string())
    }
}
