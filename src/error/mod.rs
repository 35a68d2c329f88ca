//! Error handling for the ledger
//!
//! Every fallible operation in the crate returns [`Result`], carrying a [`BlockchainError`].

use sled::transaction::TransactionError;
use std::fmt;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

/// Error kinds surfaced by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Address failed base58 decoding or checksum validation
    InvalidAddress(String),
    /// Spendable outputs do not cover the requested amount
    InsufficientFunds { required: u64, available: u64 },
    /// An input references a transaction that is not on the chain
    PreviousTransactionNotFound(String),
    /// Lookup miss; callers probing the chain treat this as a normal outcome
    TransactionNotFound(String),
    /// A transaction failed verification while being mined
    InvalidTransaction(String),
    /// A persisted block or index entry could not be decoded
    StorageCorruption(String),
    /// The whole nonce range was searched without meeting the target
    MiningExhausted,
    /// Mining was stopped through its control handle
    MiningCancelled,
    /// Mining ran past its deadline
    MiningTimedOut,
    /// The mining worker failed outside the search itself
    Mining(String),
    /// The tip moved between building a block and committing it
    StaleTip,
    /// Database-related errors
    Database(String),
    /// Cryptographic operation errors
    Crypto(String),
    /// Serialization/deserialization errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Wallet operation errors
    Wallet(String),
    /// Configuration errors
    Config(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::PreviousTransactionNotFound(txid) => {
                write!(f, "Previous transaction not found: {txid}")
            }
            BlockchainError::TransactionNotFound(txid) => {
                write!(f, "Transaction not found: {txid}")
            }
            BlockchainError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {msg}"),
            BlockchainError::StorageCorruption(msg) => write!(f, "Storage corruption: {msg}"),
            BlockchainError::MiningExhausted => {
                write!(f, "Mining error: nonce space exhausted without meeting target")
            }
            BlockchainError::MiningCancelled => write!(f, "Mining error: cancelled"),
            BlockchainError::MiningTimedOut => write!(f, "Mining error: timed out"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::StaleTip => {
                write!(f, "Chain tip moved while the block was being mined")
            }
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: TransactionError<BlockchainError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => BlockchainError::Database(e.to_string()),
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}
