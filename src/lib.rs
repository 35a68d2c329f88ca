//! # utxo-chain
//!
//! A small single-node cryptocurrency ledger: proof-of-work blocks chained by hash, value held
//! in unspent transaction outputs, and spends authorized with ECDSA P-256 signatures.
//!
//! ## Layout
//! - `core/`: blocks, transactions, proof-of-work and the chain engine
//! - `storage/`: the sled-backed block store and UTXO index
//! - `wallet/`: key pairs, addresses and the wallet file
//! - `utils/`: hashing, signing, base58 and bincode helpers
//! - `config/`: settings for the command-line tool
//! - `cli/`: argument parsing
//!
//! The engine takes its store explicitly; nothing below `cli` reads global state.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;
pub mod utils;
pub mod wallet;

pub use cli::{Command, Opt};
pub use config::{Config, GLOBAL_CONFIG};
pub use core::{
    Block, Blockchain, BlockchainIterator, MiningControl, ProofOfWork, TXInput, TXOutput,
    Transaction, GENESIS_COINBASE_DATA, SUBSIDY, TARGET_BITS,
};
pub use error::{BlockchainError, Result};
pub use storage::{ChainStore, UTXOSet, UnspentOutput};
pub use wallet::{
    address_to_pub_key_hash, convert_address, hash_pub_key, validate_address, Wallet, Wallets,
    ADDRESS_CHECK_SUM_LEN,
};
