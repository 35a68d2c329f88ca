//! Core blockchain functionality
//!
//! Blocks, transactions, proof-of-work and the chain engine.

pub mod block;
pub mod blockchain;
pub mod proof_of_work;
pub mod transaction;

pub use block::Block;
pub use blockchain::{Blockchain, BlockchainIterator, GENESIS_COINBASE_DATA};
pub use proof_of_work::{MiningControl, ProofOfWork, TARGET_BITS};
pub use transaction::{TXInput, TXOutput, Transaction, SUBSIDY};
