//! Data storage and persistence
//!
//! Blocks, the chain tip and the UTXO index, all kept in one sled database.

pub mod kv_store;
pub mod utxo_set;

pub use kv_store::{ChainStore, TIP_BLOCK_HASH_KEY};
pub use utxo_set::{UTXOSet, UnspentOutput};
