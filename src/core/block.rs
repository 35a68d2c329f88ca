use crate::core::{MiningControl, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_digest};
use data_encoding::HEXLOWER;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Block {
    timestamp: i64,
    transactions: Vec<Transaction>,
    pre_block_hash: Vec<u8>,
    hash: Vec<u8>,
    nonce: i64,
}

impl Block {
    /// Assemble a block on top of `pre_block_hash` and seal it with proof-of-work.
    pub fn new_block(
        pre_block_hash: &[u8],
        transactions: &[Transaction],
        control: &MiningControl,
    ) -> Result<Block> {
        if transactions.is_empty() {
            return Err(BlockchainError::InvalidTransaction(
                "Block must contain at least one transaction".to_string(),
            ));
        }

        let mut block = Block {
            timestamp: current_timestamp()?,
            transactions: transactions.to_vec(),
            pre_block_hash: pre_block_hash.to_vec(),
            hash: vec![],
            nonce: 0,
        };

        info!(
            "Starting proof-of-work for block with {} transactions",
            block.transactions.len()
        );
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block)?.mine(control)?;
        block.nonce = nonce;
        block.hash = hash;
        info!("Proof-of-work completed for block: {}", HEXLOWER.encode(&block.hash));

        Ok(block)
    }

    pub fn generate_genesis_block(coinbase: &Transaction, control: &MiningControl) -> Result<Block> {
        Block::new_block(&[], std::slice::from_ref(coinbase), control)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block> {
        deserialize::<Block>(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        self.transactions.as_slice()
    }

    pub fn get_pre_block_hash(&self) -> &[u8] {
        self.pre_block_hash.as_slice()
    }

    pub fn get_hash(&self) -> &[u8] {
        self.hash.as_slice()
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_nonce(&self) -> i64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.pre_block_hash.is_empty()
    }

    /// SHA-256 over the concatenated transaction hashes, in block order.
    ///
    /// Commits to the whole transaction set but offers no membership proofs.
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let mut txhashs = vec![];
        for transaction in &self.transactions {
            txhashs.extend(transaction.hash()?);
        }
        Ok(sha256_digest(txhashs.as_slice()))
    }
}
