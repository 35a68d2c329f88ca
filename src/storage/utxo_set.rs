// The UTXO index: one entry per unspent output, keyed by `txid || output index (u32 BE)`
// with the serialized output as value. Entries sharing a txid sort next to each other.

use crate::core::{Block, TXOutput};
use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use data_encoding::HEXLOWER;
use log::{debug, info};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use sled::{Batch, Tree};

const INDEX_LEN: usize = 4;

/// An unspent output together with the outpoint that identifies it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    txid: Vec<u8>,
    index: usize,
    output: TXOutput,
}

impl UnspentOutput {
    pub fn new(txid: &[u8], index: usize, output: TXOutput) -> UnspentOutput {
        UnspentOutput {
            txid: txid.to_vec(),
            index,
            output,
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_index(&self) -> usize {
        self.index
    }

    pub fn get_output(&self) -> &TXOutput {
        &self.output
    }
}

fn utxo_key(txid: &[u8], index: usize) -> Result<Vec<u8>> {
    let index = u32::try_from(index).map_err(|_| {
        BlockchainError::InvalidTransaction(format!("Output index {index} out of range"))
    })?;
    let mut key = txid.to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    Ok(key)
}

fn parse_key(key: &[u8]) -> Result<(Vec<u8>, usize)> {
    if key.len() <= INDEX_LEN {
        return Err(BlockchainError::StorageCorruption(format!(
            "UTXO key {} is too short",
            HEXLOWER.encode(key)
        )));
    }
    let (txid, index) = key.split_at(key.len() - INDEX_LEN);
    let mut index_bytes = [0u8; INDEX_LEN];
    index_bytes.copy_from_slice(index);
    Ok((txid.to_vec(), u32::from_be_bytes(index_bytes) as usize))
}

pub struct UTXOSet {
    tree: Tree,
}

impl UTXOSet {
    pub(crate) fn new(tree: Tree) -> UTXOSet {
        UTXOSet { tree }
    }

    /// Every indexed output, ordered by txid then output index
    pub fn find_all(&self) -> Result<Vec<UnspentOutput>> {
        let mut utxos = vec![];
        for item in self.tree.iter() {
            let (k, v) = item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            let (txid, index) = parse_key(k.as_ref())?;
            let output = deserialize::<TXOutput>(v.as_ref()).map_err(|e| {
                BlockchainError::StorageCorruption(format!("Failed to decode UTXO entry: {e}"))
            })?;
            utxos.push(UnspentOutput {
                txid,
                index,
                output,
            });
        }
        Ok(utxos)
    }

    pub fn find_unspent_outputs(&self, pub_key_hash: &[u8]) -> Result<Vec<UnspentOutput>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|utxo| utxo.output.is_locked_with_key(pub_key_hash))
            .collect())
    }

    pub fn is_unspent(&self, txid: &[u8], index: usize) -> Result<bool> {
        let key = utxo_key(txid, index)?;
        self.tree
            .contains_key(key)
            .map_err(|e| BlockchainError::Database(format!("Failed to read UTXO tree: {e}")))
    }

    /// Number of distinct transactions that still hold at least one unspent output
    pub fn count_transactions(&self) -> Result<usize> {
        let mut counter = 0;
        let mut last_txid: Option<Vec<u8>> = None;
        for item in self.tree.iter().keys() {
            let key = item.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            let (txid, _) = parse_key(key.as_ref())?;
            if last_txid.as_ref() != Some(&txid) {
                counter += 1;
                last_txid = Some(txid);
            }
        }
        Ok(counter)
    }

    /// Replace the whole index with `utxos` in one atomic batch.
    pub fn rebuild(&self, utxos: &[UnspentOutput]) -> Result<()> {
        let mut batch = Batch::default();
        for key in self.tree.iter().keys() {
            let key = key.map_err(|e| {
                BlockchainError::Database(format!("Failed to iterate UTXO tree: {e}"))
            })?;
            batch.remove(key);
        }
        for utxo in utxos {
            batch.insert(utxo_key(&utxo.txid, utxo.index)?, serialize(&utxo.output)?);
        }
        self.tree
            .apply_batch(batch)
            .map_err(|e| BlockchainError::Database(format!("Failed to write UTXO tree: {e}")))?;
        info!("Rebuilt UTXO index with {} outputs", utxos.len());
        Ok(())
    }
}

/// Apply `block` to the index inside a sled transaction: spent outputs are removed and
/// new outputs inserted, transaction by transaction.
///
/// Aborts with [`BlockchainError::InvalidTransaction`] when an input spends an output the
/// index does not hold, or when an output would replace an indexed one.
pub(crate) fn apply_block(
    chainstate: &TransactionalTree,
    block: &Block,
) -> ConflictableTransactionResult<(), BlockchainError> {
    for tx in block.get_transactions() {
        if !tx.is_coinbase() {
            for vin in tx.get_vin() {
                let index = vin.output_index().ok_or_else(|| {
                    ConflictableTransactionError::Abort(BlockchainError::InvalidTransaction(
                        format!("Input has negative output index {}", vin.get_vout()),
                    ))
                })?;
                let key = utxo_key(vin.get_txid(), index)
                    .map_err(ConflictableTransactionError::Abort)?;
                if chainstate.remove(key)?.is_none() {
                    return Err(ConflictableTransactionError::Abort(
                        BlockchainError::InvalidTransaction(format!(
                            "Output {}:{index} is not unspent",
                            HEXLOWER.encode(vin.get_txid())
                        )),
                    ));
                }
            }
        }

        for (index, out) in tx.get_vout().iter().enumerate() {
            let key = utxo_key(tx.get_id(), index).map_err(ConflictableTransactionError::Abort)?;
            let value = serialize(out).map_err(ConflictableTransactionError::Abort)?;
            if chainstate.insert(key, value)?.is_some() {
                return Err(ConflictableTransactionError::Abort(
                    BlockchainError::InvalidTransaction(format!(
                        "Output {}:{index} is already indexed",
                        HEXLOWER.encode(tx.get_id())
                    )),
                ));
            }
        }
    }
    debug!(
        "Indexed {} transactions of block {}",
        block.get_transactions().len(),
        HEXLOWER.encode(block.get_hash())
    );
    Ok(())
}
