// Persistence adapter over sled. Blocks live in one tree keyed by their hash, with the tip hash
// under key "l"; the UTXO index lives in a second tree and is written in the same transaction as
// every block, so the tip, the blocks and the index can never disagree.

use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::storage::utxo_set::{apply_block, UTXOSet};
use data_encoding::HEXLOWER;
use log::debug;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Transactional, Tree};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const TIP_BLOCK_HASH_KEY: &[u8] = b"l";
const BLOCKS_TREE: &str = "blocks";
const UTXO_TREE: &str = "chainstate";

/// Handle to the chain database. Clones share the same trees and writer lock.
#[derive(Clone)]
pub struct ChainStore {
    db: Db,
    blocks: Tree,
    chainstate: Tree,
    writer: Arc<Mutex<()>>,
    path: PathBuf,
}

impl ChainStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ChainStore> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)
            .map_err(|e| BlockchainError::Database(format!("Failed to open database: {e}")))?;
        let blocks = db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open blocks tree: {e}")))?;
        let chainstate = db
            .open_tree(UTXO_TREE)
            .map_err(|e| BlockchainError::Database(format!("Failed to open UTXO tree: {e}")))?;
        debug!("Opened chain store at {}", path.display());

        Ok(ChainStore {
            db,
            blocks,
            chainstate,
            writer: Arc::new(Mutex::new(())),
            path,
        })
    }

    pub fn get_path(&self) -> &Path {
        self.path.as_path()
    }

    /// Serializes chain mutations made through this store and its clones.
    pub fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_tip_hash(&self) -> Result<Option<Vec<u8>>> {
        let tip = self
            .blocks
            .get(TIP_BLOCK_HASH_KEY)
            .map_err(|e| BlockchainError::Database(format!("Failed to get tip hash: {e}")))?;
        Ok(tip.map(|hash| hash.to_vec()))
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        let Some(block_bytes) = self
            .blocks
            .get(block_hash)
            .map_err(|e| BlockchainError::Database(format!("Failed to get block: {e}")))?
        else {
            return Ok(None);
        };
        Block::deserialize(block_bytes.as_ref())
            .map(Some)
            .map_err(|e| {
                BlockchainError::StorageCorruption(format!(
                    "Block {} does not decode: {e}",
                    HEXLOWER.encode(block_hash)
                ))
            })
    }

    /// Store `genesis` as the first block unless a chain already exists.
    ///
    /// Returns the tip after the call: the genesis hash, or the existing tip untouched.
    pub fn create_genesis(&self, genesis: &Block) -> Result<Vec<u8>> {
        let block_data = genesis.serialize()?;
        let tip = (&self.blocks, &self.chainstate).transaction(
            |(blocks, chainstate)| -> ConflictableTransactionResult<Vec<u8>, BlockchainError> {
                if let Some(tip) = blocks.get(TIP_BLOCK_HASH_KEY)? {
                    return Ok(tip.to_vec());
                }
                blocks.insert(genesis.get_hash(), block_data.as_slice())?;
                blocks.insert(TIP_BLOCK_HASH_KEY, genesis.get_hash())?;
                apply_block(chainstate, genesis)?;
                Ok(genesis.get_hash().to_vec())
            },
        )?;
        self.flush()?;
        Ok(tip)
    }

    /// Persist `block`, advance the tip and update the UTXO index, all or nothing.
    ///
    /// Fails with [`BlockchainError::StaleTip`] when `block` does not extend the current tip.
    pub fn append_block(&self, block: &Block) -> Result<()> {
        let block_data = block.serialize()?;
        (&self.blocks, &self.chainstate).transaction(
            |(blocks, chainstate)| -> ConflictableTransactionResult<(), BlockchainError> {
                let tip = blocks.get(TIP_BLOCK_HASH_KEY)?;
                if tip.as_deref() != Some(block.get_pre_block_hash()) {
                    return Err(ConflictableTransactionError::Abort(BlockchainError::StaleTip));
                }
                blocks.insert(block.get_hash(), block_data.as_slice())?;
                blocks.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
                apply_block(chainstate, block)?;
                Ok(())
            },
        )?;
        self.flush()
    }

    pub fn utxo_set(&self) -> UTXOSet {
        UTXOSet::new(self.chainstate.clone())
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| BlockchainError::Database(format!("Failed to flush database: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MiningControl, Transaction};
    use tempfile::tempdir;

    const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn mined(prev: &[u8], narrative: &str) -> Block {
        let coinbase = Transaction::new_coinbase_tx(TEST_ADDRESS, narrative).unwrap();
        Block::new_block(prev, &[coinbase], &MiningControl::new()).unwrap()
    }

    #[test]
    fn test_genesis_is_written_once() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("db")).unwrap();
        assert_eq!(store.get_tip_hash().unwrap(), None);

        let genesis = mined(&[], "genesis");
        let tip = store.create_genesis(&genesis).unwrap();
        assert_eq!(tip, genesis.get_hash());

        let other = mined(&[], "second genesis");
        assert_eq!(store.create_genesis(&other).unwrap(), genesis.get_hash());
        assert_eq!(store.get_block(other.get_hash()).unwrap(), None);
        assert_eq!(store.get_block(genesis.get_hash()).unwrap(), Some(genesis));
    }

    #[test]
    fn test_append_requires_current_tip() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("db")).unwrap();
        let genesis = mined(&[], "genesis");
        store.create_genesis(&genesis).unwrap();

        let orphan = mined(&[9u8; 32], "orphan");
        assert_eq!(store.append_block(&orphan), Err(BlockchainError::StaleTip));
        assert_eq!(store.get_block(orphan.get_hash()).unwrap(), None);
        assert_eq!(
            store.get_tip_hash().unwrap().as_deref(),
            Some(genesis.get_hash())
        );

        let next = mined(genesis.get_hash(), "next");
        store.append_block(&next).unwrap();
        assert_eq!(store.get_tip_hash().unwrap().as_deref(), Some(next.get_hash()));
    }

    #[test]
    fn test_undecodable_block_is_storage_corruption() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("db")).unwrap();
        store.blocks.insert(b"bad", &[0xFF, 0x01][..]).unwrap();

        assert!(matches!(
            store.get_block(b"bad"),
            Err(BlockchainError::StorageCorruption(_))
        ));
    }
}
