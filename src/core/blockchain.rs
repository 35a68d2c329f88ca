// The chain engine: bootstraps genesis, validates and mines new blocks on the tip, and answers
// UTXO queries. Blocks and the UTXO index live in a ChainStore handed in by the caller.

use crate::core::{Block, MiningControl, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{ChainStore, UnspentOutput};
use data_encoding::HEXLOWER;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Coinbase narrative of the genesis block
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

#[derive(Clone)]
pub struct Blockchain {
    tip_hash: Arc<RwLock<Vec<u8>>>,
    store: ChainStore,
    control: MiningControl,
}

impl Blockchain {
    /// Open the chain in `store`, mining a genesis block paid to `seed_address` if the store
    /// is empty. An existing chain is loaded as-is and `seed_address` is ignored.
    pub fn open(store: ChainStore, seed_address: &str) -> Result<Blockchain> {
        Self::open_with_control(store, seed_address, MiningControl::new())
    }

    pub fn open_with_control(
        store: ChainStore,
        seed_address: &str,
        control: MiningControl,
    ) -> Result<Blockchain> {
        let tip_hash = {
            let _writer = store.write_lock();
            match store.get_tip_hash()? {
                Some(tip) => {
                    debug!("Found existing chain at {}", store.get_path().display());
                    tip
                }
                None => {
                    info!("Creating genesis block for address: {seed_address}");
                    let coinbase_tx =
                        Transaction::new_coinbase_tx(seed_address, GENESIS_COINBASE_DATA)?;
                    let genesis = Block::generate_genesis_block(&coinbase_tx, &control)?;
                    store.create_genesis(&genesis)?
                }
            }
        };

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            store,
            control,
        })
    }

    /// Open an existing chain; fails when the store holds none.
    pub fn load(store: ChainStore) -> Result<Blockchain> {
        let tip_hash = store.get_tip_hash()?.ok_or_else(|| {
            BlockchainError::Database("No existing blockchain found. Create one first.".to_string())
        })?;

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            store,
            control: MiningControl::new(),
        })
    }

    pub fn with_mining_control(mut self, control: MiningControl) -> Blockchain {
        self.control = control;
        self
    }

    pub fn get_mining_control(&self) -> &MiningControl {
        &self.control
    }

    pub fn get_store(&self) -> &ChainStore {
        &self.store
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self.tip_hash.write().unwrap_or_else(PoisonError::into_inner);
        *tip_hash = new_tip_hash.to_vec();
    }

    /// Validate `transactions`, seal them into a block on the current tip and persist it.
    ///
    /// Nothing is written when validation or mining fails.
    pub fn mine_block(&self, transactions: &[Transaction]) -> Result<Block> {
        let _writer = self.store.write_lock();
        let tip = self.store.get_tip_hash()?.ok_or_else(|| {
            BlockchainError::StorageCorruption("Chain has no tip block".to_string())
        })?;
        self.set_tip_hash(&tip);

        self.validate_transactions(transactions)?;

        info!(
            "Mining block on {} with {} transactions",
            HEXLOWER.encode(&tip),
            transactions.len()
        );
        let block = Block::new_block(&tip, transactions, &self.control)?;
        self.store.append_block(&block)?;
        self.set_tip_hash(block.get_hash());
        info!("Successfully mined block: {}", HEXLOWER.encode(block.get_hash()));

        Ok(block)
    }

    fn validate_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        self.validate_ids(transactions)?;

        let utxo_set = self.store.utxo_set();
        let mut spent_in_block: HashSet<(Vec<u8>, usize)> = HashSet::new();

        for (i, transaction) in transactions.iter().enumerate() {
            if transaction.is_coinbase() {
                continue;
            }
            let txid_hex = HEXLOWER.encode(transaction.get_id());
            let prev_txs = self.previous_transactions(transaction)?;

            if !transaction.verify(&prev_txs)? {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Invalid signature in transaction {i} ({txid_hex})"
                )));
            }
            if !transaction.verify_value_conservation(&prev_txs)? {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Inputs and outputs of transaction {txid_hex} do not balance"
                )));
            }

            for input in transaction.get_vin() {
                let index = input.output_index().ok_or_else(|| {
                    BlockchainError::InvalidTransaction(format!(
                        "Negative output index in transaction {txid_hex}"
                    ))
                })?;
                let outpoint = format!("{}:{index}", HEXLOWER.encode(input.get_txid()));
                if !spent_in_block.insert((input.get_txid().to_vec(), index)) {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Output {outpoint} spent twice in one block"
                    )));
                }
                if !utxo_set.is_unspent(input.get_txid(), index)? {
                    return Err(BlockchainError::InvalidTransaction(format!(
                        "Output {outpoint} is already spent"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every id must be the hash of its transaction and must not already be on the chain or
    /// earlier in the same block.
    fn validate_ids(&self, transactions: &[Transaction]) -> Result<()> {
        let mut block_ids: HashSet<&[u8]> = HashSet::new();
        for transaction in transactions {
            let txid_hex = HEXLOWER.encode(transaction.get_id());
            if transaction.get_id() != transaction.hash()?.as_slice() {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction id {txid_hex} does not match its contents"
                )));
            }
            if !block_ids.insert(transaction.get_id()) {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {txid_hex} appears twice in one block"
                )));
            }
        }

        for block in self.iterator() {
            let block = block?;
            if let Some(tx) = block
                .get_transactions()
                .iter()
                .find(|tx| block_ids.contains(tx.get_id()))
            {
                return Err(BlockchainError::InvalidTransaction(format!(
                    "Transaction {} is already on the chain",
                    HEXLOWER.encode(tx.get_id())
                )));
            }
        }
        Ok(())
    }

    pub fn sign_transaction(&self, transaction: &mut Transaction, pkcs8: &[u8]) -> Result<()> {
        let prev_txs = self.previous_transactions(transaction)?;
        transaction.sign(pkcs8, &prev_txs)
    }

    pub fn verify_transaction(&self, transaction: &Transaction) -> Result<bool> {
        if transaction.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.previous_transactions(transaction)?;
        transaction.verify(&prev_txs)
    }

    /// The transactions spent from by `transaction`, keyed by hex txid, found in one scan.
    pub fn previous_transactions(
        &self,
        transaction: &Transaction,
    ) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        if transaction.is_coinbase() {
            return Ok(prev_txs);
        }

        let mut wanted: HashSet<Vec<u8>> = transaction
            .get_vin()
            .iter()
            .map(|vin| vin.get_txid().to_vec())
            .collect();
        for block in self.iterator() {
            let block = block?;
            for tx in block.get_transactions() {
                if wanted.remove(tx.get_id()) {
                    prev_txs.insert(HEXLOWER.encode(tx.get_id()), tx.clone());
                }
            }
            if wanted.is_empty() {
                return Ok(prev_txs);
            }
        }

        let missing = wanted
            .iter()
            .next()
            .map(|txid| HEXLOWER.encode(txid))
            .unwrap_or_default();
        Err(BlockchainError::PreviousTransactionNotFound(missing))
    }

    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator::new(self.get_tip_hash(), self.store.clone())
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Transaction> {
        for block in self.iterator() {
            let block = block?;
            if let Some(tx) = block
                .get_transactions()
                .iter()
                .find(|tx| tx.get_id() == txid)
            {
                return Ok(tx.clone());
            }
        }
        Err(BlockchainError::TransactionNotFound(HEXLOWER.encode(txid)))
    }

    /// Every unspent output on the chain, found by walking it from tip to genesis.
    ///
    /// Inputs of a block are recorded before its outputs are examined, so an output consumed
    /// later in the same block is still seen as spent.
    pub fn scan_utxo(&self) -> Result<Vec<UnspentOutput>> {
        let mut spent: HashMap<Vec<u8>, HashSet<usize>> = HashMap::new();
        let mut utxos = vec![];

        for block in self.iterator() {
            let block = block?;
            for tx in block.get_transactions().iter().filter(|tx| !tx.is_coinbase()) {
                for vin in tx.get_vin() {
                    if let Some(index) = vin.output_index() {
                        spent.entry(vin.get_txid().to_vec()).or_default().insert(index);
                    }
                }
            }

            for tx in block.get_transactions() {
                let consumed = spent.get(tx.get_id());
                for (index, out) in tx.get_vout().iter().enumerate() {
                    if consumed.is_some_and(|indices| indices.contains(&index)) {
                        continue;
                    }
                    utxos.push(UnspentOutput::new(tx.get_id(), index, out.clone()));
                }
            }
        }
        Ok(utxos)
    }

    /// Outputs owned by `pub_key_hash` that no input consumes, by full chain scan.
    pub fn find_unspent_outputs_owned(&self, pub_key_hash: &[u8]) -> Result<Vec<UnspentOutput>> {
        Ok(self
            .scan_utxo()?
            .into_iter()
            .filter(|utxo| utxo.get_output().is_locked_with_key(pub_key_hash))
            .collect())
    }

    /// Outputs owned by `pub_key_hash`, read from the UTXO index.
    pub fn find_unspent_outputs(&self, pub_key_hash: &[u8]) -> Result<Vec<UnspentOutput>> {
        self.store.utxo_set().find_unspent_outputs(pub_key_hash)
    }

    /// Pick owned outputs in index order until they cover `amount`.
    ///
    /// Returns the accumulated value, which is below `amount` when the owner cannot pay,
    /// and the chosen output indices per hex txid.
    pub fn select_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let mut accumulated = 0u64;
        let mut selected: BTreeMap<String, Vec<usize>> = BTreeMap::new();

        for utxo in self.find_unspent_outputs(pub_key_hash)? {
            if accumulated >= amount {
                break;
            }
            accumulated = accumulated.saturating_add(utxo.get_output().get_value());
            selected
                .entry(HEXLOWER.encode(utxo.get_txid()))
                .or_default()
                .push(utxo.get_index());
        }
        Ok((accumulated, selected))
    }

    pub fn balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        self.find_unspent_outputs(pub_key_hash)?
            .iter()
            .try_fold(0u64, |total, utxo| {
                total.checked_add(utxo.get_output().get_value()).ok_or_else(|| {
                    BlockchainError::StorageCorruption("Balance overflows u64".to_string())
                })
            })
    }

    /// Rebuild the UTXO index from a full chain scan.
    ///
    /// Returns the number of transactions that still hold unspent outputs.
    pub fn reindex_utxo(&self) -> Result<usize> {
        let _writer = self.store.write_lock();
        let utxos = self.scan_utxo()?;
        let utxo_set = self.store.utxo_set();
        utxo_set.rebuild(&utxos)?;
        utxo_set.count_transactions()
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        self.store.get_block(block_hash)
    }

    /// Block hashes from tip to genesis
    pub fn block_hashes(&self) -> Result<Vec<Vec<u8>>> {
        self.iterator()
            .map(|block| block.map(|block| block.get_hash().to_vec()))
            .collect()
    }
}

/// Walks the chain from a pinned tip back to genesis.
///
/// A block that is missing or does not decode ends the walk with an error.
pub struct BlockchainIterator {
    store: ChainStore,
    tip_hash: Vec<u8>,
    current_hash: Option<Vec<u8>>,
}

impl BlockchainIterator {
    fn new(tip_hash: Vec<u8>, store: ChainStore) -> BlockchainIterator {
        BlockchainIterator {
            store,
            current_hash: Some(tip_hash.clone()),
            tip_hash,
        }
    }

    /// Start over from the tip this iterator was created with.
    pub fn restart(&mut self) {
        self.current_hash = Some(self.tip_hash.clone());
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;
        match self.store.get_block(&hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.current_hash = Some(block.get_pre_block_hash().to_vec());
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(BlockchainError::StorageCorruption(format!(
                "Block {} is missing",
                HEXLOWER.encode(&hash)
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}
