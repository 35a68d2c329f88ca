// Transactions move value under the UTXO model: each input consumes one earlier output in full,
// and every output is locked to the hash of its owner's public key.

use crate::core::Blockchain;
use crate::error::{BlockchainError, Result};
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallets};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Reward minted by a coinbase transaction
pub const SUBSIDY: u64 = 50;

/// Output index carried by the single input of a coinbase transaction
const COINBASE_VOUT: i64 = -1;

/// A reference to one output of an earlier transaction, plus the proof of ownership.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature: vec![],
            pub_key: vec![],
        }
    }

    /// Attach the spender's full public key (`x || y`)
    pub fn with_pub_key(mut self, pub_key: &[u8]) -> TXInput {
        self.pub_key = pub_key.to_vec();
        self
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, or `None` for the coinbase marker
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

/// An indivisible amount locked to a public-key hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Lock `value` to the owner of `address`
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        Ok(TXOutput::new_locked(value, &address_to_pub_key_hash(address)?))
    }

    pub fn new_locked(value: u64, pub_key_hash: &[u8]) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        }
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

/// Copy of a transaction with every input's signature and public key cleared.
///
/// For input `i` the signed payload is the hash of this copy with input `i`'s public key
/// replaced by the locking hash of the output it spends.
struct TrimmedCopy {
    tx: Transaction,
}

impl TrimmedCopy {
    fn signing_digest(&mut self, input_idx: usize, locking_hash: &[u8]) -> Result<Vec<u8>> {
        self.tx.vin[input_idx].signature.clear();
        self.tx.vin[input_idx].pub_key = locking_hash.to_vec();
        let digest = self.tx.hash();
        self.tx.vin[input_idx].pub_key.clear();

        let digest = digest?;
        self.tx.id = digest.clone();
        Ok(digest)
    }
}

impl Transaction {
    /// Mint the subsidy to `to`. An empty `data` becomes `Reward to '<to>'`.
    pub fn new_coinbase_tx(to: &str, data: &str) -> Result<Transaction> {
        let narrative = if data.is_empty() {
            format!("Reward to '{to}'")
        } else {
            data.to_string()
        };
        let txout = TXOutput::new(SUBSIDY, to)?;
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: narrative.into_bytes(),
        };

        Transaction::from_parts(vec![tx_input], vec![txout])
    }

    /// Assemble a transaction from its parts; the id is the hash of the result.
    pub fn from_parts(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        let mut tx = Transaction { id: vec![], vin, vout };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Build and sign a transfer of `amount` from the wallet `from` to the address `to`.
    pub fn new_utxo_transaction(
        from: &str,
        to: &str,
        amount: u64,
        wallets: &Wallets,
        blockchain: &Blockchain,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::InvalidTransaction(
                "Amount must be positive".to_string(),
            ));
        }
        address_to_pub_key_hash(from)?;
        let to_pub_key_hash = address_to_pub_key_hash(to)?;

        let wallet = wallets.get_wallet(from).ok_or_else(|| {
            BlockchainError::Wallet(format!("Wallet not found for address: {from}"))
        })?;
        let public_key_hash = hash_pub_key(wallet.get_public_key());

        let (accumulated, valid_outputs) =
            blockchain.select_spendable_outputs(public_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::StorageCorruption(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                inputs.push(TXInput::new(&txid, out).with_pub_key(wallet.get_public_key()));
            }
        }

        let mut outputs = vec![TXOutput::new_locked(amount, &to_pub_key_hash)];
        if accumulated > amount {
            outputs.push(TXOutput::new_locked(
                accumulated - amount,
                &public_key_hash,
            ));
        }

        let mut tx = Transaction::from_parts(inputs, outputs)?;
        blockchain.sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    fn trimmed_copy(&self) -> TrimmedCopy {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        TrimmedCopy {
            tx: Transaction {
                id: self.id.clone(),
                vin: inputs,
                vout: self.vout.clone(),
            },
        }
    }

    /// Locking hashes of the outputs spent by each input, in input order.
    fn locking_hashes(&self, prev_txs: &HashMap<String, Transaction>) -> Result<Vec<Vec<u8>>> {
        self.vin
            .iter()
            .map(|vin| {
                referenced_output(prev_txs, vin).map(|out| out.get_pub_key_hash().to_vec())
            })
            .collect()
    }

    /// Sign every input with `pkcs8`. `prev_txs` maps hex txids to the transactions spent from.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &HashMap<String, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let locking_hashes = self.locking_hashes(prev_txs)?;
        let mut tx_copy = self.trimmed_copy();
        for (idx, locking_hash) in locking_hashes.iter().enumerate() {
            let digest = tx_copy.signing_digest(idx, locking_hash)?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &digest)?;
        }
        Ok(())
    }

    /// Check every input's signature; one failing input fails the transaction.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let locking_hashes = self.locking_hashes(prev_txs)?;
        let mut tx_copy = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let locking_hash = &locking_hashes[idx];
            if !vin.uses_key(locking_hash) {
                log::debug!("Input {idx} public key does not match the spent output's lock");
                return Ok(false);
            }

            let digest = tx_copy.signing_digest(idx, locking_hash)?;
            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                &digest,
            ) {
                log::debug!("Input {idx} signature does not verify");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Inputs must carry exactly the value the outputs hand out; no fees exist.
    pub fn verify_value_conservation(
        &self,
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        Ok(self.get_input_value(prev_txs)? == self.get_output_value()?)
    }

    pub fn get_input_value(&self, prev_txs: &HashMap<String, Transaction>) -> Result<u64> {
        if self.is_coinbase() {
            return Ok(0);
        }
        self.vin.iter().try_fold(0u64, |total, vin| {
            let value = referenced_output(prev_txs, vin)?.get_value();
            total
                .checked_add(value)
                .ok_or_else(|| BlockchainError::InvalidTransaction("Input value overflow".into()))
        })
    }

    pub fn get_output_value(&self) -> Result<u64> {
        self.vout.iter().try_fold(0u64, |total, out| {
            total
                .checked_add(out.get_value())
                .ok_or_else(|| BlockchainError::InvalidTransaction("Output value overflow".into()))
        })
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the canonical encoding with `id` cleared
    pub fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

fn referenced_output<'a>(
    prev_txs: &'a HashMap<String, Transaction>,
    input: &TXInput,
) -> Result<&'a TXOutput> {
    let txid_hex = HEXLOWER.encode(input.get_txid());
    let prev_tx = prev_txs
        .get(&txid_hex)
        .ok_or_else(|| BlockchainError::PreviousTransactionNotFound(txid_hex.clone()))?;
    input
        .output_index()
        .and_then(|idx| prev_tx.vout.get(idx))
        .ok_or_else(|| {
            BlockchainError::InvalidTransaction(format!(
                "Input references missing output {txid_hex}:{}",
                input.get_vout()
            ))
        })
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--Transaction {}:", HEXLOWER.encode(&self.id))?;
        for (i, input) in self.vin.iter().enumerate() {
            writeln!(f, " -Input {i}:")?;
            writeln!(f, "  TXID:      {}", HEXLOWER.encode(&input.txid))?;
            writeln!(f, "  Out:       {}", input.vout)?;
            writeln!(f, "  Signature: {}", HEXLOWER.encode(&input.signature))?;
            writeln!(f, "  PubKey:    {}", HEXLOWER.encode(&input.pub_key))?;
        }
        for (i, output) in self.vout.iter().enumerate() {
            writeln!(f, " -Output {i}:")?;
            writeln!(f, "  Value:  {}", output.value)?;
            writeln!(f, "  Script: {}", HEXLOWER.encode(&output.pub_key_hash))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    const TEST_ADDRESS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    fn prev_map(txs: &[&Transaction]) -> HashMap<String, Transaction> {
        txs.iter()
            .map(|tx| (HEXLOWER.encode(tx.get_id()), (*tx).clone()))
            .collect()
    }

    /// A signed spend of the whole coinbase output owned by `owner`.
    fn spend_coinbase(owner: &Wallet, to: &str) -> (Transaction, Transaction) {
        let coinbase = Transaction::new_coinbase_tx(&owner.get_address(), "").unwrap();
        let mut input = TXInput::new(coinbase.get_id(), 0);
        input.pub_key = owner.get_public_key().to_vec();
        let mut tx = Transaction {
            id: vec![],
            vin: vec![input],
            vout: vec![TXOutput::new(SUBSIDY, to).unwrap()],
        };
        tx.id = tx.hash().unwrap();
        tx.sign(owner.get_pkcs8(), &prev_map(&[&coinbase])).unwrap();
        (coinbase, tx)
    }

    #[test]
    fn test_coinbase_shape() {
        let tx = Transaction::new_coinbase_tx(TEST_ADDRESS, "").unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.get_vin()[0].get_vout(), -1);
        assert!(tx.get_vin()[0].get_txid().is_empty());
        assert_eq!(
            tx.get_vin()[0].get_pub_key(),
            format!("Reward to '{TEST_ADDRESS}'").as_bytes()
        );
        assert_eq!(tx.get_vout()[0].get_value(), SUBSIDY);
        assert_eq!(tx.get_id(), tx.hash().unwrap().as_slice());
    }

    #[test]
    fn test_coinbase_rejects_invalid_address() {
        assert!(matches!(
            Transaction::new_coinbase_tx("bogus", ""),
            Err(BlockchainError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_hash_ignores_id_and_is_deterministic() {
        let mut tx = Transaction::new_coinbase_tx(TEST_ADDRESS, "narrative").unwrap();
        let first = tx.hash().unwrap();
        tx.id = vec![1, 2, 3];
        assert_eq!(first, tx.hash().unwrap());
    }

    #[test]
    fn test_round_trip_preserves_inputs_and_outputs() {
        let owner = Wallet::new().unwrap();
        let (_, tx) = spend_coinbase(&owner, TEST_ADDRESS);
        let decoded = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_sign_and_verify() {
        let owner = Wallet::new().unwrap();
        let (coinbase, tx) = spend_coinbase(&owner, TEST_ADDRESS);
        let prev = prev_map(&[&coinbase]);

        assert!(tx.verify(&prev).unwrap());
        assert!(tx.verify_value_conservation(&prev).unwrap());
        assert_eq!(tx.get_input_value(&prev).unwrap(), SUBSIDY);
    }

    #[test]
    fn test_signing_leaves_id_and_pub_keys_untouched() {
        let owner = Wallet::new().unwrap();
        let (_, tx) = spend_coinbase(&owner, TEST_ADDRESS);
        assert_eq!(tx.get_id(), tx.hash_without_signatures().as_slice());
        assert_eq!(tx.get_vin()[0].get_pub_key(), owner.get_public_key());
        assert_eq!(tx.get_vin()[0].get_signature().len(), 64);
    }

    #[test]
    fn test_altered_signature_is_rejected() {
        let owner = Wallet::new().unwrap();
        let (coinbase, mut tx) = spend_coinbase(&owner, TEST_ADDRESS);
        tx.vin[0].signature[10] ^= 0x01;
        assert!(!tx.verify(&prev_map(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_altered_output_is_rejected() {
        let owner = Wallet::new().unwrap();
        let (coinbase, mut tx) = spend_coinbase(&owner, TEST_ADDRESS);
        tx.vout[0].value = SUBSIDY - 1;
        assert!(!tx.verify(&prev_map(&[&coinbase])).unwrap());
    }

    #[test]
    fn test_foreign_key_cannot_spend() {
        let owner = Wallet::new().unwrap();
        let thief = Wallet::new().unwrap();
        let coinbase = Transaction::new_coinbase_tx(&owner.get_address(), "").unwrap();

        let mut input = TXInput::new(coinbase.get_id(), 0);
        input.pub_key = thief.get_public_key().to_vec();
        let mut tx = Transaction {
            id: vec![],
            vin: vec![input],
            vout: vec![TXOutput::new(SUBSIDY, &thief.get_address()).unwrap()],
        };
        tx.id = tx.hash().unwrap();
        let prev = prev_map(&[&coinbase]);
        tx.sign(thief.get_pkcs8(), &prev).unwrap();

        assert!(!tx.verify(&prev).unwrap());
    }

    #[test]
    fn test_missing_previous_transaction() {
        let owner = Wallet::new().unwrap();
        let (_, mut tx) = spend_coinbase(&owner, TEST_ADDRESS);
        let empty = HashMap::new();

        assert!(matches!(
            tx.verify(&empty),
            Err(BlockchainError::PreviousTransactionNotFound(_))
        ));
        assert!(matches!(
            tx.sign(owner.get_pkcs8(), &empty),
            Err(BlockchainError::PreviousTransactionNotFound(_))
        ));
    }

    #[test]
    fn test_out_of_range_output_index() {
        let owner = Wallet::new().unwrap();
        let (coinbase, mut tx) = spend_coinbase(&owner, TEST_ADDRESS);
        tx.vin[0].vout = 5;
        assert!(matches!(
            tx.verify(&prev_map(&[&coinbase])),
            Err(BlockchainError::InvalidTransaction(_))
        ));
    }

    #[test]
    fn test_value_conservation_detects_inflation() {
        let owner = Wallet::new().unwrap();
        let (coinbase, mut tx) = spend_coinbase(&owner, TEST_ADDRESS);
        tx.vout.push(TXOutput::new_locked(1, &[0u8; 20]));
        assert!(!tx
            .verify_value_conservation(&prev_map(&[&coinbase]))
            .unwrap());
    }

    #[test]
    fn test_coinbase_sign_and_verify_are_no_ops() {
        let mut tx = Transaction::new_coinbase_tx(TEST_ADDRESS, "").unwrap();
        let before = tx.clone();
        tx.sign(&[], &HashMap::new()).unwrap();
        assert_eq!(tx, before);
        assert!(tx.verify(&HashMap::new()).unwrap());
    }

    #[test]
    fn test_display_lists_inputs_and_outputs() {
        let tx = Transaction::new_coinbase_tx(TEST_ADDRESS, "").unwrap();
        let text = tx.to_string();
        assert!(text.contains(" -Input 0:"));
        assert!(text.contains(" -Output 0:"));
        assert!(text.contains("Value:  50"));
    }

    #[test]
    fn test_display_ends_every_line() {
        let first = Transaction::new_coinbase_tx(TEST_ADDRESS, "first").unwrap();
        let second = Transaction::new_coinbase_tx(TEST_ADDRESS, "second").unwrap();
        let text = format!("{first}{second}");
        assert!(text.ends_with('\n'));
        assert_eq!(
            text.lines().filter(|line| line.starts_with("--Transaction ")).count(),
            2
        );
    }

    impl Transaction {
        fn hash_without_signatures(&self) -> Vec<u8> {
            let mut unsigned = self.clone();
            for input in &mut unsigned.vin {
                input.signature.clear();
            }
            unsigned.hash().unwrap()
        }
    }
}
