use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// Wallets keyed by address, persisted as one bincode file
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Load the wallet file at `path`; a missing file yields an empty collection.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Wallets> {
        let path = path.as_ref().to_path_buf();
        let wallets = if path.exists() {
            let bytes = fs::read(&path)?;
            deserialize(&bytes).map_err(|e| {
                BlockchainError::Wallet(format!("Could not decode {}: {e}", path.display()))
            })?
        } else {
            debug!("No wallet file at {}, starting empty", path.display());
            HashMap::new()
        };
        Ok(Wallets { wallets, path })
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        if let Err(e) = self.save_to_file() {
            warn!("Could not save wallets to {}: {e}", self.path.display());
            self.wallets.remove(&address);
            return Err(e);
        }
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file: File = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wallets_persist_across_loads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);

        let mut wallets = Wallets::load_from(&path).unwrap();
        assert!(wallets.get_addresses().is_empty());
        let address = wallets.create_wallet().unwrap();

        let reloaded = Wallets::load_from(&path).unwrap();
        assert_eq!(reloaded.get_addresses(), vec![address.clone()]);
        let original = wallets.get_wallet(&address).unwrap();
        let restored = reloaded.get_wallet(&address).unwrap();
        assert_eq!(original.get_public_key(), restored.get_public_key());
        assert_eq!(original.get_pkcs8(), restored.get_pkcs8());
    }

    #[test]
    fn test_corrupt_wallet_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);
        fs::write(&path, [0xFF, 0xFF, 0xFF]).unwrap();

        assert!(matches!(
            Wallets::load_from(&path),
            Err(BlockchainError::Wallet(_))
        ));
    }
}
