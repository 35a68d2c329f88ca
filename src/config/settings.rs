use crate::error::{BlockchainError, Result};
use crate::wallet::WALLET_FILE;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

static DEFAULT_DATA_DIR: &str = "data";

const DATA_DIR_KEY: &str = "DATA_DIR";
const WALLET_FILE_KEY: &str = "WALLET_FILE";
const MINING_TIMEOUT_KEY: &str = "MINING_TIMEOUT_SECS";

/// Process-wide CLI settings, seeded from the environment.
pub struct Config {
    inner: RwLock<HashMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        let mut map = HashMap::new();
        map.insert(
            String::from(DATA_DIR_KEY),
            env::var(DATA_DIR_KEY).unwrap_or_else(|_| String::from(DEFAULT_DATA_DIR)),
        );
        map.insert(
            String::from(WALLET_FILE_KEY),
            env::var(WALLET_FILE_KEY).unwrap_or_else(|_| String::from(WALLET_FILE)),
        );
        if let Ok(timeout) = env::var(MINING_TIMEOUT_KEY) {
            map.insert(String::from(MINING_TIMEOUT_KEY), timeout);
        }

        Config {
            inner: RwLock::new(map),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.insert(String::from(key), value);
    }

    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(self.get(DATA_DIR_KEY).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()))
    }

    pub fn set_data_dir(&self, dir: String) {
        self.set(DATA_DIR_KEY, dir);
    }

    pub fn get_wallet_file(&self) -> PathBuf {
        PathBuf::from(self.get(WALLET_FILE_KEY).unwrap_or_else(|| WALLET_FILE.to_string()))
    }

    pub fn set_wallet_file(&self, file: String) {
        self.set(WALLET_FILE_KEY, file);
    }

    /// Mining deadline, if one is configured. A value that is not a whole number of
    /// seconds is a `Config` error.
    pub fn get_mining_timeout(&self) -> Result<Option<Duration>> {
        let Some(raw) = self.get(MINING_TIMEOUT_KEY) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| {
                BlockchainError::Config(format!("Invalid {MINING_TIMEOUT_KEY} '{raw}': {e}"))
            })
    }

    pub fn set_mining_timeout(&self, secs: u64) {
        self.set(MINING_TIMEOUT_KEY, secs.to_string());
    }
}
