use crate::core::Block;
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use num_bigint::{BigInt, Sign};
use std::ops::ShlAssign;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Required leading zero bits of a block hash. Changing it invalidates every mined block.
pub const TARGET_BITS: u32 = 15;

const MAX_NONCE: i64 = i64::MAX;

/// How many nonces are tried between deadline checks
const DEADLINE_CHECK_INTERVAL: i64 = 4096;

/// Stop signal and optional deadline for a mining run.
///
/// Clones share the stop flag, so a handle kept by another thread can cancel a search
/// that is blocking the caller.
#[derive(Debug, Clone, Default)]
pub struct MiningControl {
    stop: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl MiningControl {
    pub fn new() -> MiningControl {
        MiningControl::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> MiningControl {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.stop.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigInt,
    tx_digest: Vec<u8>,
    max_nonce: i64,
}

impl<'a> ProofOfWork<'a> {
    pub fn new_proof_of_work(block: &'a Block) -> Result<ProofOfWork<'a>> {
        let mut target = BigInt::from(1);
        target.shl_assign(256 - TARGET_BITS);
        Ok(ProofOfWork {
            block,
            target,
            tx_digest: block.hash_transactions()?,
            max_nonce: MAX_NONCE,
        })
    }

    /// Search only nonces below `limit`
    pub fn with_nonce_limit(mut self, limit: i64) -> ProofOfWork<'a> {
        self.max_nonce = limit;
        self
    }

    pub fn get_target(&self) -> &BigInt {
        &self.target
    }

    /// Recompute the hash from the stored nonce; it must match the stored hash and the target.
    pub fn validate(block: &Block) -> bool {
        let pow = match ProofOfWork::new_proof_of_work(block) {
            Ok(pow) => pow,
            Err(e) => {
                warn!("Could not prepare proof-of-work for validation: {e}");
                return false;
            }
        };
        let hash = sha256_digest(pow.prepare_data(block.get_nonce()).as_slice());
        hash.as_slice() == block.get_hash() && pow.meets_target(&hash)
    }

    /// `prevBlockHash || txDigest || timestamp || TARGET_BITS || nonce`, numbers in decimal
    pub fn prepare_data(&self, nonce: i64) -> Vec<u8> {
        let mut data_bytes = vec![];
        data_bytes.extend(self.block.get_pre_block_hash());
        data_bytes.extend(self.tx_digest.as_slice());
        data_bytes.extend(self.block.get_timestamp().to_string().as_bytes());
        data_bytes.extend(TARGET_BITS.to_string().as_bytes());
        data_bytes.extend(nonce.to_string().as_bytes());
        data_bytes
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigInt::from_bytes_be(Sign::Plus, hash) < self.target
    }

    /// Run the nonce search on a dedicated worker thread and wait for its outcome.
    pub fn mine(&self, control: &MiningControl) -> Result<(i64, Vec<u8>)> {
        thread::scope(|scope| {
            let worker = thread::Builder::new()
                .name("pow-miner".to_string())
                .spawn_scoped(scope, || self.run(control))?;
            worker
                .join()
                .map_err(|_| BlockchainError::Mining("mining worker panicked".to_string()))?
        })
    }

    /// Try nonces from zero until one meets the target, the control stops the search,
    /// or the nonce range runs out.
    pub fn run(&self, control: &MiningControl) -> Result<(i64, Vec<u8>)> {
        let started = Instant::now();
        let deadline = control.get_timeout().map(|timeout| started + timeout);
        let mut nonce = 0;

        debug!("Mining with target of {TARGET_BITS} leading zero bits");
        while nonce < self.max_nonce {
            if control.is_cancelled() {
                return Err(BlockchainError::MiningCancelled);
            }
            if nonce % DEADLINE_CHECK_INTERVAL == 0 {
                if let Some(deadline) = deadline {
                    if Instant::now() >= deadline {
                        return Err(BlockchainError::MiningTimedOut);
                    }
                }
            }

            let hash = sha256_digest(self.prepare_data(nonce).as_slice());
            if self.meets_target(&hash) {
                info!(
                    "Found nonce {nonce} in {:?}: {}",
                    started.elapsed(),
                    HEXLOWER.encode(hash.as_slice())
                );
                return Ok((nonce, hash));
            }
            nonce += 1;
        }
        Err(BlockchainError::MiningExhausted)
    }
}
