use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinError;
use tracing::info;

use crate::block::Block;
use crate::error::MiningError;
use crate::hasher::{leading_zero_bits, sha256d_digest};

/// Width of the hash space the difficulty is expressed in.
pub const HASH_BITS: u32 = 256;

/// Floor for the elapsed time used in the hash rate.
const MIN_ELAPSED_SECS: f64 = 0.0001;

/// Cooperative cancellation flag shared between the miner and whoever
/// decides the current search is stale.
///
/// The miner consumes the signal: once observed it is cleared again.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Clears the signal, returning whether it was raised.
    #[inline]
    fn consume(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    Found(Block),
    /// Another producer won the race, partial work is discarded.
    Interrupted,
}

/// Whether `digest`, read as a 256-bit integer, is below `2^(256 - bits)`.
#[inline]
pub fn meets_target(digest: &[u8; 32], bits: u32) -> bool {
    leading_zero_bits(digest) >= bits
}

/// Hashes per second for a search that ended at `nonce`.
pub fn hash_rate(nonce: u64, elapsed_secs: f64) -> f64 {
    nonce as f64 / elapsed_secs.max(MIN_ELAPSED_SECS)
}

/// Searches nonces 0, 1, 2, ... for a header hash below the block's target.
///
/// The signal is cleared before the search starts, so a signal raised
/// earlier has no effect. It is polled after every failed attempt.
pub fn mine(block: &Block, signal: &CancelSignal) -> Result<MineOutcome, MiningError> {
    if block.bits > HASH_BITS {
        return Err(MiningError::DifficultyOutOfRange(block.bits));
    }

    let start = Instant::now();
    let mut nonce = 0;

    signal.clear();

    info!(prev = %block.prev_block_hash, bits = block.bits, "mining after block");

    while !meets_target(&sha256d_digest(block.header(nonce)), block.bits) {
        nonce += 1;

        if signal.consume() {
            info!(nonce, "mining interrupted");

            return Ok(MineOutcome::Interrupted);
        }
    }

    let block = block.with_nonce(nonce);
    let elapsed = start.elapsed().as_secs_f64();

    info!(
        nonce,
        elapsed_secs = elapsed,
        khs = hash_rate(nonce, elapsed) / 1000.0,
        id = %block.id(),
        "mining block found"
    );

    Ok(MineOutcome::Found(block))
}

/// Runs [`mine`] on the blocking thread pool.
///
/// A panic in the search is resumed on the caller.
pub async fn mine_in_background(block: Block, signal: CancelSignal) -> Result<MineOutcome, MiningError> {
    settle(tokio::task::spawn_blocking(move || mine(&block, &signal)).await)
}

fn settle(joined: Result<Result<MineOutcome, MiningError>, JoinError>) -> Result<MineOutcome, MiningError> {
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),

        // Task dropped with the runtime.
        Err(_) => Ok(MineOutcome::Interrupted),
    }
}
