// src/miner/algorithm/randomx.rs
//! RandomX algorithm implementation
//!
//! The dataset ([`rust_randomx::Context`]) is the memory-intensive part and
//! is built once, then shared behind an `Arc`. Every scratch context is a
//! separate [`Hasher`] (a RandomX VM) bound to that dataset, so callers
//! never contend on a VM.

use crate::miner::algorithm::{HashFunction, InputBuffer, to_digest};
use crate::miner::job::Digest;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use rust_randomx::{Context, Hasher};
use std::sync::Arc;

/// Length of the RandomX key (seed hash)
pub const KEY_LEN: usize = 32;

/// RandomX algorithm implementation
pub struct RandomX {
    /// Shared RandomX dataset
    context: Arc<Context>,
}

/// One RandomX VM plus its input buffer
pub struct RandomXScratch {
    hasher: Hasher,
    input: InputBuffer,
}

impl RandomX {
    /// Builds the RandomX dataset for `key`
    ///
    /// # Performance Notes
    /// - Initialization is expensive (dataset generation takes several seconds)
    /// - Fast mode requires ~2080MB RAM vs ~256MB in light mode
    pub fn new(fast: bool, key: &[u8]) -> Result<Self, MinerError> {
        if key.len() != KEY_LEN {
            return Err(MinerError::AlgorithmError(format!(
                "RandomX key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        log::info!(
            "Initializing RandomX dataset ({} mode)",
            if fast { "fast" } else { "light" }
        );
        Ok(Self {
            context: Arc::new(Context::new(key, fast)),
        })
    }
}

impl HashFunction for RandomX {
    type Context = RandomXScratch;

    fn new_scratch_context(&self) -> Result<Self::Context, MinerError> {
        Ok(RandomXScratch {
            hasher: Hasher::new(Arc::clone(&self.context)),
            input: InputBuffer::default(),
        })
    }

    fn hash(
        &self,
        blob: &[u8],
        nonce: u32,
        ctx: &mut Self::Context,
    ) -> Result<Digest, MinerError> {
        let data = ctx.input.load(blob, nonce)?;
        let output = ctx.hasher.hash(data);
        to_digest(output.as_ref())
    }

    fn algorithm_type(&self) -> AlgorithmType {
        AlgorithmType::RandomX
    }
}
