// src/miner/algorithm/mod.rs
//! Mining algorithm implementations
//!
//! Every algorithm is exposed through [`HashFunction`]: a stateless hash
//! that borrows a caller-owned scratch context. Contexts are expensive to
//! build and serve one caller at a time, so each CPU device and the
//! result verifier own exactly one each.

/// RandomX algorithm implementation
///
/// The dataset is built once per key and shared; each scratch context is a
/// VM bound to it.
pub mod randomx;

/// CryptoNight algorithm implementations (V7 and R)
pub mod cryptonight;

use crate::miner::job::{Digest, Job};
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;

pub use self::cryptonight::CryptoNightAlgo;
pub use self::randomx::RandomX;

/// Common interface for all mining algorithms
pub trait HashFunction: Send + Sync + 'static {
    /// Per-caller working memory
    type Context: Send;

    /// Allocates a scratch context
    ///
    /// Expensive; callers create one up front and reuse it for every hash.
    fn new_scratch_context(&self) -> Result<Self::Context, MinerError>;

    /// Hashes `blob` with `nonce` written at the nonce offset
    fn hash(&self, blob: &[u8], nonce: u32, ctx: &mut Self::Context)
    -> Result<Digest, MinerError>;

    /// The algorithm variant being computed
    fn algorithm_type(&self) -> AlgorithmType;

    /// Hashes a job's blob and checks the digest against the job target
    fn hash_against(
        &self,
        job: &Job,
        nonce: u32,
        ctx: &mut Self::Context,
    ) -> Result<(Digest, bool), MinerError> {
        let digest = self.hash(&job.blob, nonce, ctx)?;
        let met = job.target.is_met_by(&digest);
        Ok((digest, met))
    }
}

/// Reusable input buffer for the blob-with-nonce
///
/// Keeps the allocation across calls so hashing a range does not allocate
/// per nonce.
#[derive(Debug, Default)]
pub struct InputBuffer {
    bytes: Vec<u8>,
}

impl InputBuffer {
    /// Copies `blob` into the buffer and writes `nonce` in place
    pub fn load(&mut self, blob: &[u8], nonce: u32) -> Result<&[u8], MinerError> {
        if blob.len() < crate::miner::job::NONCE_OFFSET + 4 {
            return Err(MinerError::InputError(format!(
                "blob of {} bytes has no room for a nonce",
                blob.len()
            )));
        }
        self.bytes.clear();
        self.bytes.extend_from_slice(blob);
        crate::miner::job::write_nonce(&mut self.bytes, nonce);
        Ok(&self.bytes)
    }
}

/// Converts a library hash output to a fixed-size digest
pub(crate) fn to_digest(bytes: &[u8]) -> Result<Digest, MinerError> {
    bytes.try_into().map_err(|_| {
        MinerError::AlgorithmError(format!("expected 32-byte digest, got {}", bytes.len()))
    })
}
