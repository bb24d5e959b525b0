// src/miner/algorithm/cryptonight.rs
//! CryptoNight algorithm implementation
//!
//! Wraps the `cryptonight-rs` bindings for the V7 and R variants. The
//! library manages its own 2 MiB scratchpad per call, so the scratch
//! context here only carries the reusable input buffer.

use crate::miner::algorithm::{HashFunction, InputBuffer, to_digest};
use crate::miner::job::Digest;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use cryptonight::cryptonight;

/// CryptoNight algorithm implementation
pub struct CryptoNightAlgo {
    /// Library variant identifier: `1` for V7, `4` for R
    variant: i32,
}

impl CryptoNightAlgo {
    /// Creates a CryptoNight hash function for `algorithm`
    ///
    /// Fails for algorithms that are not CryptoNight variants.
    pub fn new(algorithm: AlgorithmType) -> Result<Self, MinerError> {
        let variant = match algorithm {
            AlgorithmType::CryptoNightV7 => 1,
            AlgorithmType::CryptoNightR => 4,
            other => {
                return Err(MinerError::AlgorithmError(format!(
                    "{} is not a CryptoNight variant",
                    other
                )));
            }
        };
        Ok(Self { variant })
    }
}

impl HashFunction for CryptoNightAlgo {
    type Context = InputBuffer;

    fn new_scratch_context(&self) -> Result<Self::Context, MinerError> {
        Ok(InputBuffer::default())
    }

    fn hash(
        &self,
        blob: &[u8],
        nonce: u32,
        ctx: &mut Self::Context,
    ) -> Result<Digest, MinerError> {
        let data = ctx.load(blob, nonce)?;
        let hash = cryptonight(data, data.len(), self.variant);
        to_digest(hash.as_slice())
    }

    fn algorithm_type(&self) -> AlgorithmType {
        match self.variant {
            1 => AlgorithmType::CryptoNightV7,
            _ => AlgorithmType::CryptoNightR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cryptonight_variants_are_accepted() {
        assert!(CryptoNightAlgo::new(AlgorithmType::RandomX).is_err());
        let v7 = CryptoNightAlgo::new(AlgorithmType::CryptoNightV7).unwrap();
        assert_eq!(v7.algorithm_type(), AlgorithmType::CryptoNightV7);
        let r = CryptoNightAlgo::new(AlgorithmType::CryptoNightR).unwrap();
        assert_eq!(r.algorithm_type(), AlgorithmType::CryptoNightR);
    }

    #[test]
    fn hashing_is_deterministic_and_nonce_sensitive() {
        let cn = CryptoNightAlgo::new(AlgorithmType::CryptoNightV7).unwrap();
        let mut ctx = cn.new_scratch_context().unwrap();
        let blob = [0x42u8; 76];
        let a = cn.hash(&blob, 7, &mut ctx).unwrap();
        let b = cn.hash(&blob, 7, &mut ctx).unwrap();
        let c = cn.hash(&blob, 8, &mut ctx).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
