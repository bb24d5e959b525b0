//! XMR Pipeline - heterogeneous CPU/GPU Monero mining in Rust
//!
//! Compute devices search nonce ranges of the current pool job and push
//! candidate solutions onto one bounded result stream. A single verifier
//! re-hashes every candidate with its own scratch context before the share
//! reaches the pool. Hashrate samples travel on a separate lossy channel.
//!
//! Supported algorithms are RandomX and the CryptoNight v7 and R variants.

#![warn(missing_docs)]
#![deny(unsafe_code)]

/// Miner core: jobs, hash functions, devices, workers and verification
pub mod miner;

/// Pool connection, stratum protocol and transports
pub mod network;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::Config;
pub use miner::{
    CandidateResult, ComputeDevice, HashFunction, Job, JobHolder, NonceRange, ResultVerifier,
    Scheduler, Submission, SubmissionSink, Target,
};
pub use network::{PoolConfig, StratumClient};
pub use stats::{HardwareStats, HashrateAggregator, MiningStats, ShareStats};
pub use types::{AlgorithmType, DeviceId, DeviceKind};
pub use utils::{DeviceError, MinerError, init_logging};
