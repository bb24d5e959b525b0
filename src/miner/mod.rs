// src/miner/mod.rs
//! Core mining functionality
//!
//! This module contains all components related to the mining pipeline:
//! - Hash functions (RandomX, CryptoNight)
//! - Jobs, nonce ranges and the shared job holder
//! - Compute devices and the workers that drive them
//! - Result verification and pipeline scheduling

/// Hash function implementations
///
/// Contains implementations of supported mining algorithms:
/// - RandomX (for Monero's current algorithm)
/// - CryptoNight variants (for historical/alternative chains)
pub mod algorithm;

/// CPU and GPU compute devices and their lifecycle
pub mod device;

/// Jobs, targets, nonce ranges and candidate results
pub mod job;

/// Pipeline wiring
///
/// Starts device workers, the verifier, the hashrate aggregator and the
/// stall watchdog, and stops them in order.
pub mod scheduler;

/// Candidate re-verification and share submission
pub mod verifier;

/// Device worker loop
///
/// Pulls nonce ranges from the job holder, drives one device and pushes
/// its hits onto the result stream.
pub mod worker;

// Re-export main components for cleaner imports
pub use self::algorithm::{CryptoNightAlgo, HashFunction, RandomX};
pub use self::device::{ComputeDevice, CpuDevice, DeviceState, GpuBackend, GpuDevice};
pub use self::job::{CandidateResult, Digest, Job, JobHolder, NonceRange, Target};
pub use self::scheduler::{PipelineSettings, Scheduler, ShutdownReport, result_stream};
pub use self::verifier::{LoggingSink, ResultVerifier, Submission, SubmissionSink, VerifierSummary};
pub use self::worker::{DeviceWorker, WorkerExit, WorkerHealth, WorkerSettings};
