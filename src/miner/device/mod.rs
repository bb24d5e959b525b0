// src/miner/device/mod.rs
//! Compute devices
//!
//! A device searches nonce ranges of a job and reports sub-threshold hits
//! together with how many hashes it did. [`DeviceWorker`](crate::miner::DeviceWorker)
//! drives any device through [`ComputeDevice`], so CPU threads and GPU
//! contexts share one dispatch loop.

/// CPU-thread device
pub mod cpu;

/// GPU compute-context device and its backend interface
pub mod gpu;

/// Per-device lifecycle state machine
pub mod lifecycle;

/// OpenCL backend for GPU devices
#[cfg(feature = "opencl")]
pub mod opencl;

use crate::miner::job::{Digest, Job, NonceRange};
use crate::types::DeviceId;
use crate::utils::error::DeviceError;
use std::sync::Arc;

pub use self::cpu::CpuDevice;
pub use self::gpu::{GpuBackend, GpuDevice};
pub use self::lifecycle::{DeviceState, Lifecycle};

/// A nonce the device believes meets the job target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// The nonce
    pub nonce: u32,
    /// Digest computed on the device, if it computes one on the host side
    pub digest: Option<Digest>,
}

/// Output of one device poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchBatch {
    /// Candidate nonces found in this batch
    pub hits: Vec<Hit>,
    /// Number of nonces hashed in this batch
    pub hashes: u64,
}

/// Capability interface implemented by every device variant
pub trait ComputeDevice: Send {
    /// Identifier used in candidates, samples and logs
    fn id(&self) -> DeviceId;

    /// Number of nonces the device wants per assignment
    fn preferred_range_len(&self) -> u64;

    /// One-time setup (buffers, kernels, scratch memory)
    fn init(&mut self) -> Result<(), DeviceError>;

    /// Starts searching `range` of `job`, abandoning any previous range
    fn assign_job(&mut self, job: Arc<Job>, range: NonceRange) -> Result<(), DeviceError>;

    /// Runs one search step
    ///
    /// Returns `Ok(None)` once the assigned range is exhausted.
    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError>;

    /// Releases device resources; called exactly once, at the end
    fn shutdown(&mut self);
}
