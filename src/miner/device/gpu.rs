// src/miner/device/gpu.rs
//! GPU compute-context device
//!
//! The host side of a GPU miner: hands the job to an opaque
//! [`GpuBackend`], launches it over `intensity` nonces per poll and turns
//! the nonces the kernel flagged into hits. GPU hits carry no digest; the
//! verifier computes it.

use crate::miner::device::{ComputeDevice, Hit, SearchBatch};
use crate::miner::job::{Job, NonceRange, Target};
use crate::types::DeviceId;
use crate::utils::error::DeviceError;
use std::sync::Arc;

/// Host binding for one GPU compute context
pub trait GpuBackend: Send {
    /// Allocates buffers and compiles the kernel
    fn init(&mut self) -> Result<(), DeviceError>;

    /// Uploads a new blob and target
    fn set_work(&mut self, blob: &[u8], target: Target) -> Result<(), DeviceError>;

    /// Runs the kernel over `count` nonces from `start_nonce`
    ///
    /// Returns the nonces the kernel flagged as meeting the target.
    fn run_work(&mut self, start_nonce: u32, count: u32) -> Result<Vec<u32>, DeviceError>;

    /// Frees device memory and the compute context
    fn release(&mut self);
}

struct Search {
    job: Arc<Job>,
    next: u64,
    end: u64,
}

/// A GPU device driven through a [`GpuBackend`]
pub struct GpuDevice<B: GpuBackend> {
    id: DeviceId,
    backend: B,
    /// Nonces per kernel launch
    intensity: u32,
    search: Option<Search>,
}

impl<B: GpuBackend> GpuDevice<B> {
    /// Creates GPU device `index` launching `intensity` nonces per poll
    pub fn new(index: usize, backend: B, intensity: u32) -> Self {
        GpuDevice {
            id: DeviceId::gpu(index),
            backend,
            intensity: intensity.max(1),
            search: None,
        }
    }
}

impl<B: GpuBackend> ComputeDevice for GpuDevice<B> {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn preferred_range_len(&self) -> u64 {
        // several launches per assignment keeps the job cursor cold
        u64::from(self.intensity) * 16
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        self.backend.init()
    }

    fn assign_job(&mut self, job: Arc<Job>, range: NonceRange) -> Result<(), DeviceError> {
        self.backend.set_work(&job.blob, job.target)?;
        self.search = Some(Search {
            job,
            next: range.start,
            end: range.end,
        });
        Ok(())
    }

    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError> {
        let Some(search) = self.search.as_mut() else {
            return Ok(None);
        };
        if search.next >= search.end {
            self.search = None;
            return Ok(None);
        }

        let count = (search.end - search.next).min(u64::from(self.intensity)) as u32;
        let start = search.next as u32;
        let mut found = self.backend.run_work(start, count)?;
        search.next += u64::from(count);

        // kernels may flag a nonce twice; report each nonce once
        let launched = NonceRange::new(u64::from(start), u64::from(start) + u64::from(count));
        found.retain(|&n| launched.contains(n) && search.job.owns_nonce(n));
        found.sort_unstable();
        found.dedup();

        Ok(Some(SearchBatch {
            hits: found
                .into_iter()
                .map(|nonce| Hit {
                    nonce,
                    digest: None,
                })
                .collect(),
            hashes: u64::from(count),
        }))
    }

    fn shutdown(&mut self) {
        self.search = None;
        self.backend.release();
    }
}
