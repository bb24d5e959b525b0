// src/miner/device/cpu.rs
//! CPU-thread device
//!
//! Hashes its range on the worker thread with its own scratch context and
//! reports hits together with the digest it computed.

use crate::miner::algorithm::HashFunction;
use crate::miner::device::{ComputeDevice, Hit, SearchBatch};
use crate::miner::job::{Job, NonceRange};
use crate::types::DeviceId;
use crate::utils::error::DeviceError;
use std::sync::Arc;

struct Search {
    job: Arc<Job>,
    next: u64,
    end: u64,
}

/// A single CPU hashing thread
pub struct CpuDevice<H: HashFunction> {
    id: DeviceId,
    hash: Arc<H>,
    ctx: Option<H::Context>,
    /// Nonces hashed per poll
    batch_size: u64,
    /// Nonces requested per assignment
    range_len: u64,
    search: Option<Search>,
}

impl<H: HashFunction> CpuDevice<H> {
    /// Creates CPU device `index`
    ///
    /// # Arguments
    /// * `hash` - Shared hash function; the device builds its own context
    /// * `batch_size` - Nonces hashed between two polls
    /// * `range_len` - Nonces requested from the job per assignment
    pub fn new(index: usize, hash: Arc<H>, batch_size: u64, range_len: u64) -> Self {
        CpuDevice {
            id: DeviceId::cpu(index),
            hash,
            ctx: None,
            batch_size: batch_size.max(1),
            range_len: range_len.max(1),
            search: None,
        }
    }
}

impl<H: HashFunction> ComputeDevice for CpuDevice<H> {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn preferred_range_len(&self) -> u64 {
        self.range_len
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        let ctx = self
            .hash
            .new_scratch_context()
            .map_err(|e| DeviceError::Init {
                device: self.id.to_string(),
                reason: e.to_string(),
            })?;
        self.ctx = Some(ctx);
        Ok(())
    }

    fn assign_job(&mut self, job: Arc<Job>, range: NonceRange) -> Result<(), DeviceError> {
        self.search = Some(Search {
            job,
            next: range.start,
            end: range.end,
        });
        Ok(())
    }

    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError> {
        let id = self.id;
        let Some(ctx) = self.ctx.as_mut() else {
            return Err(DeviceError::Compute {
                device: id.to_string(),
                reason: "scratch context not initialized".into(),
            });
        };
        let Some(search) = self.search.as_mut() else {
            return Ok(None);
        };
        if search.next >= search.end {
            self.search = None;
            return Ok(None);
        }

        let stop = (search.next + self.batch_size).min(search.end);
        let mut batch = SearchBatch::default();
        for n in search.next..stop {
            let nonce = n as u32;
            let (digest, met) = self
                .hash
                .hash_against(&search.job, nonce, ctx)
                .map_err(|e| DeviceError::Compute {
                    device: id.to_string(),
                    reason: e.to_string(),
                })?;
            batch.hashes += 1;
            if met {
                batch.hits.push(Hit {
                    nonce,
                    digest: Some(digest),
                });
            }
        }
        search.next = stop;
        Ok(Some(batch))
    }

    fn shutdown(&mut self) {
        self.search = None;
        self.ctx = None;
    }
}
