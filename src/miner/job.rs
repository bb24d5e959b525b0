// src/miner/job.rs
//! Jobs, targets and nonce-range dispatch
//!
//! A [`Job`] is immutable once published. The [`JobHolder`] keeps the
//! current job behind an atomically swapped snapshot; each snapshot owns
//! its own nonce cursor, so replacing the job also resets the cursor in
//! one step and readers can never pair a new job with an old cursor.

use crate::types::DeviceId;
use crate::utils::error::MinerError;
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// 32-byte proof-of-work digest
pub type Digest = [u8; 32];

/// Byte offset of the 32-bit nonce inside a Monero hashing blob
pub const NONCE_OFFSET: usize = 39;

/// Nonces available to a job without a pool-assigned extranonce
const FULL_NONCE_SPACE: u64 = 1 << 32;

/// Nonces available below a pool-assigned high byte
const EXTRANONCE_NONCE_SPACE: u64 = 1 << 24;

/// Share target as the 64-bit threshold used by Monero pools
///
/// A digest meets the target when the little-endian `u64` in its last
/// eight bytes is strictly below the threshold.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Target(u64);

impl Target {
    /// Wraps an already expanded 64-bit threshold
    pub fn from_u64(threshold: u64) -> Self {
        Target(threshold)
    }

    /// Parses the hex target sent by a pool
    ///
    /// Pools send either the compact 4-byte form, which is expanded to
    /// 64 bits, or the full 8-byte form. Both are little-endian.
    pub fn from_hex(hex_target: &str) -> Result<Self, MinerError> {
        let raw = hex::decode(hex_target)?;
        match raw.len() {
            4 => {
                let compact = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64;
                if compact == 0 {
                    return Err(MinerError::InputError("target is zero".into()));
                }
                Ok(Target(u64::MAX / (u64::from(u32::MAX) / compact)))
            }
            8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&raw);
                Ok(Target(u64::from_le_bytes(bytes)))
            }
            n => Err(MinerError::InputError(format!(
                "target must be 4 or 8 bytes, got {}",
                n
            ))),
        }
    }

    /// The 64-bit threshold
    pub fn threshold(&self) -> u64 {
        self.0
    }

    /// Share difficulty this target corresponds to
    pub fn difficulty(&self) -> u64 {
        if self.0 == 0 { u64::MAX } else { u64::MAX / self.0 }
    }

    /// Whether `digest` satisfies this target
    pub fn is_met_by(&self, digest: &Digest) -> bool {
        digest_value(digest) < self.0
    }
}

/// The comparison value of a digest: its last eight bytes, little-endian
pub fn digest_value(digest: &Digest) -> u64 {
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&digest[24..32]);
    u64::from_le_bytes(tail)
}

/// A unit of work issued by the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Pool job identifier, echoed back on submission
    pub job_id: String,
    /// Hashing blob; the nonce lives at [`NONCE_OFFSET`]
    pub blob: Vec<u8>,
    /// Share target for this job
    pub target: Target,
    /// Pool-assigned high nonce byte, if the pool reserves one
    pub extranonce: Option<u8>,
    /// Assigned by [`JobHolder::publish`]; zero until then
    pub generation: u64,
}

impl Job {
    /// Creates a job, checking that the blob has room for a nonce
    pub fn new(
        job_id: impl Into<String>,
        blob: Vec<u8>,
        target: Target,
        extranonce: Option<u8>,
    ) -> Result<Self, MinerError> {
        if blob.len() < NONCE_OFFSET + 4 {
            return Err(MinerError::InputError(format!(
                "job blob is {} bytes, need at least {}",
                blob.len(),
                NONCE_OFFSET + 4
            )));
        }
        Ok(Job {
            job_id: job_id.into(),
            blob,
            target,
            extranonce,
            generation: 0,
        })
    }

    /// Copy of the blob with `nonce` written in place
    pub fn blob_with_nonce(&self, nonce: u32) -> Vec<u8> {
        let mut blob = self.blob.clone();
        write_nonce(&mut blob, nonce);
        blob
    }

    /// Whether `nonce` carries this job's extranonce prefix (if any)
    pub fn owns_nonce(&self, nonce: u32) -> bool {
        match self.extranonce {
            Some(prefix) => (nonce >> 24) as u8 == prefix,
            None => true,
        }
    }

    fn nonce_space(&self) -> u64 {
        if self.extranonce.is_some() {
            EXTRANONCE_NONCE_SPACE
        } else {
            FULL_NONCE_SPACE
        }
    }

    fn nonce_base(&self) -> u64 {
        self.extranonce.map_or(0, |prefix| u64::from(prefix) << 24)
    }
}

/// Writes `nonce` little-endian into `blob` at [`NONCE_OFFSET`]
pub fn write_nonce(blob: &mut [u8], nonce: u32) {
    blob[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&nonce.to_le_bytes());
}

/// Half-open range of nonces `[start, end)` handed to one device
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NonceRange {
    /// First nonce in the range
    pub start: u64,
    /// One past the last nonce
    pub end: u64,
}

impl NonceRange {
    /// Creates the range `[start, end)`
    pub fn new(start: u64, end: u64) -> Self {
        NonceRange { start, end }
    }

    /// Number of nonces in the range
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range holds no nonces
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two ranges share at least one nonce
    pub fn overlaps(&self, other: &NonceRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `nonce` is inside the range
    pub fn contains(&self, nonce: u32) -> bool {
        let n = u64::from(nonce);
        n >= self.start && n < self.end
    }
}

impl fmt::Display for NonceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#010x}, {:#010x})", self.start, self.end)
    }
}

/// A sub-threshold hit reported by a device, in transit to the verifier
#[derive(Debug, Clone)]
pub struct CandidateResult {
    /// Device that found the nonce
    pub device: DeviceId,
    /// Job the nonce was found under
    pub job: Arc<Job>,
    /// The candidate nonce
    pub nonce: u32,
    /// Digest computed on the device, when the device computes one
    pub digest: Option<Digest>,
}

/// A job plus a nonce range taken from its cursor
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Job snapshot the range belongs to
    pub job: Arc<Job>,
    /// Nonces reserved for the caller
    pub range: NonceRange,
}

struct JobSlot {
    job: Arc<Job>,
    cursor: AtomicU64,
}

impl JobSlot {
    fn take_range(&self, len: u64) -> Option<NonceRange> {
        let space = self.job.nonce_space();
        let offset = self.cursor.fetch_add(len, Ordering::SeqCst);
        if offset >= space {
            return None;
        }
        let base = self.job.nonce_base();
        Some(NonceRange::new(
            base + offset,
            base + offset.saturating_add(len).min(space),
        ))
    }
}

/// Holds the current job for all device workers
///
/// Single writer (the pool intake), many readers. Publishing swaps the
/// whole snapshot; nothing inside a published job is ever mutated.
pub struct JobHolder {
    slot: ArcSwapOption<JobSlot>,
    generation: AtomicU64,
}

impl Default for JobHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobHolder {
    /// Creates an empty holder; workers wait until the first publish
    pub fn new() -> Self {
        JobHolder {
            slot: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
        }
    }

    /// Replaces the current job, returning its generation
    pub fn publish(&self, mut job: Job) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        job.generation = generation;
        log::debug!(
            "Publishing job {} (generation {}, difficulty {})",
            job.job_id,
            generation,
            job.target.difficulty()
        );
        self.slot.store(Some(Arc::new(JobSlot {
            job: Arc::new(job),
            cursor: AtomicU64::new(0),
        })));
        generation
    }

    /// Drops the current job so devices stop producing work for it
    pub fn clear(&self) {
        self.slot.store(None);
    }

    /// Snapshot of the current job, if any
    pub fn current(&self) -> Option<Arc<Job>> {
        self.slot.load().as_ref().map(|slot| Arc::clone(&slot.job))
    }

    /// Whether `generation` is still the live job
    pub fn is_current(&self, generation: u64) -> bool {
        self.slot
            .load()
            .as_ref()
            .is_some_and(|slot| slot.job.generation == generation)
    }

    /// Reserves the next `len` nonces of the current job
    ///
    /// Returns `None` when no job is published or its nonce space is used up.
    pub fn next_assignment(&self, len: u64) -> Option<Assignment> {
        let guard = self.slot.load();
        let slot = guard.as_ref()?;
        let range = slot.take_range(len.max(1))?;
        Some(Assignment {
            job: Arc::clone(&slot.job),
            range,
        })
    }

    /// Blocks until an assignment is available or `shutdown` is raised
    pub fn wait_for_assignment(
        &self,
        len: u64,
        shutdown: &AtomicBool,
        poll: Duration,
    ) -> Option<Assignment> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }
            if let Some(assignment) = self.next_assignment(len) {
                return Some(assignment);
            }
            std::thread::sleep(poll);
        }
    }
}
