// src/miner/worker.rs
//! Device worker
//!
//! Binds one [`ComputeDevice`] to the pipeline: takes nonce ranges of the
//! current job, drives the device, pushes its hits onto the result stream
//! and its hash counts onto the sample channel.

use crate::miner::device::{ComputeDevice, DeviceState, Lifecycle, SearchBatch};
use crate::miner::job::{Assignment, CandidateResult, Job, JobHolder};
use crate::stats::{HashRateSample, SampleSender};
use crate::types::DeviceId;
use crate::utils::error::DeviceError;
use crossbeam_channel::Sender;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Tuning shared by all workers
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// How often hash counts are sampled
    pub sample_interval: Duration,
    /// Consecutive failures before the device is marked errored
    pub max_failures: u32,
    /// Longest a device may search without producing hashes
    pub stall_timeout: Duration,
    /// Poll interval while waiting for the first job
    pub job_poll: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            sample_interval: Duration::from_secs(1),
            max_failures: 5,
            stall_timeout: Duration::from_secs(60),
            job_poll: Duration::from_millis(100),
        }
    }
}

/// Why a worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown was requested
    Shutdown,
    /// The verifier went away
    StreamClosed,
    /// The device failed too often and was taken out of dispatch
    Errored(DeviceError),
}

enum SearchEnd {
    /// Range exhausted or job superseded; ask for more work
    Done,
    Shutdown,
    StreamClosed,
}

/// Progress heartbeat shared between a worker and the stall watchdog
///
/// A device that never returns from `poll_results` cannot report its own
/// stall, so the watchdog reads this from outside the worker thread.
#[derive(Debug)]
pub struct WorkerHealth {
    epoch: Instant,
    progress_ms: AtomicU64,
    in_poll: AtomicBool,
    errored: AtomicBool,
}

impl Default for WorkerHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerHealth {
    /// Fresh heartbeat with progress recorded now
    pub fn new() -> Self {
        WorkerHealth {
            epoch: Instant::now(),
            progress_ms: AtomicU64::new(0),
            in_poll: AtomicBool::new(false),
            errored: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Records that the device just made progress
    pub fn touch(&self) {
        self.progress_ms.store(self.now_ms(), Ordering::SeqCst);
    }

    /// Time since the last recorded progress
    pub fn idle(&self) -> Duration {
        let last = self.progress_ms.load(Ordering::SeqCst);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    /// How long the device has gone without progress, if it is inside a poll
    pub fn stalled_for(&self) -> Option<Duration> {
        self.in_poll.load(Ordering::SeqCst).then(|| self.idle())
    }

    fn enter_poll(&self) {
        self.in_poll.store(true, Ordering::SeqCst);
    }

    fn leave_poll(&self) {
        self.in_poll.store(false, Ordering::SeqCst);
    }

    /// Marks the device errored; true only for the first caller
    pub fn mark_errored(&self) -> bool {
        !self.errored.swap(true, Ordering::SeqCst)
    }

    /// Whether the device was taken out of dispatch
    pub fn is_errored(&self) -> bool {
        self.errored.load(Ordering::SeqCst)
    }
}

struct SampleClock {
    pending: u64,
    last: Instant,
}

/// Drives one device until shutdown
pub struct DeviceWorker {
    device: Box<dyn ComputeDevice>,
    id: DeviceId,
    lifecycle: Lifecycle,
    jobs: Arc<JobHolder>,
    results: Sender<CandidateResult>,
    samples: SampleSender,
    shutdown: Arc<AtomicBool>,
    errored: Arc<AtomicUsize>,
    health: Arc<WorkerHealth>,
    settings: WorkerSettings,
    failures: u32,
    clock: SampleClock,
}

impl DeviceWorker {
    /// Creates a worker for `device`
    ///
    /// # Arguments
    /// * `device` - The device this worker owns
    /// * `jobs` - Shared current-job holder
    /// * `results` - Producer end of the result stream
    /// * `samples` - Producer end of the sample channel
    /// * `shutdown` - Raised when the process is stopping
    /// * `errored` - Bumped if this device ends up errored
    pub fn new(
        device: Box<dyn ComputeDevice>,
        jobs: Arc<JobHolder>,
        results: Sender<CandidateResult>,
        samples: SampleSender,
        shutdown: Arc<AtomicBool>,
        errored: Arc<AtomicUsize>,
        settings: WorkerSettings,
    ) -> Self {
        let id = device.id();
        DeviceWorker {
            device,
            id,
            lifecycle: Lifecycle::new(id),
            jobs,
            results,
            samples,
            shutdown,
            errored,
            health: Arc::new(WorkerHealth::new()),
            settings,
            failures: 0,
            clock: SampleClock {
                pending: 0,
                last: Instant::now(),
            },
        }
    }

    /// Heartbeat for the stall watchdog
    pub fn health(&self) -> Arc<WorkerHealth> {
        Arc::clone(&self.health)
    }

    /// Runs until shutdown, stream closure or device failure
    ///
    /// The device is always shut down before this returns.
    pub fn run(mut self) -> WorkerExit {
        let exit = self.mine();
        self.flush_sample();
        if let WorkerExit::Errored(ref e) = exit {
            // the watchdog may already have counted a stalled device
            if self.health.mark_errored() {
                log::error!("{} taken out of dispatch: {}", self.id, e);
                self.errored.fetch_add(1, Ordering::SeqCst);
            }
            let _ = self.lifecycle.advance(DeviceState::Errored);
        }
        let _ = self.lifecycle.advance(DeviceState::Draining);
        self.device.shutdown();
        let _ = self.lifecycle.advance(DeviceState::Closed);
        log::debug!("{} stopped: {:?}", self.id, exit);
        exit
    }

    fn mine(&mut self) -> WorkerExit {
        if let Err(e) = self.device.init() {
            return WorkerExit::Errored(e);
        }
        if let Err(e) = self.lifecycle.advance(DeviceState::Ready) {
            return WorkerExit::Errored(e);
        }
        log::info!("{} ready", self.id);

        loop {
            let len = self.device.preferred_range_len();
            let Some(assignment) =
                self.jobs
                    .wait_for_assignment(len, &self.shutdown, self.settings.job_poll)
            else {
                return WorkerExit::Shutdown;
            };

            match self.search(assignment) {
                Ok(SearchEnd::Done) => {}
                Ok(SearchEnd::Shutdown) => return WorkerExit::Shutdown,
                Ok(SearchEnd::StreamClosed) => return WorkerExit::StreamClosed,
                Err(e) => {
                    self.failures += 1;
                    if self.failures >= self.settings.max_failures || self.health.is_errored() {
                        return WorkerExit::Errored(e);
                    }
                    log::warn!(
                        "{} error ({}/{}), retrying: {}",
                        self.id,
                        self.failures,
                        self.settings.max_failures,
                        e
                    );
                    if self.lifecycle.state() != DeviceState::Ready {
                        // Reporting must pass through Searching on its way back
                        let _ = self.lifecycle.advance(DeviceState::Searching);
                        if let Err(e) = self.lifecycle.advance(DeviceState::Ready) {
                            return WorkerExit::Errored(e);
                        }
                    }
                }
            }
        }
    }

    fn search(&mut self, assignment: Assignment) -> Result<SearchEnd, DeviceError> {
        let Assignment { job, range } = assignment;
        let generation = job.generation;
        self.device.assign_job(Arc::clone(&job), range)?;
        self.lifecycle.advance(DeviceState::Searching)?;
        self.health.touch();
        log::trace!("{} searching job {} {}", self.id, job.job_id, range);

        let mut reported: HashSet<u32> = HashSet::new();
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Ok(SearchEnd::Shutdown);
            }
            if !self.jobs.is_current(generation) {
                log::debug!("{} abandoning {} of superseded job {}", self.id, range, job.job_id);
                self.lifecycle.advance(DeviceState::Ready)?;
                return Ok(SearchEnd::Done);
            }

            self.health.enter_poll();
            let polled = self.device.poll_results();
            self.health.leave_poll();
            if self.health.is_errored() {
                return Err(self.stalled());
            }
            let Some(batch) = polled? else {
                self.lifecycle.advance(DeviceState::Ready)?;
                return Ok(SearchEnd::Done);
            };

            if batch.hashes > 0 {
                self.health.touch();
                self.failures = 0;
            } else if self.health.idle() > self.settings.stall_timeout {
                return Err(self.stalled());
            }

            self.lifecycle.advance(DeviceState::Reporting)?;
            if !self.publish(&batch, &job, &mut reported) {
                return Ok(SearchEnd::StreamClosed);
            }
            self.count_hashes(batch.hashes);
            self.lifecycle.advance(DeviceState::Searching)?;
        }
    }

    fn stalled(&self) -> DeviceError {
        DeviceError::Stalled {
            device: self.id.to_string(),
            elapsed: self.health.idle(),
        }
    }

    /// Sends every new hit; blocks while the stream is full
    fn publish(
        &mut self,
        batch: &SearchBatch,
        job: &Arc<Job>,
        reported: &mut HashSet<u32>,
    ) -> bool {
        for hit in &batch.hits {
            if !reported.insert(hit.nonce) {
                continue;
            }
            let candidate = CandidateResult {
                device: self.id,
                job: Arc::clone(job),
                nonce: hit.nonce,
                digest: hit.digest,
            };
            if self.results.send(candidate).is_err() {
                return false;
            }
        }
        true
    }

    fn count_hashes(&mut self, hashes: u64) {
        self.clock.pending += hashes;
        if self.clock.last.elapsed() >= self.settings.sample_interval {
            self.flush_sample();
        }
    }

    fn flush_sample(&mut self) {
        if self.clock.pending > 0 {
            self.samples.offer(HashRateSample {
                device: self.id,
                hashes: self.clock.pending,
                at: Instant::now(),
            });
        }
        self.clock.pending = 0;
        self.clock.last = Instant::now();
    }
}
