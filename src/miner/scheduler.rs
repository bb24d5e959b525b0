// src/miner/scheduler.rs
//! Pipeline wiring and shutdown
//!
//! Starts one thread per device worker, one for the result verifier, one
//! for the hashrate aggregator and a stall watchdog. Workers and verifier
//! talk only through the bounded result stream; the current job is shared
//! through the [`JobHolder`].

use crate::miner::algorithm::HashFunction;
use crate::miner::device::ComputeDevice;
use crate::miner::job::{CandidateResult, JobHolder};
use crate::miner::verifier::{ResultVerifier, SubmissionSink, VerifierSummary};
use crate::miner::worker::{DeviceWorker, WorkerExit, WorkerHealth, WorkerSettings};
use crate::stats::{HashrateAggregator, ShareStats, WindowReport, sample_channel};
use crate::types::DeviceId;
use crate::utils::error::{DeviceError, MinerError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often shutdown checks on a worker that has not finished yet
const SETTLE_POLL: Duration = Duration::from_millis(10);

/// Pipeline tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Result stream capacity; producers block beyond it
    pub result_capacity: usize,
    /// Sample channel capacity; samples are dropped beyond it
    pub sample_capacity: usize,
    /// Hashrate window length
    pub report_interval: Duration,
    /// Include CPU usage in the rate line
    pub hardware_stats: bool,
    /// Per-worker settings
    pub worker: WorkerSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            result_capacity: 1000,
            sample_capacity: 256,
            report_interval: Duration::from_secs(10),
            hardware_stats: false,
            worker: WorkerSettings::default(),
        }
    }
}

/// Creates the bounded multi-producer result stream
pub fn result_stream(capacity: usize) -> (Sender<CandidateResult>, Receiver<CandidateResult>) {
    crossbeam_channel::bounded(capacity)
}

/// What the pipeline did, collected at shutdown
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// How each worker ended
    pub workers: Vec<(DeviceId, WorkerExit)>,
    /// Verifier totals
    pub verifier: VerifierSummary,
    /// Last hashrate window, if any samples arrived
    pub last_rate: Option<WindowReport>,
}

/// Coordinates device workers, the verifier and the aggregator
pub struct Scheduler {
    jobs: Arc<JobHolder>,
    shares: Arc<ShareStats>,
    shutdown: Arc<AtomicBool>,
    errored: Arc<AtomicUsize>,
    workers: Vec<WorkerHandle>,
    verifier: Option<JoinHandle<VerifierSummary>>,
    aggregator: Option<JoinHandle<Option<WindowReport>>>,
    watchdog: Option<JoinHandle<()>>,
    // dropping this releases the verifier, aggregator and watchdog
    stop: Option<Sender<()>>,
}

struct WorkerHandle {
    id: DeviceId,
    thread: JoinHandle<WorkerExit>,
    health: Arc<WorkerHealth>,
}

impl Scheduler {
    /// Builds the verifier and starts every thread
    ///
    /// # Errors
    /// Fails without starting any worker when there are no devices or the
    /// verification context cannot be allocated.
    pub fn start<H, S>(
        hash: Arc<H>,
        devices: Vec<Box<dyn ComputeDevice>>,
        sink: S,
        settings: PipelineSettings,
    ) -> Result<Self, MinerError>
    where
        H: HashFunction,
        S: SubmissionSink + 'static,
    {
        if devices.is_empty() {
            return Err(MinerError::ConfigError("no compute devices configured".into()));
        }

        let shares = Arc::new(ShareStats::new());
        let verifier = ResultVerifier::new(hash, sink, Arc::clone(&shares))?;

        let jobs = Arc::new(JobHolder::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let errored = Arc::new(AtomicUsize::new(0));
        let (results_tx, results_rx) = result_stream(settings.result_capacity);
        let (samples_tx, samples_rx) = sample_channel(settings.sample_capacity);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let mut scheduler = Scheduler {
            jobs,
            shares: Arc::clone(&shares),
            shutdown,
            errored,
            workers: Vec::with_capacity(devices.len()),
            verifier: None,
            aggregator: None,
            watchdog: None,
            stop: Some(stop_tx),
        };

        let stop = stop_rx.clone();
        scheduler.verifier = Some(
            thread::Builder::new()
                .name("verifier".into())
                .spawn(move || verifier.run_until(results_rx, stop))?,
        );

        let aggregator =
            HashrateAggregator::new(settings.report_interval, shares, settings.hardware_stats)
                .counting_drops_of(&samples_tx);
        let stop = stop_rx.clone();
        scheduler.aggregator = Some(
            thread::Builder::new()
                .name("hashrate".into())
                .spawn(move || aggregator.run_until(samples_rx, stop))?,
        );

        for device in devices {
            let id = device.id();
            let worker = DeviceWorker::new(
                device,
                Arc::clone(&scheduler.jobs),
                results_tx.clone(),
                samples_tx.clone(),
                Arc::clone(&scheduler.shutdown),
                Arc::clone(&scheduler.errored),
                settings.worker,
            );
            let health = worker.health();
            let thread = thread::Builder::new()
                .name(format!("device-{}-{}", id.kind_label(), id.index))
                .spawn(move || worker.run())?;
            scheduler.workers.push(WorkerHandle { id, thread, health });
        }
        // the stream closes once the last worker drops its sender

        let watched: Vec<(DeviceId, Arc<WorkerHealth>)> = scheduler
            .workers
            .iter()
            .map(|w| (w.id, Arc::clone(&w.health)))
            .collect();
        let errored = Arc::clone(&scheduler.errored);
        let stall_timeout = settings.worker.stall_timeout;
        scheduler.watchdog = Some(
            thread::Builder::new()
                .name("watchdog".into())
                .spawn(move || watch_stalls(watched, errored, stall_timeout, stop_rx))?,
        );

        log::info!(
            "Pipeline started with {} devices (result stream capacity {})",
            scheduler.workers.len(),
            settings.result_capacity
        );
        Ok(scheduler)
    }

    /// The job holder the pool client publishes into
    pub fn jobs(&self) -> Arc<JobHolder> {
        Arc::clone(&self.jobs)
    }

    /// Share counters shared with the pool client
    pub fn shares(&self) -> Arc<ShareStats> {
        Arc::clone(&self.shares)
    }

    /// Number of devices that ended in the errored state
    pub fn failed_devices(&self) -> usize {
        self.errored.load(Ordering::SeqCst)
    }

    /// Whether no device is left to mine with
    pub fn all_devices_failed(&self) -> bool {
        self.failed_devices() >= self.workers.len()
    }

    /// Stops the pipeline in order and reports how it ended
    ///
    /// Workers stop first, which closes the result stream; the verifier
    /// then drains what is still queued before exiting. A worker stuck
    /// inside its device is left behind once the watchdog has flagged it,
    /// so shutdown takes at most about one stall timeout.
    pub fn shutdown(mut self) -> Result<ShutdownReport, MinerError> {
        self.shutdown.store(true, Ordering::SeqCst);
        log::info!("Shutting down {} device workers", self.workers.len());

        let mut workers = Vec::with_capacity(self.workers.len());
        for worker in self.workers.drain(..) {
            let id = worker.id;
            workers.push((id, settle(worker)?));
        }
        drop(self.stop.take());

        let verifier = match self.verifier.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| MinerError::TaskError("verifier panicked".into()))?,
            None => VerifierSummary::default(),
        };
        let last_rate = match self.aggregator.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| MinerError::TaskError("hashrate aggregator panicked".into()))?,
            None => None,
        };
        if let Some(handle) = self.watchdog.take() {
            handle
                .join()
                .map_err(|_| MinerError::TaskError("watchdog panicked".into()))?;
        }

        log::info!(
            "Pipeline stopped: {} candidates verified, {} submitted, {} rejected, {} dropped",
            verifier.processed,
            verifier.submitted,
            verifier.rejected,
            verifier.dropped
        );
        Ok(ShutdownReport {
            workers,
            verifier,
            last_rate,
        })
    }
}

/// Waits for a worker to finish, or gives up on it once it is flagged stalled
fn settle(worker: WorkerHandle) -> Result<WorkerExit, MinerError> {
    loop {
        if worker.thread.is_finished() {
            return worker
                .thread
                .join()
                .map_err(|_| MinerError::TaskError(format!("{} worker panicked", worker.id)));
        }
        if worker.health.is_errored() {
            if let Some(elapsed) = worker.health.stalled_for() {
                log::warn!("{} is stuck in its device, leaving its thread behind", worker.id);
                return Ok(WorkerExit::Errored(DeviceError::Stalled {
                    device: worker.id.to_string(),
                    elapsed,
                }));
            }
        }
        thread::sleep(SETTLE_POLL);
    }
}

/// Flags workers whose device has been inside one poll for too long
///
/// Runs until `stop` disconnects. A flagged worker counts as errored right
/// away, even though its thread cannot be reclaimed.
fn watch_stalls(
    workers: Vec<(DeviceId, Arc<WorkerHealth>)>,
    errored: Arc<AtomicUsize>,
    stall_timeout: Duration,
    stop: Receiver<()>,
) {
    let period = (stall_timeout / 4).clamp(SETTLE_POLL, Duration::from_secs(1));
    while let Err(RecvTimeoutError::Timeout) = stop.recv_timeout(period) {
        for (id, health) in &workers {
            let Some(idle) = health.stalled_for() else {
                continue;
            };
            if idle > stall_timeout && health.mark_errored() {
                log::error!(
                    "{} made no progress for {:?}, taken out of dispatch",
                    id,
                    idle
                );
                errored.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
