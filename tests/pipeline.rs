// tests/pipeline.rs
//! End-to-end pipeline behaviour with fake hash functions and devices

use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use xmr_pipeline::miner::device::{Hit, SearchBatch};
use xmr_pipeline::miner::{
    ComputeDevice, DeviceWorker, GpuBackend, GpuDevice, PipelineSettings, Scheduler,
    WorkerExit, WorkerSettings, result_stream,
};
use xmr_pipeline::network::{PoolConfig, StratumClient, submission_channel};
use xmr_pipeline::stats::sample_channel;
use xmr_pipeline::{
    AlgorithmType, DeviceError, DeviceId, HashFunction, Job, JobHolder, MinerError, NonceRange,
    Submission, SubmissionSink, Target,
};

/// Hash whose digest meets any target for chosen nonces and none otherwise
///
/// The first scratch context belongs to the verifier; hashes on it are
/// slowed down and counted for overlap.
struct ChosenNonceHash {
    winners: Option<HashSet<u32>>,
    verifier_delay: Duration,
    contexts: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ChosenNonceHash {
    fn winning(winners: &[u32]) -> Self {
        Self::build(Some(winners.iter().copied().collect()), Duration::ZERO)
    }

    fn all_winning(verifier_delay: Duration) -> Self {
        Self::build(None, verifier_delay)
    }

    fn build(winners: Option<HashSet<u32>>, verifier_delay: Duration) -> Self {
        ChosenNonceHash {
            winners,
            verifier_delay,
            contexts: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

struct Ctx {
    verifier: bool,
}

impl HashFunction for ChosenNonceHash {
    type Context = Ctx;

    fn new_scratch_context(&self) -> Result<Ctx, MinerError> {
        Ok(Ctx {
            verifier: self.contexts.fetch_add(1, Ordering::SeqCst) == 0,
        })
    }

    fn hash(&self, _blob: &[u8], nonce: u32, ctx: &mut Ctx) -> Result<[u8; 32], MinerError> {
        if ctx.verifier {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.verifier_delay);
        }
        let wins = self.winners.as_ref().is_none_or(|w| w.contains(&nonce));
        let digest = if wins { [0u8; 32] } else { [0xffu8; 32] };
        if ctx.verifier {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(digest)
    }

    fn algorithm_type(&self) -> AlgorithmType {
        AlgorithmType::RandomX
    }
}

#[derive(Clone, Default)]
struct CollectingSink {
    shares: Arc<Mutex<Vec<Submission>>>,
}

impl CollectingSink {
    fn nonces(&self) -> Vec<String> {
        self.shares
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.nonce.clone())
            .collect()
    }
}

impl SubmissionSink for CollectingSink {
    fn submit(&self, submission: Submission) -> Result<(), MinerError> {
        self.shares.lock().unwrap().push(submission);
        Ok(())
    }
}

/// GPU backend that flags fixed nonces whenever a launch covers them
struct FlaggingBackend {
    flagged: Vec<u32>,
}

impl GpuBackend for FlaggingBackend {
    fn init(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn set_work(&mut self, _blob: &[u8], _target: Target) -> Result<(), DeviceError> {
        Ok(())
    }

    fn run_work(&mut self, start_nonce: u32, count: u32) -> Result<Vec<u32>, DeviceError> {
        let end = u64::from(start_nonce) + u64::from(count);
        Ok(self
            .flagged
            .iter()
            .copied()
            .filter(|&n| u64::from(n) >= u64::from(start_nonce) && u64::from(n) < end)
            .collect())
    }

    fn release(&mut self) {}
}

fn wait_for_flag(flag: &AtomicBool) {
    let started = Instant::now();
    while !flag.load(Ordering::SeqCst) && started.elapsed() < Duration::from_secs(10) {
        thread::sleep(Duration::from_millis(1));
    }
}

/// Pins a device's range length and orders its claims against a peer
///
/// The device claims nothing before `start_after` is raised and keeps its
/// first range until `finish_after` is raised. `claimed` goes up once the
/// first range is assigned.
struct Staged<D> {
    inner: D,
    range_len: u64,
    start_after: Option<Arc<AtomicBool>>,
    finish_after: Option<Arc<AtomicBool>>,
    claimed: Arc<AtomicBool>,
    first: Arc<Mutex<Option<NonceRange>>>,
}

impl<D> Staged<D> {
    fn new(inner: D, range_len: u64) -> Self {
        Staged {
            inner,
            range_len,
            start_after: None,
            finish_after: None,
            claimed: Arc::default(),
            first: Arc::default(),
        }
    }
}

impl<D: ComputeDevice> ComputeDevice for Staged<D> {
    fn id(&self) -> DeviceId {
        self.inner.id()
    }

    fn preferred_range_len(&self) -> u64 {
        self.range_len
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        if let Some(flag) = self.start_after.take() {
            wait_for_flag(&flag);
        }
        self.inner.init()
    }

    fn assign_job(&mut self, job: Arc<Job>, range: NonceRange) -> Result<(), DeviceError> {
        self.first.lock().unwrap().get_or_insert(range);
        self.claimed.store(true, Ordering::SeqCst);
        self.inner.assign_job(job, range)
    }

    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError> {
        let polled = self.inner.poll_results()?;
        if polled.is_none() {
            if let Some(flag) = self.finish_after.take() {
                wait_for_flag(&flag);
            }
        }
        Ok(polled)
    }

    fn shutdown(&mut self) {
        self.inner.shutdown()
    }
}

/// Never returns from a poll until released
struct HungDevice {
    release: Arc<AtomicBool>,
}

impl ComputeDevice for HungDevice {
    fn id(&self) -> DeviceId {
        DeviceId::gpu(7)
    }

    fn preferred_range_len(&self) -> u64 {
        100
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn assign_job(&mut self, _job: Arc<Job>, _range: NonceRange) -> Result<(), DeviceError> {
        Ok(())
    }

    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError> {
        while !self.release.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(None)
    }

    fn shutdown(&mut self) {}
}

/// Reports a fixed burst of digest-less hits on its first range, then
/// only hashes; records every range it is given
struct BurstDevice {
    id: DeviceId,
    burst: Vec<u32>,
    ranges: Arc<Mutex<Vec<NonceRange>>>,
    current: Option<NonceRange>,
}

impl BurstDevice {
    fn new(index: usize, burst: Vec<u32>, ranges: Arc<Mutex<Vec<NonceRange>>>) -> Self {
        BurstDevice {
            id: DeviceId::cpu(index),
            burst,
            ranges,
            current: None,
        }
    }
}

impl ComputeDevice for BurstDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn preferred_range_len(&self) -> u64 {
        500
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn assign_job(&mut self, _job: Arc<Job>, range: NonceRange) -> Result<(), DeviceError> {
        self.ranges.lock().unwrap().push(range);
        self.current = Some(range);
        Ok(())
    }

    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError> {
        let Some(range) = self.current.take() else {
            return Ok(None);
        };
        thread::sleep(Duration::from_millis(1));
        Ok(Some(SearchBatch {
            hits: self
                .burst
                .drain(..)
                .map(|nonce| Hit {
                    nonce,
                    digest: None,
                })
                .collect(),
            hashes: range.len(),
        }))
    }

    fn shutdown(&mut self) {
        self.current = None;
    }
}

/// Reports one fresh hit per poll across its range
struct HitPerPoll {
    polls: Arc<AtomicUsize>,
    next: u64,
    end: u64,
}

impl ComputeDevice for HitPerPoll {
    fn id(&self) -> DeviceId {
        DeviceId::gpu(0)
    }

    fn preferred_range_len(&self) -> u64 {
        1000
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn assign_job(&mut self, _job: Arc<Job>, range: NonceRange) -> Result<(), DeviceError> {
        self.next = range.start;
        self.end = range.end;
        Ok(())
    }

    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError> {
        if self.next >= self.end {
            return Ok(None);
        }
        self.polls.fetch_add(1, Ordering::SeqCst);
        let nonce = self.next as u32;
        self.next += 1;
        Ok(Some(SearchBatch {
            hits: vec![Hit {
                nonce,
                digest: None,
            }],
            hashes: 1,
        }))
    }

    fn shutdown(&mut self) {}
}

struct BrokenDevice(usize);

impl ComputeDevice for BrokenDevice {
    fn id(&self) -> DeviceId {
        DeviceId::gpu(self.0)
    }

    fn preferred_range_len(&self) -> u64 {
        1
    }

    fn init(&mut self) -> Result<(), DeviceError> {
        Err(DeviceError::Init {
            device: self.id().to_string(),
            reason: "no OpenCL platform".into(),
        })
    }

    fn assign_job(&mut self, _job: Arc<Job>, _range: NonceRange) -> Result<(), DeviceError> {
        Ok(())
    }

    fn poll_results(&mut self) -> Result<Option<SearchBatch>, DeviceError> {
        Ok(None)
    }

    fn shutdown(&mut self) {}
}

fn job(id: &str, threshold: u64) -> Job {
    Job::new(id, vec![0u8; 76], Target::from_u64(threshold), None).unwrap()
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let started = Instant::now();
    while !done() {
        assert!(
            started.elapsed() < Duration::from_secs(20),
            "timed out waiting for {}",
            what
        );
        thread::sleep(Duration::from_millis(5));
    }
}

fn fast_settings(result_capacity: usize) -> PipelineSettings {
    PipelineSettings {
        result_capacity,
        report_interval: Duration::from_millis(200),
        worker: WorkerSettings {
            sample_interval: Duration::from_millis(20),
            job_poll: Duration::from_millis(5),
            ..WorkerSettings::default()
        },
        ..PipelineSettings::default()
    }
}

#[test]
fn gpu_candidates_are_reverified_before_submission() {
    // both GPUs flag 42 and 1500, but only 42 meets the target
    let hash = Arc::new(ChosenNonceHash::winning(&[42]));
    let flagged = || FlaggingBackend {
        flagged: vec![42, 1500],
    };
    let mut d0 = Staged::new(GpuDevice::new(0, flagged(), 250), 1000);
    let mut d1 = Staged::new(GpuDevice::new(1, flagged(), 250), 1000);
    d1.start_after = Some(Arc::clone(&d0.claimed));
    d0.finish_after = Some(Arc::clone(&d1.claimed));
    let (d0_first, d1_first) = (Arc::clone(&d0.first), Arc::clone(&d1.first));
    let sink = CollectingSink::default();

    let scheduler = Scheduler::start(
        Arc::clone(&hash),
        vec![Box::new(d0), Box::new(d1)],
        sink.clone(),
        fast_settings(1000),
    )
    .unwrap();
    scheduler.jobs().publish(job("j1", 1 << 40));

    let shares = scheduler.shares();
    wait_until("both GPU candidates", || {
        let s = shares.snapshot();
        s.shares_submitted + s.false_positives >= 2
    });

    let report = scheduler.shutdown().unwrap();
    assert_eq!(*d0_first.lock().unwrap(), Some(NonceRange::new(0, 1000)));
    assert_eq!(*d1_first.lock().unwrap(), Some(NonceRange::new(1000, 2000)));

    let submitted = sink.shares.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].nonce, "2a000000");
    assert_eq!(submitted[0].device, DeviceId::gpu(0));
    assert_eq!(report.verifier.submitted, 1);
    assert_eq!(report.verifier.rejected, 1);
    assert_eq!(shares.snapshot().false_positives, 1);
    assert!(report.workers.iter().all(|(_, exit)| *exit == WorkerExit::Shutdown));
}

#[test]
fn single_slot_stream_delivers_every_candidate_to_one_verifier() {
    let hash = Arc::new(ChosenNonceHash::all_winning(Duration::from_millis(2)));
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let devices: Vec<Box<dyn ComputeDevice>> = vec![
        Box::new(BurstDevice::new(0, (0..20).collect(), Arc::clone(&ranges))),
        Box::new(BurstDevice::new(1, (100..120).collect(), Arc::clone(&ranges))),
    ];
    let sink = CollectingSink::default();

    let scheduler =
        Scheduler::start(Arc::clone(&hash), devices, sink.clone(), fast_settings(1)).unwrap();
    scheduler.jobs().publish(job("j1", 1));

    let shares = scheduler.shares();
    wait_until("40 submissions", || shares.snapshot().shares_submitted == 40);
    let report = scheduler.shutdown().unwrap();

    assert_eq!(report.verifier.processed, 40);
    let distinct: HashSet<String> = sink.nonces().into_iter().collect();
    assert_eq!(distinct.len(), 40);
    assert_eq!(hash.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn full_stream_blocks_the_producing_worker() {
    let (tx, rx) = result_stream(3);
    let (samples, _samples_rx) = sample_channel(16);
    let jobs = Arc::new(JobHolder::new());
    jobs.publish(job("j1", u64::MAX));
    let polls = Arc::new(AtomicUsize::new(0));
    let shutdown = Arc::new(AtomicBool::new(false));

    let worker = DeviceWorker::new(
        Box::new(HitPerPoll {
            polls: Arc::clone(&polls),
            next: 0,
            end: 0,
        }),
        jobs,
        tx,
        samples,
        Arc::clone(&shutdown),
        Arc::new(AtomicUsize::new(0)),
        WorkerSettings::default(),
    );
    let handle = thread::spawn(move || worker.run());

    wait_until("a full stream", || rx.len() == 3);
    thread::sleep(Duration::from_millis(50));
    let blocked_at = polls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(rx.len(), 3);
    assert_eq!(polls.load(Ordering::SeqCst), blocked_at);

    let first: Vec<u32> = (0..3).map(|_| rx.recv().unwrap().nonce).collect();
    assert_eq!(first, vec![0, 1, 2]);
    wait_until("the worker to resume", || {
        polls.load(Ordering::SeqCst) > blocked_at
    });

    shutdown.store(true, Ordering::SeqCst);
    drop(rx);
    let exit = handle.join().unwrap();
    assert!(matches!(exit, WorkerExit::Shutdown | WorkerExit::StreamClosed));
}

#[test]
fn concurrent_devices_never_share_a_nonce() {
    let hash = Arc::new(ChosenNonceHash::winning(&[]));
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let devices: Vec<Box<dyn ComputeDevice>> = (0..4)
        .map(|i| Box::new(BurstDevice::new(i, Vec::new(), Arc::clone(&ranges))) as Box<dyn ComputeDevice>)
        .collect();

    let scheduler =
        Scheduler::start(hash, devices, CollectingSink::default(), fast_settings(16)).unwrap();
    scheduler.jobs().publish(job("j1", 1));
    wait_until("many assignments", || ranges.lock().unwrap().len() >= 200);
    scheduler.shutdown().unwrap();

    let ranges = ranges.lock().unwrap();
    for (i, a) in ranges.iter().enumerate() {
        for b in ranges.iter().skip(i + 1) {
            assert!(!a.overlaps(b), "{} overlaps {}", a, b);
        }
    }
}

#[test]
fn losing_every_device_is_detected() {
    let hash = Arc::new(ChosenNonceHash::winning(&[]));
    let devices: Vec<Box<dyn ComputeDevice>> =
        vec![Box::new(BrokenDevice(0)), Box::new(BrokenDevice(1))];

    let scheduler =
        Scheduler::start(hash, devices, CollectingSink::default(), fast_settings(8)).unwrap();
    wait_until("both devices to fail", || scheduler.all_devices_failed());
    assert_eq!(scheduler.failed_devices(), 2);

    let report = scheduler.shutdown().unwrap();
    assert!(
        report
            .workers
            .iter()
            .all(|(_, exit)| matches!(exit, WorkerExit::Errored(DeviceError::Init { .. })))
    );
}

#[test]
fn device_hung_inside_a_poll_is_flagged_and_left_behind() {
    let release = Arc::new(AtomicBool::new(false));
    let hash = Arc::new(ChosenNonceHash::winning(&[]));
    let ranges = Arc::new(Mutex::new(Vec::new()));
    let devices: Vec<Box<dyn ComputeDevice>> = vec![
        Box::new(HungDevice {
            release: Arc::clone(&release),
        }),
        Box::new(BurstDevice::new(0, Vec::new(), Arc::clone(&ranges))),
    ];
    let mut settings = fast_settings(8);
    settings.worker.stall_timeout = Duration::from_millis(50);

    let scheduler = Scheduler::start(hash, devices, CollectingSink::default(), settings).unwrap();
    scheduler.jobs().publish(job("j1", 1));
    wait_until("the hung device to be flagged", || scheduler.failed_devices() == 1);
    assert!(!scheduler.all_devices_failed());

    // the healthy device keeps mining
    let seen = ranges.lock().unwrap().len();
    wait_until("more ranges", || ranges.lock().unwrap().len() > seen + 5);

    let started = Instant::now();
    let report = scheduler.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.workers[0].0, DeviceId::gpu(7));
    assert!(matches!(
        report.workers[0].1,
        WorkerExit::Errored(DeviceError::Stalled { .. })
    ));
    assert_eq!(report.workers[1].1, WorkerExit::Shutdown);
    release.store(true, Ordering::SeqCst);
}

#[tokio::test]
async fn shares_verified_during_shutdown_reach_the_pool() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("stratum+tcp://{}", listener.local_addr().unwrap());
    let pool = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        lines.next_line().await.unwrap().unwrap();
        let login = json!({"id": 1, "error": null, "result": {
            "id": "sess",
            "status": "OK",
            "job": {"job_id": "j1", "blob": "00".repeat(76), "target": "ffffffff"},
        }});
        let mut line = login.to_string();
        line.push('\n');
        lines.get_mut().get_mut().write_all(line.as_bytes()).await.unwrap();

        let mut submits = 0;
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            if request["method"] == "submit" {
                submits += 1;
            }
        }
        submits
    });

    // the verifier is slow, so most of the burst is still queued at shutdown
    let hash = Arc::new(ChosenNonceHash::all_winning(Duration::from_millis(10)));
    let devices: Vec<Box<dyn ComputeDevice>> = vec![Box::new(BurstDevice::new(
        0,
        (0..20).collect(),
        Arc::default(),
    ))];
    let (submitter, submissions) = submission_channel();
    let scheduler = Scheduler::start(hash, devices, submitter, fast_settings(1000)).unwrap();
    let shares = scheduler.shares();
    let mut client = StratumClient::new(
        PoolConfig::new(url, "wallet"),
        AlgorithmType::RandomX,
        scheduler.jobs(),
        scheduler.shares(),
        submissions,
    );
    client.connect().await.unwrap();
    client.authorize().await.unwrap();

    while shares.snapshot().shares_submitted == 0 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let report = client.close(scheduler).await.unwrap();
    drop(client);

    assert_eq!(report.verifier.processed, 20);
    assert_eq!(report.verifier.submitted, 20);
    assert_eq!(report.verifier.dropped, 0);
    assert_eq!(pool.await.unwrap(), 20);
}

#[test]
fn scheduler_needs_at_least_one_device() {
    let hash = Arc::new(ChosenNonceHash::winning(&[]));
    let result = Scheduler::start(hash, Vec::new(), CollectingSink::default(), fast_settings(8));
    assert!(matches!(result, Err(MinerError::ConfigError(_))));
}
