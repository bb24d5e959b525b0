// src/miner/verifier.rs
//! Authoritative result verification
//!
//! The verifier is the only consumer of the result stream and the only
//! owner of its scratch context. `verify` takes `&mut self`, so the
//! context can never be used by two threads at once; no lock is needed.

use crate::miner::algorithm::HashFunction;
use crate::miner::job::{CandidateResult, Digest, Job};
use crate::stats::ShareStats;
use crate::types::DeviceId;
use crate::utils::error::MinerError;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A verified solution in the form the pool expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Pool job identifier
    pub job_id: String,
    /// Nonce as 8 hex chars of its little-endian bytes
    pub nonce: String,
    /// Digest as 64 hex chars
    pub result: String,
    /// Device that found it, for logs
    pub device: DeviceId,
}

impl Submission {
    /// Encodes a verified nonce and digest for `job`
    ///
    /// Fails when the nonce does not carry the job's extranonce prefix;
    /// the pool would reject such a share outright.
    pub fn encode(
        job: &Job,
        nonce: u32,
        digest: &Digest,
        device: DeviceId,
    ) -> Result<Self, MinerError> {
        if !job.owns_nonce(nonce) {
            return Err(MinerError::EncodeError(format!(
                "nonce {:08x} lacks extranonce {:02x?} of job {}",
                nonce, job.extranonce, job.job_id
            )));
        }
        Ok(Submission {
            job_id: job.job_id.clone(),
            nonce: hex::encode(nonce.to_le_bytes()),
            result: hex::encode(digest),
            device,
        })
    }
}

/// Where accepted solutions go
pub trait SubmissionSink: Send {
    /// Hands one solution over; errors only affect this solution
    fn submit(&self, submission: Submission) -> Result<(), MinerError>;
}

/// Sink that logs solutions instead of sending them anywhere
///
/// Used by the benchmark, which has no pool.
#[derive(Debug, Default, Clone)]
pub struct LoggingSink {
    count: Arc<AtomicU64>,
}

impl LoggingSink {
    /// Creates a sink with a zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Solutions received so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl SubmissionSink for LoggingSink {
    fn submit(&self, submission: Submission) -> Result<(), MinerError> {
        self.count.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "{} solution for job {}: nonce {} result {}",
            submission.device,
            submission.job_id,
            submission.nonce,
            submission.result
        );
        Ok(())
    }
}

/// What happened to one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Verified and handed to the sink
    Submitted,
    /// Did not meet the target on re-hash
    Rejected,
    /// Lost to a recoverable error (hash, encode or submit)
    Dropped,
}

/// Totals returned when the verifier exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifierSummary {
    /// Candidates consumed from the stream
    pub processed: u64,
    /// Candidates submitted
    pub submitted: u64,
    /// Candidates rejected on re-hash
    pub rejected: u64,
    /// Candidates dropped on errors
    pub dropped: u64,
}

/// Single consumer of the result stream
pub struct ResultVerifier<H: HashFunction, S: SubmissionSink> {
    hash: Arc<H>,
    ctx: H::Context,
    sink: S,
    stats: Arc<ShareStats>,
    summary: VerifierSummary,
}

impl<H: HashFunction, S: SubmissionSink> ResultVerifier<H, S> {
    /// Allocates the verification context
    ///
    /// This is the one expensive setup step; failure is fatal to the
    /// process because nothing can be submitted without it.
    pub fn new(hash: Arc<H>, sink: S, stats: Arc<ShareStats>) -> Result<Self, MinerError> {
        let ctx = hash
            .new_scratch_context()
            .map_err(|e| MinerError::ScratchError(e.to_string()))?;
        log::info!("Verification context ready ({})", hash.algorithm_type());
        Ok(ResultVerifier {
            hash,
            ctx,
            sink,
            stats,
            summary: VerifierSummary::default(),
        })
    }

    /// Re-hashes a candidate and checks it against its job target
    pub fn verify(&mut self, candidate: &CandidateResult) -> Result<(Digest, bool), MinerError> {
        self.hash
            .hash_against(&candidate.job, candidate.nonce, &mut self.ctx)
    }

    /// Verifies one candidate and submits it when it holds up
    pub fn process(&mut self, candidate: CandidateResult) -> Verdict {
        self.summary.processed += 1;
        let verdict = self.judge(&candidate);
        match verdict {
            Verdict::Submitted => {
                self.summary.submitted += 1;
                self.stats.record_submitted();
            }
            Verdict::Rejected => {
                self.summary.rejected += 1;
                self.stats.record_false_positive();
            }
            Verdict::Dropped => {
                self.summary.dropped += 1;
                self.stats.record_dropped();
            }
        }
        verdict
    }

    fn judge(&mut self, candidate: &CandidateResult) -> Verdict {
        let (digest, accepted) = match self.verify(candidate) {
            Ok(v) => v,
            Err(e) => {
                log::error!(
                    "Verification of {} nonce {:08x} failed: {}",
                    candidate.device,
                    candidate.nonce,
                    e
                );
                return Verdict::Dropped;
            }
        };

        if let Some(reported) = candidate.digest {
            if reported != digest {
                log::warn!(
                    "{} reported a digest for nonce {:08x} that does not match the verifier",
                    candidate.device,
                    candidate.nonce
                );
            }
        }

        if !accepted {
            log::warn!(
                "{} COMPUTE ERROR: nonce {:08x} for job {} misses the target",
                candidate.device,
                candidate.nonce,
                candidate.job.job_id
            );
            return Verdict::Rejected;
        }

        let submission =
            match Submission::encode(&candidate.job, candidate.nonce, &digest, candidate.device) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Dropping solution from {}: {}", candidate.device, e);
                    return Verdict::Dropped;
                }
            };

        log::info!(
            "{} found a share for job {} (nonce {})",
            candidate.device,
            submission.job_id,
            submission.nonce
        );
        match self.sink.submit(submission) {
            Ok(()) => Verdict::Submitted,
            Err(e) => {
                log::error!("Submitting share from {} failed: {}", candidate.device, e);
                Verdict::Dropped
            }
        }
    }

    /// Consumes the stream in arrival order until it is closed and drained
    pub fn run(self, results: Receiver<CandidateResult>) -> VerifierSummary {
        self.run_until(results, crossbeam_channel::never())
    }

    /// Like [`run`](Self::run), but also stops once `stop` disconnects
    ///
    /// Whatever is queued when `stop` fires is still verified. This lets the
    /// verifier finish while a hung producer keeps its sender alive.
    pub fn run_until(
        mut self,
        results: Receiver<CandidateResult>,
        stop: Receiver<()>,
    ) -> VerifierSummary {
        loop {
            crossbeam_channel::select! {
                recv(results) -> candidate => match candidate {
                    Ok(candidate) => {
                        self.process(candidate);
                    }
                    Err(_) => break,
                },
                recv(stop) -> _ => {
                    while let Ok(candidate) = results.try_recv() {
                        self.process(candidate);
                    }
                    break;
                }
            }
        }
        log::debug!("Result stream closed, verifier exiting");
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::job::Target;
    use crate::types::AlgorithmType;
    use hex_literal::hex;
    use std::sync::Mutex;

    /// Comparison value equals the nonce
    struct NonceHash;

    impl HashFunction for NonceHash {
        type Context = ();

        fn new_scratch_context(&self) -> Result<(), MinerError> {
            Ok(())
        }

        fn hash(&self, _blob: &[u8], nonce: u32, _ctx: &mut ()) -> Result<Digest, MinerError> {
            let mut d = [0u8; 32];
            d[24..32].copy_from_slice(&u64::from(nonce).to_le_bytes());
            Ok(d)
        }

        fn algorithm_type(&self) -> AlgorithmType {
            AlgorithmType::CryptoNightR
        }
    }

    struct NoScratch;

    impl HashFunction for NoScratch {
        type Context = ();

        fn new_scratch_context(&self) -> Result<(), MinerError> {
            Err(MinerError::AlgorithmError("hugepages unavailable".into()))
        }

        fn hash(&self, _: &[u8], _: u32, _: &mut ()) -> Result<Digest, MinerError> {
            unreachable!()
        }

        fn algorithm_type(&self) -> AlgorithmType {
            AlgorithmType::RandomX
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<Submission>>>,
        fail: bool,
    }

    impl SubmissionSink for Recorder {
        fn submit(&self, submission: Submission) -> Result<(), MinerError> {
            if self.fail {
                return Err(MinerError::ConnectionError("pool gone".into()));
            }
            self.seen.lock().unwrap().push(submission);
            Ok(())
        }
    }

    fn job(threshold: u64, extranonce: Option<u8>) -> Arc<Job> {
        Arc::new(Job::new("j1", vec![0u8; 76], Target::from_u64(threshold), extranonce).unwrap())
    }

    fn candidate(job: &Arc<Job>, nonce: u32) -> CandidateResult {
        CandidateResult {
            device: DeviceId::gpu(0),
            job: Arc::clone(job),
            nonce,
            digest: None,
        }
    }

    #[test]
    fn submission_encoding_matches_the_stratum_format() {
        let j = job(u64::MAX, None);
        let digest = hex!("00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff");
        let s = Submission::encode(&j, 0x0403_0201, &digest, DeviceId::cpu(0)).unwrap();
        assert_eq!(s.nonce, "01020304");
        assert_eq!(
            s.result,
            "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
        );
        assert_eq!(s.job_id, "j1");
    }

    #[test]
    fn encoding_refuses_nonces_outside_the_extranonce() {
        let j = job(u64::MAX, Some(0x7f));
        assert!(Submission::encode(&j, 0x7f00_0001, &[0; 32], DeviceId::cpu(0)).is_ok());
        assert!(matches!(
            Submission::encode(&j, 0x0000_0001, &[0; 32], DeviceId::cpu(0)),
            Err(MinerError::EncodeError(_))
        ));
    }

    #[test]
    fn scratch_failure_is_reported_as_fatal_error() {
        let err = ResultVerifier::new(Arc::new(NoScratch), Recorder::default(), Arc::default())
            .err()
            .unwrap();
        assert!(matches!(err, MinerError::ScratchError(_)));
    }

    #[test]
    fn accepts_exactly_the_nonces_meeting_the_target_in_any_order() {
        let j = job(100, None);
        let nonces = [150u32, 3, 99, 100, 42, 1000, 0];
        for order in [nonces.to_vec(), nonces.iter().rev().copied().collect()] {
            let sink = Recorder::default();
            let stats = Arc::new(ShareStats::new());
            let mut v = ResultVerifier::new(Arc::new(NonceHash), sink.clone(), stats.clone())
                .unwrap();
            for n in order {
                v.process(candidate(&j, n));
            }
            let mut submitted: Vec<String> =
                sink.seen.lock().unwrap().iter().map(|s| s.nonce.clone()).collect();
            submitted.sort();
            let mut expected: Vec<String> = [0u32, 3, 42, 99]
                .iter()
                .map(|n| hex::encode(n.to_le_bytes()))
                .collect();
            expected.sort();
            assert_eq!(submitted, expected);
            assert_eq!(stats.snapshot().false_positives, 3);
        }
    }

    #[test]
    fn sink_failures_drop_only_that_candidate() {
        let j = job(u64::MAX, None);
        let sink = Recorder {
            fail: true,
            ..Default::default()
        };
        let mut v = ResultVerifier::new(Arc::new(NonceHash), sink, Arc::default()).unwrap();
        assert_eq!(v.process(candidate(&j, 1)), Verdict::Dropped);
        assert_eq!(v.process(candidate(&j, 2)), Verdict::Dropped);
        assert_eq!(v.summary.dropped, 2);
    }

    #[test]
    fn mismatched_device_digest_still_uses_verifier_result() {
        let j = job(10, None);
        let sink = Recorder::default();
        let mut v = ResultVerifier::new(Arc::new(NonceHash), sink.clone(), Arc::default()).unwrap();
        let mut c = candidate(&j, 5);
        c.digest = Some([0xee; 32]);
        assert_eq!(v.process(c), Verdict::Submitted);
        let seen = sink.seen.lock().unwrap();
        assert!(seen[0].result.ends_with("0500000000000000"));
    }

    #[test]
    fn run_drains_everything_queued_before_close() {
        let j = job(u64::MAX, None);
        let (tx, rx) = crossbeam_channel::bounded(8);
        for n in 0..8 {
            tx.send(candidate(&j, n)).unwrap();
        }
        drop(tx);
        let v = ResultVerifier::new(Arc::new(NonceHash), LoggingSink::new(), Arc::default())
            .unwrap();
        let summary = v.run(rx);
        assert_eq!(summary.processed, 8);
        assert_eq!(summary.submitted, 8);
    }

    #[test]
    fn stop_signal_ends_the_run_with_a_producer_still_attached() {
        let j = job(u64::MAX, None);
        let (tx, rx) = crossbeam_channel::bounded(8);
        for n in 0..5 {
            tx.send(candidate(&j, n)).unwrap();
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        drop(stop_tx);
        let v = ResultVerifier::new(Arc::new(NonceHash), LoggingSink::new(), Arc::default())
            .unwrap();
        let summary = v.run_until(rx, stop_rx);
        assert_eq!(summary.processed, 5);
        // tx is still alive here
        drop(tx);
    }
}
