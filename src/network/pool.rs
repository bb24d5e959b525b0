// src/network/pool.rs

//! Mining pool client implementation
//!
//! Speaks Monero stratum over TCP or WebSocket. Jobs pushed by the pool go
//! straight into the [`JobHolder`]; verified shares arrive from the verifier
//! thread through a [`PoolSubmitter`].
use crate::miner::job::JobHolder;
use crate::miner::scheduler::{Scheduler, ShutdownReport};
use crate::miner::verifier::{Submission, SubmissionSink};
use crate::network::protocol::{
    self, Incoming, JobNotice, LOGIN_ID, keepalive_request, login_request, parse_job,
    parse_login, parse_message, share_accepted, submit_request,
};
use crate::network::transport::Transport;
use crate::stats::ShareStats;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

/// How long the pool gets to answer the login request
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for the reconnect backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How long shares verified during shutdown may take to reach the pool
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn default_password() -> String {
    "x".into()
}

fn default_keepalive_secs() -> u64 {
    60
}

fn default_retries() -> u32 {
    5
}

fn default_retry_pause_secs() -> u64 {
    5
}

/// Configuration for connecting to a mining pool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Pool connection URL (e.g., "stratum+tcp://pool.example.com:3333")
    pub url: String,
    /// Wallet address or pool username
    pub user: String,
    /// Worker password (often "x" if not required)
    #[serde(default = "default_password")]
    pub password: String,
    /// Send `keepalived` pings
    #[serde(default)]
    pub keepalive: bool,
    /// Seconds between keepalive pings
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Pool reserves the top nonce byte
    #[serde(default)]
    pub nicehash: bool,
    /// Reconnect attempts after a drop; 0 retries forever
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// First reconnect delay in seconds; doubles on every failed attempt
    #[serde(default = "default_retry_pause_secs")]
    pub retry_pause_secs: u64,
}

impl PoolConfig {
    /// Config with protocol defaults for `url` and `user`
    pub fn new(url: impl Into<String>, user: impl Into<String>) -> Self {
        PoolConfig {
            url: url.into(),
            user: user.into(),
            password: default_password(),
            keepalive: false,
            keepalive_secs: default_keepalive_secs(),
            nicehash: false,
            retries: default_retries(),
            retry_pause_secs: default_retry_pause_secs(),
        }
    }
}

/// Submission sink that forwards shares to the pool client
///
/// Never blocks the verifier; shares queue until the client sends them.
#[derive(Debug, Clone)]
pub struct PoolSubmitter {
    tx: mpsc::UnboundedSender<Submission>,
}

impl SubmissionSink for PoolSubmitter {
    fn submit(&self, submission: Submission) -> Result<(), MinerError> {
        self.tx
            .send(submission)
            .map_err(|_| MinerError::ChannelError("pool client has stopped".into()))
    }
}

/// Creates the channel between the verifier and the pool client
pub fn submission_channel() -> (PoolSubmitter, mpsc::UnboundedReceiver<Submission>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PoolSubmitter { tx }, rx)
}

/// Delay before reconnect attempt `attempt` (1-based)
pub(crate) fn backoff(first: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    first.saturating_mul(factor).min(MAX_BACKOFF)
}

enum Event {
    Message(Result<Option<String>, MinerError>),
    Submission(Option<Submission>),
    Keepalive,
}

/// Client for communicating with a mining pool
///
/// Handles all pool protocol interactions including:
/// - Connection management and reconnects
/// - Job distribution through the job holder
/// - Share submission and verdict counting
/// - Keepalive messages
pub struct StratumClient {
    config: PoolConfig,
    algorithm: AlgorithmType,
    jobs: Arc<JobHolder>,
    shares: Arc<ShareStats>,
    submissions: mpsc::UnboundedReceiver<Submission>,
    transport: Option<Transport>,
    session: Option<String>,
    next_id: u64,
    pending: HashMap<u64, Submission>,
}

impl StratumClient {
    /// Creates a new client; nothing is sent until [`connect`](Self::connect)
    ///
    /// # Arguments
    /// * `config` - Pool connection configuration
    /// * `algorithm` - Jobs naming another algorithm are not mined
    /// * `jobs` - Where new jobs are published
    /// * `shares` - Counters for pool verdicts
    /// * `submissions` - Receiving end of [`submission_channel`]
    pub fn new(
        config: PoolConfig,
        algorithm: AlgorithmType,
        jobs: Arc<JobHolder>,
        shares: Arc<ShareStats>,
        submissions: mpsc::UnboundedReceiver<Submission>,
    ) -> Self {
        StratumClient {
            config,
            algorithm,
            jobs,
            shares,
            submissions,
            transport: None,
            session: None,
            next_id: LOGIN_ID + 1,
            pending: HashMap::new(),
        }
    }

    /// Establishes connection to the mining pool
    ///
    /// # Errors
    /// Returns `MinerError` if the URL is invalid or the pool is unreachable
    pub async fn connect(&mut self) -> Result<(), MinerError> {
        let transport = Transport::connect(&self.config.url).await?;
        log::info!("Connected to pool {}", self.config.url);
        self.transport = Some(transport);
        Ok(())
    }

    /// Logs in and publishes the first job if the pool sent one
    ///
    /// # Errors
    /// Returns `MinerError::AuthError` if the pool refuses the login or does
    /// not answer within 30 seconds
    pub async fn authorize(&mut self) -> Result<(), MinerError> {
        let request = login_request(&self.config.user, &self.config.password);
        self.send(&request).await?;

        let (result, error) = time::timeout(LOGIN_TIMEOUT, self.await_response(LOGIN_ID))
            .await
            .map_err(|_| {
                MinerError::AuthError(format!(
                    "no login response within {}s",
                    LOGIN_TIMEOUT.as_secs()
                ))
            })??;
        let session = parse_login(result.as_ref(), error.as_ref(), self.config.nicehash)?;
        log::info!("Logged in to {} (session {})", self.config.url, session.id);
        self.session = Some(session.id);
        if let Some(notice) = session.job {
            self.accept_job(notice);
        }
        Ok(())
    }

    /// Main event loop for pool communication
    ///
    /// Reconnects after a dropped connection. Returns `Ok` once every
    /// [`PoolSubmitter`] is gone.
    ///
    /// # Errors
    /// Returns `MinerError` when reconnect attempts are exhausted
    pub async fn run(&mut self) -> Result<(), MinerError> {
        loop {
            match self.session_loop().await {
                Ok(()) => {
                    log::info!("Submission channel closed, leaving pool");
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("Pool connection lost: {}", e);
                    self.drop_session();
                    self.reconnect().await?;
                }
            }
        }
    }

    /// Stops `scheduler` and sends the shares it verified on the way down
    ///
    /// The verifier drains the result stream into the submission queue,
    /// which this client still owns, so no verified share is refused. The
    /// queue is then flushed to the pool.
    ///
    /// # Errors
    /// Returns the scheduler's shutdown error; flush problems are only logged
    pub async fn close(&mut self, scheduler: Scheduler) -> Result<ShutdownReport, MinerError> {
        let report = tokio::task::spawn_blocking(move || scheduler.shutdown()).await??;
        match time::timeout(FLUSH_TIMEOUT, self.flush()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(sent)) => log::info!("Sent {} shares verified during shutdown", sent),
            Ok(Err(e)) => log::warn!("Could not send the remaining shares: {}", e),
            Err(_) => log::warn!(
                "Gave up sending the remaining shares after {}s",
                FLUSH_TIMEOUT.as_secs()
            ),
        }
        Ok(report)
    }

    /// Sends every queued share until all submitters are gone
    ///
    /// Waits for new shares while any [`PoolSubmitter`] is alive. Shares that
    /// arrive without a connection are counted as dropped.
    pub async fn flush(&mut self) -> Result<usize, MinerError> {
        let mut sent = 0;
        while let Some(submission) = self.submissions.recv().await {
            if self.transport.is_none() || self.session.is_none() {
                log::debug!("Not connected, dropping share for job {}", submission.job_id);
                self.shares.record_dropped();
                continue;
            }
            self.submit(submission).await?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn session_loop(&mut self) -> Result<(), MinerError> {
        let keepalive_enabled = self.config.keepalive;
        let mut keepalive = time::interval(Duration::from_secs(self.config.keepalive_secs.max(1)));
        keepalive.tick().await;

        loop {
            let event = {
                let transport = self
                    .transport
                    .as_mut()
                    .ok_or_else(|| MinerError::ConnectionError("Not connected".into()))?;
                tokio::select! {
                    msg = transport.recv() => Event::Message(msg),
                    submission = self.submissions.recv() => Event::Submission(submission),
                    _ = keepalive.tick(), if keepalive_enabled => Event::Keepalive,
                }
            };

            match event {
                Event::Message(msg) => match msg? {
                    Some(text) => self.handle_message(&text),
                    None => {
                        return Err(MinerError::ConnectionError(
                            "pool closed the connection".into(),
                        ));
                    }
                },
                Event::Submission(Some(submission)) => self.submit(submission).await?,
                Event::Submission(None) => return Ok(()),
                Event::Keepalive => self.keep_alive().await?,
            }
        }
    }

    /// Forgets everything tied to the lost connection
    fn drop_session(&mut self) {
        self.transport = None;
        self.session = None;
        self.jobs.clear();
        if !self.pending.is_empty() {
            log::warn!("{} submitted shares lost their verdict", self.pending.len());
            self.pending.clear();
        }
        self.discard_queued();
    }

    fn discard_queued(&mut self) {
        let mut discarded = 0;
        while let Ok(submission) = self.submissions.try_recv() {
            log::debug!("Discarding share for job {}", submission.job_id);
            self.shares.record_dropped();
            discarded += 1;
        }
        if discarded > 0 {
            log::warn!("Discarded {} shares queued for the old session", discarded);
        }
    }

    async fn reconnect(&mut self) -> Result<(), MinerError> {
        let first = Duration::from_secs(self.config.retry_pause_secs);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.config.retries != 0 && attempt > self.config.retries {
                return Err(MinerError::ConnectionError(format!(
                    "giving up on {} after {} reconnect attempts",
                    self.config.url, self.config.retries
                )));
            }

            let delay = backoff(first, attempt);
            log::info!("Reconnecting to {} in {:?} (attempt {})", self.config.url, delay, attempt);
            time::sleep(delay).await;

            match self.establish().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("Reconnect attempt {} failed: {}", attempt, e);
                    self.transport = None;
                }
            }
        }
    }

    async fn establish(&mut self) -> Result<(), MinerError> {
        self.connect().await?;
        self.discard_queued();
        self.authorize().await
    }

    async fn await_response(
        &mut self,
        id: u64,
    ) -> Result<(Option<Value>, Option<Value>), MinerError> {
        loop {
            let text = self
                .transport
                .as_mut()
                .ok_or_else(|| MinerError::ConnectionError("Not connected".into()))?
                .recv()
                .await?
                .ok_or_else(|| {
                    MinerError::ConnectionError("pool closed the connection".into())
                })?;
            match parse_message(&text)? {
                Incoming::Response {
                    id: got,
                    result,
                    error,
                } if got == id => return Ok((result, error)),
                Incoming::Job(params) => self.handle_job(&params),
                other => log::debug!("Ignoring {:?} while waiting for response {}", other, id),
            }
        }
    }

    /// Handles one message from the pool; malformed messages are logged
    fn handle_message(&mut self, text: &str) {
        match parse_message(text) {
            Ok(Incoming::Job(params)) => self.handle_job(&params),
            Ok(Incoming::Response { id, result, error }) => {
                self.handle_response(id, result.as_ref(), error.as_ref())
            }
            Ok(Incoming::Unknown(method)) => log::debug!("Unknown method received: {}", method),
            Err(e) => log::warn!("Unreadable pool message: {}", e),
        }
    }

    fn handle_job(&mut self, params: &Value) {
        match parse_job(params, self.config.nicehash) {
            Ok(notice) => self.accept_job(notice),
            Err(e) => log::warn!("Invalid job from pool: {}", e),
        }
    }

    fn accept_job(&mut self, notice: JobNotice) {
        if let Some(algo) = &notice.algo {
            if algo.parse::<AlgorithmType>().ok() != Some(self.algorithm) {
                log::warn!(
                    "Pool sent job {} for {}, mining {}; idling until a matching job",
                    notice.job.job_id,
                    algo,
                    self.algorithm
                );
                self.jobs.clear();
                return;
            }
        }
        let job_id = notice.job.job_id.clone();
        let difficulty = notice.job.target.difficulty();
        let generation = self.jobs.publish(notice.job);
        log::info!(
            "New job {} (difficulty {}, generation {})",
            job_id,
            difficulty,
            generation
        );
    }

    fn handle_response(&mut self, id: u64, result: Option<&Value>, error: Option<&Value>) {
        match self.pending.remove(&id) {
            Some(submission) => {
                if share_accepted(result, error) {
                    self.shares.record_pool_accepted();
                    log::info!(
                        "Share accepted (job {}, {})",
                        submission.job_id,
                        submission.device
                    );
                } else {
                    self.shares.record_pool_rejected();
                    log::warn!(
                        "Share rejected (job {}, {}): {}",
                        submission.job_id,
                        submission.device,
                        error.map(protocol::error_message).unwrap_or_default()
                    );
                }
            }
            None => {
                if let Some(error) = error {
                    log::warn!("Pool error for request {}: {}", id, protocol::error_message(error));
                }
            }
        }
    }

    /// Submits a verified share to the mining pool
    async fn submit(&mut self, submission: Submission) -> Result<(), MinerError> {
        let Some(session) = self.session.clone() else {
            log::warn!("Not logged in, dropping share for job {}", submission.job_id);
            self.shares.record_dropped();
            return Ok(());
        };
        let id = self.take_id();
        self.send(&submit_request(id, &session, &submission)).await?;
        log::info!(
            "Submitted share from {} for job {} (nonce {})",
            submission.device,
            submission.job_id,
            submission.nonce
        );
        self.pending.insert(id, submission);
        Ok(())
    }

    /// Sends keepalive message to maintain connection
    async fn keep_alive(&mut self) -> Result<(), MinerError> {
        if let Some(session) = self.session.clone() {
            let id = self.take_id();
            self.send(&keepalive_request(id, &session)).await?;
        }
        Ok(())
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn send(&mut self, value: &Value) -> Result<(), MinerError> {
        self.transport
            .as_mut()
            .ok_or_else(|| MinerError::ConnectionError("Not connected".into()))?
            .send(value)
            .await
    }
}
