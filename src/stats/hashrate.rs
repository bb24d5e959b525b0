// src/stats/hashrate.rs
//! Windowed hashrate aggregation
//!
//! Device workers offer [`HashRateSample`]s on a bounded side channel. The
//! channel never blocks a worker: when it is full the newest sample is
//! dropped, so telemetry degrades before candidate delivery does.

use crate::stats::reporter::{HardwareMonitor, HardwareStats, MiningStats, ShareStats};
use crate::types::DeviceId;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Hashes done by one device since its previous sample
#[derive(Debug, Clone, Copy)]
pub struct HashRateSample {
    /// Reporting device
    pub device: DeviceId,
    /// Hashes since the previous sample
    pub hashes: u64,
    /// When the sample was taken
    pub at: Instant,
}

/// Producer half of the sample channel
#[derive(Clone)]
pub struct SampleSender {
    tx: Sender<HashRateSample>,
    dropped: Arc<AtomicU64>,
}

impl SampleSender {
    /// Offers a sample without blocking; drops it if the channel is full
    pub fn offer(&self, sample: HashRateSample) {
        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Samples dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Creates the bounded sample channel
pub fn sample_channel(capacity: usize) -> (SampleSender, Receiver<HashRateSample>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (
        SampleSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Rate computed for one closed window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    /// Hashes per second over the window
    pub rate: f64,
    /// Hashes counted in the window
    pub hashes: u64,
    /// Wall-clock length of the window
    pub elapsed: Duration,
    /// Hashes per device, sorted by device
    pub per_device: Vec<(DeviceId, u64)>,
}

/// Rolling accumulator reset at every window boundary
#[derive(Debug)]
pub struct HashrateWindow {
    length: Duration,
    started: Instant,
    accumulated: u64,
    per_device: HashMap<DeviceId, u64>,
}

impl HashrateWindow {
    /// Opens a window of `length` starting at `started`
    pub fn new(length: Duration, started: Instant) -> Self {
        HashrateWindow {
            length,
            started,
            accumulated: 0,
            per_device: HashMap::new(),
        }
    }

    /// Adds a sample to the open window
    pub fn record(&mut self, sample: &HashRateSample) {
        self.accumulated += sample.hashes;
        *self.per_device.entry(sample.device).or_insert(0) += sample.hashes;
    }

    /// Hashes accumulated in the open window
    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }

    /// Time left before the window closes
    pub fn remaining(&self, now: Instant) -> Duration {
        self.length
            .saturating_sub(now.saturating_duration_since(self.started))
    }

    /// Closes the window if `now` has reached its boundary
    pub fn tick(&mut self, now: Instant) -> Option<WindowReport> {
        if now.saturating_duration_since(self.started) < self.length {
            return None;
        }
        Some(self.close(now))
    }

    /// Closes the window unconditionally
    pub fn close(&mut self, now: Instant) -> WindowReport {
        let elapsed = now.saturating_duration_since(self.started);
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.accumulated as f64 / secs
        } else {
            0.0
        };
        let mut per_device: Vec<(DeviceId, u64)> = self.per_device.drain().collect();
        per_device.sort_by_key(|(d, _)| (d.kind as u8, d.index));

        let report = WindowReport {
            rate,
            hashes: self.accumulated,
            elapsed,
            per_device,
        };
        self.accumulated = 0;
        self.started = now;
        report
    }
}

/// Consumes samples and logs a rate line every window
pub struct HashrateAggregator {
    window: HashrateWindow,
    shares: Arc<ShareStats>,
    hardware: Option<HardwareMonitor>,
    samples_dropped: Option<Arc<AtomicU64>>,
    last: Option<WindowReport>,
}

impl HashrateAggregator {
    /// Creates an aggregator reporting every `interval`
    ///
    /// # Arguments
    /// * `interval` - Window length
    /// * `shares` - Share counters included in the report line
    /// * `hardware` - Include CPU and memory usage in the report
    pub fn new(interval: Duration, shares: Arc<ShareStats>, hardware: bool) -> Self {
        HashrateAggregator {
            window: HashrateWindow::new(interval, Instant::now()),
            shares,
            hardware: hardware.then(HardwareMonitor::new),
            samples_dropped: None,
            last: None,
        }
    }

    /// Reports how many samples `sender` had to drop
    pub fn counting_drops_of(mut self, sender: &SampleSender) -> Self {
        self.samples_dropped = Some(Arc::clone(&sender.dropped));
        self
    }

    /// Runs until every sample sender is dropped
    ///
    /// Returns the last report, including a final partial window.
    pub fn run(self, samples: Receiver<HashRateSample>) -> Option<WindowReport> {
        self.run_until(samples, crossbeam_channel::never())
    }

    /// Like [`run`](Self::run), but also stops once `stop` disconnects
    pub fn run_until(
        mut self,
        samples: Receiver<HashRateSample>,
        stop: Receiver<()>,
    ) -> Option<WindowReport> {
        loop {
            let wait = self.window.remaining(Instant::now());
            crossbeam_channel::select! {
                recv(samples) -> sample => match sample {
                    Ok(sample) => {
                        self.tick();
                        self.window.record(&sample);
                    }
                    Err(_) => return self.finish(),
                },
                recv(stop) -> _ => {
                    while let Ok(sample) = samples.try_recv() {
                        self.window.record(&sample);
                    }
                    return self.finish();
                }
                recv(crossbeam_channel::after(wait)) -> _ => self.tick(),
            }
        }
    }

    fn tick(&mut self) {
        if let Some(report) = self.window.tick(Instant::now()) {
            self.emit(&report);
            self.last = Some(report);
        }
    }

    fn finish(mut self) -> Option<WindowReport> {
        if self.window.accumulated() > 0 {
            let report = self.window.close(Instant::now());
            self.emit(&report);
            self.last = Some(report);
        }
        self.last
    }

    fn emit(&mut self, report: &WindowReport) {
        let shares = self.shares.snapshot();
        let hardware = self.hardware.as_mut().map(HardwareMonitor::sample);
        match hardware {
            Some(hw) => log::info!(
                "Speed: {:.1} H/s | accepted {} rejected {} | CPU {:.1}%",
                report.rate,
                shares.pool_accepted,
                shares.pool_rejected,
                hw.cpu_usage
            ),
            None => log::info!(
                "Speed: {:.1} H/s | accepted {} rejected {}",
                report.rate,
                shares.pool_accepted,
                shares.pool_rejected
            ),
        }
        let dropped = self
            .samples_dropped
            .as_ref()
            .map_or(0, |d| d.load(Ordering::Relaxed));
        log::debug!("{}", detail_line(&shares, dropped, hardware));
        let secs = report.elapsed.as_secs_f64().max(f64::EPSILON);
        for (device, hashes) in &report.per_device {
            log::debug!("  {}: {:.1} H/s", device, *hashes as f64 / secs);
        }
    }
}

/// Verifier counters, telemetry loss and memory use for the debug log
fn detail_line(shares: &MiningStats, samples_dropped: u64, hw: Option<HardwareStats>) -> String {
    let mut line = format!(
        "Verifier: {} submitted, {} false positives, {} dropped | {} samples dropped",
        shares.shares_submitted, shares.false_positives, shares.shares_dropped, samples_dropped
    );
    if let Some(hw) = hw {
        line.push_str(&format!(" | memory {} MiB", hw.memory_used / (1024 * 1024)));
    }
    line
}
