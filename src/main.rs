// src/main.rs
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use xmr_pipeline::config::Config;
use xmr_pipeline::miner::algorithm::randomx::KEY_LEN;
use xmr_pipeline::miner::{
    ComputeDevice, CpuDevice, CryptoNightAlgo, HashFunction, Job, LoggingSink, PipelineSettings,
    RandomX, Scheduler, Target,
};
use xmr_pipeline::network::{StratumClient, submission_channel};
use xmr_pipeline::utils::init_bench_logging;
use xmr_pipeline::{AlgorithmType, MinerError, cli, config, utils};

/// Blob length of the synthetic benchmark job
const BENCH_BLOB_LEN: usize = 76;

/// Main entry point for the miner
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails; the error is printed and
///   the process exits non-zero
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts),
        cli::Action::Benchmark(opts) => run_benchmark(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Starts the mining operation with given configuration options
///
/// # Operations
/// 1. Initializes logging
/// 2. Loads configuration and applies CLI overrides
/// 3. Builds the hash function for the configured algorithm
/// 4. Runs the pipeline against the pool until interrupted
fn start_mining(opts: cli::StartOptions) -> Result<(), MinerError> {
    utils::init_logging(opts.verbose);

    let mut config = config::load(&opts.config)?;
    // Apply CLI overrides
    if let Some(threads) = opts.threads {
        config.cpu.threads = threads;
    }
    if let Some(algo) = opts.algorithm {
        config.algorithm = algo;
    }
    config.validate()?;

    log::info!(
        "Mining {} with {} CPU threads and {} GPU threads",
        config.algorithm,
        config.cpu.threads,
        config.gpu.len()
    );

    match config.algorithm {
        AlgorithmType::RandomX => {
            let key = config.randomx.key_bytes()?;
            mine(Arc::new(RandomX::new(config.randomx.fast, &key)?), &config)
        }
        AlgorithmType::CryptoNightV7 | AlgorithmType::CryptoNightR => {
            mine(Arc::new(CryptoNightAlgo::new(config.algorithm)?), &config)
        }
    }
}

/// Runs the pipeline for one hash function against the configured pool
fn mine<H: HashFunction>(hash: Arc<H>, config: &Config) -> Result<(), MinerError> {
    let devices = build_devices(&hash, config)?;
    let (submitter, submissions) = submission_channel();
    let scheduler = Scheduler::start(hash, devices, submitter, config.pipeline.settings())?;

    let mut client = StratumClient::new(
        config.pool.clone(),
        config.algorithm,
        scheduler.jobs(),
        scheduler.shares(),
        submissions,
    );

    let rt = Runtime::new()?;
    let (outcome, report) = rt.block_on(async {
        let outcome = serve(&mut client, &scheduler).await;
        // the client still owns the submission queue while the pipeline drains
        (outcome, client.close(scheduler).await)
    });

    let report = report?;
    if let Some(rate) = report.last_rate {
        log::info!("Final hashrate: {:.1} H/s", rate.rate);
    }
    outcome
}

/// Mines until the pool gives up, Ctrl-C arrives or every device has failed
async fn serve(client: &mut StratumClient, scheduler: &Scheduler) -> Result<(), MinerError> {
    client.connect().await?;
    client.authorize().await?;

    tokio::select! {
        result = client.run() => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            log::info!("Interrupted, shutting down");
            Ok(())
        }
        failed = watch_devices(scheduler) => Err(MinerError::AllDevicesFailed(failed)),
    }
}

/// Resolves once every device worker has ended in the errored state
async fn watch_devices(scheduler: &Scheduler) -> usize {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if scheduler.all_devices_failed() {
            return scheduler.failed_devices();
        }
    }
}

/// One CPU device per configured thread, then the GPU threads
fn build_devices<H: HashFunction>(
    hash: &Arc<H>,
    config: &Config,
) -> Result<Vec<Box<dyn ComputeDevice>>, MinerError> {
    let mut devices: Vec<Box<dyn ComputeDevice>> = (0..config.cpu.threads)
        .map(|index| {
            Box::new(CpuDevice::new(
                index,
                Arc::clone(hash),
                config.cpu.batch_size,
                config.cpu.range_len,
            )) as Box<dyn ComputeDevice>
        })
        .collect();
    devices.extend(gpu_devices(config)?);
    Ok(devices)
}

#[cfg(feature = "opencl")]
fn gpu_devices(config: &Config) -> Result<Vec<Box<dyn ComputeDevice>>, MinerError> {
    use xmr_pipeline::miner::GpuDevice;
    use xmr_pipeline::miner::device::opencl::OclBackend;

    Ok(config
        .gpu
        .iter()
        .map(|gpu| {
            let backend = OclBackend::new(
                config.opencl.platform,
                gpu.index,
                gpu.worksize,
                config.opencl.kernel_path.clone(),
            );
            Box::new(GpuDevice::new(gpu.index, backend, gpu.intensity)) as Box<dyn ComputeDevice>
        })
        .collect())
}

#[cfg(not(feature = "opencl"))]
fn gpu_devices(config: &Config) -> Result<Vec<Box<dyn ComputeDevice>>, MinerError> {
    if config.gpu.is_empty() {
        Ok(Vec::new())
    } else {
        Err(MinerError::ConfigError(
            "[[gpu]] threads need a build with the opencl feature".into(),
        ))
    }
}

/// Runs the full pipeline against a local synthetic job
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Creates specified algorithm instance (RandomX in light mode)
/// 3. Publishes one job and lets the CPU devices mine it
/// 4. Reports the hashrate and verified solutions
fn run_benchmark(opts: cli::BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    match opts.algorithm {
        AlgorithmType::RandomX => bench(Arc::new(RandomX::new(false, &[0u8; KEY_LEN])?), &opts),
        other => bench(Arc::new(CryptoNightAlgo::new(other)?), &opts),
    }
}

fn bench<H: HashFunction>(hash: Arc<H>, opts: &cli::BenchmarkOptions) -> Result<(), MinerError> {
    let devices: Vec<Box<dyn ComputeDevice>> = (0..opts.threads.max(1))
        .map(|index| {
            Box::new(CpuDevice::new(index, Arc::clone(&hash), 16, 1024)) as Box<dyn ComputeDevice>
        })
        .collect();

    let sink = LoggingSink::new();
    let settings = PipelineSettings {
        report_interval: Duration::from_secs(5),
        hardware_stats: true,
        ..PipelineSettings::default()
    };
    let scheduler = Scheduler::start(hash, devices, sink.clone(), settings)?;

    let target = Target::from_u64(u64::MAX / opts.difficulty.max(1));
    scheduler
        .jobs()
        .publish(Job::new("benchmark", vec![0u8; BENCH_BLOB_LEN], target, None)?);

    log::info!(
        "Starting {} benchmark for {} seconds",
        opts.algorithm,
        opts.duration
    );
    std::thread::sleep(Duration::from_secs(opts.duration));

    let report = scheduler.shutdown()?;
    log::info!("Benchmark results:");
    match report.last_rate {
        Some(rate) => log::info!(
            "Hashrate: {:.2} H/s ({} hashes in the last {:.1}s)",
            rate.rate,
            rate.hashes,
            rate.elapsed.as_secs_f64()
        ),
        None => log::info!("No hashes completed"),
    }
    log::info!(
        "Solutions: {} verified, {} rejected by verification",
        sink.count(),
        report.verifier.rejected
    );
    log::logger().flush(); // Ensure final results appear

    Ok(())
}

/// Generates configuration template file
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let config = config::generate_template(opts.gpu);
    std::fs::write(&opts.output, config)?;
    println!("Configuration template written to {}", opts.output.display());
    Ok(())
}
