// src/config/config.rs
use crate::{
    miner::{PipelineSettings, WorkerSettings, algorithm::randomx::KEY_LEN},
    network::pool::PoolConfig,
    types::AlgorithmType,
    utils::error::MinerError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the mining application
///
/// Contains all settings needed to run the pipeline: algorithm selection,
/// the pool, queue sizes and timings, and the CPU and GPU devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Mining algorithm to use (e.g., "randomx", "cryptonight-v7")
    #[serde(default = "default_algorithm")]
    pub algorithm: AlgorithmType,

    /// RandomX dataset settings
    #[serde(default)]
    pub randomx: RandomXConfig,

    /// Pool connection
    pub pool: PoolConfig,

    /// Queue capacities and timings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// CPU hashing threads
    #[serde(default)]
    pub cpu: CpuConfig,

    /// One entry per GPU thread
    #[serde(default)]
    pub gpu: Vec<GpuThreadConfig>,

    /// OpenCL platform and kernel
    #[serde(default)]
    pub opencl: OpenClConfig,
}

/// RandomX dataset settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RandomXConfig {
    /// Build the full dataset (~2 GiB) instead of the light cache
    pub fast: bool,
    /// 32-byte dataset key as hex
    pub key: String,
}

impl Default for RandomXConfig {
    fn default() -> Self {
        RandomXConfig {
            fast: false,
            key: "00".repeat(KEY_LEN),
        }
    }
}

impl RandomXConfig {
    /// Decoded dataset key
    pub fn key_bytes(&self) -> Result<Vec<u8>, MinerError> {
        let key = hex::decode(&self.key)
            .map_err(|e| MinerError::ConfigError(format!("randomx.key is not hex: {}", e)))?;
        if key.len() != KEY_LEN {
            return Err(MinerError::ConfigError(format!(
                "randomx.key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        Ok(key)
    }
}

/// Queue capacities and timings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candidates buffered between devices and the verifier
    pub result_capacity: usize,
    /// Hashrate samples buffered before new ones are dropped
    pub sample_capacity: usize,
    /// Seconds per hashrate window
    pub report_interval_secs: u64,
    /// Milliseconds between samples from one device
    pub sample_interval_ms: u64,
    /// Consecutive device failures before it is taken out of service
    pub max_device_failures: u32,
    /// Seconds without progress before a device counts as hung
    pub stall_timeout_secs: u64,
    /// Milliseconds an idle device waits between job checks
    pub job_poll_ms: u64,
    /// Add CPU usage to the hashrate line
    pub hardware_stats: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            result_capacity: 1000,
            sample_capacity: 256,
            report_interval_secs: 10,
            sample_interval_ms: 1000,
            max_device_failures: 5,
            stall_timeout_secs: 60,
            job_poll_ms: 100,
            hardware_stats: true,
        }
    }
}

impl PipelineConfig {
    /// Runtime settings for the scheduler
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            result_capacity: self.result_capacity,
            sample_capacity: self.sample_capacity,
            report_interval: Duration::from_secs(self.report_interval_secs),
            hardware_stats: self.hardware_stats,
            worker: WorkerSettings {
                sample_interval: Duration::from_millis(self.sample_interval_ms),
                max_failures: self.max_device_failures,
                stall_timeout: Duration::from_secs(self.stall_timeout_secs),
                job_poll: Duration::from_millis(self.job_poll_ms),
            },
        }
    }
}

/// CPU hashing threads
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CpuConfig {
    /// Number of CPU threads (0 disables CPU mining)
    pub threads: usize,
    /// Nonces hashed between result polls
    pub batch_size: u64,
    /// Nonces claimed from the job per range
    pub range_len: u64,
}

impl Default for CpuConfig {
    fn default() -> Self {
        CpuConfig {
            threads: num_cpus::get(),
            batch_size: 64,
            range_len: 4096,
        }
    }
}

/// One GPU thread
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpuThreadConfig {
    /// OpenCL device index on the platform
    pub index: usize,
    /// Work items per kernel launch
    pub intensity: u32,
    /// Local work size
    #[serde(default = "default_worksize")]
    pub worksize: usize,
}

/// OpenCL platform and kernel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenClConfig {
    /// Platform index
    pub platform: usize,
    /// Kernel source file with a `search` entry point
    pub kernel_path: PathBuf,
}

impl Default for OpenClConfig {
    fn default() -> Self {
        OpenClConfig {
            platform: 0,
            kernel_path: PathBuf::from("kernels/search.cl"),
        }
    }
}

fn default_algorithm() -> AlgorithmType {
    AlgorithmType::RandomX
}

fn default_worksize() -> usize {
    8
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but cannot run
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.cpu.threads == 0 && self.gpu.is_empty() {
            return Err(MinerError::ConfigError(
                "no devices: set cpu.threads or add a [[gpu]] entry".into(),
            ));
        }
        if self.pipeline.result_capacity == 0 {
            return Err(MinerError::ConfigError(
                "pipeline.result_capacity must be at least 1".into(),
            ));
        }
        if self.pipeline.report_interval_secs == 0 {
            return Err(MinerError::ConfigError(
                "pipeline.report_interval_secs must be at least 1".into(),
            ));
        }
        if self.cpu.batch_size == 0 || self.cpu.range_len == 0 {
            return Err(MinerError::ConfigError(
                "cpu.batch_size and cpu.range_len must be positive".into(),
            ));
        }
        if let Some(gpu) = self.gpu.iter().find(|g| g.intensity == 0 || g.worksize == 0) {
            return Err(MinerError::ConfigError(format!(
                "gpu {} needs positive intensity and worksize",
                gpu.index
            )));
        }
        if self.algorithm == AlgorithmType::RandomX {
            self.randomx.key_bytes()?;
        }
        Ok(())
    }

    /// Generates a configuration template string
    ///
    /// # Arguments
    /// * `gpu` - Include a GPU thread and the OpenCL section
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template(gpu: bool) -> String {
        let pipeline = PipelineConfig::default();
        let mut template = String::new();
        template.push_str("# XMR Pipeline Configuration\n\n");
        template.push_str("# Supported algorithms: randomx, cryptonight-v7, cryptonight-r\n");
        template.push_str("algorithm = \"randomx\"\n\n");

        template.push_str("[randomx]\n");
        template.push_str("# Full dataset (~2 GiB RAM) instead of the light cache\n");
        template.push_str("fast = false\n");
        template.push_str("# 32-byte dataset key, hex\n");
        template.push_str(&format!("key = \"{}\"\n\n", "00".repeat(KEY_LEN)));

        template.push_str("[pool]\n");
        template.push_str("# stratum+tcp://, tcp://, ws:// or wss://\n");
        template.push_str("url = \"stratum+tcp://pool.example.com:3333\"\n");
        template.push_str("user = \"your_wallet_address\"\n");
        template.push_str("password = \"x\"\n");
        template.push_str("keepalive = false\n");
        template.push_str("keepalive_secs = 60\n");
        template.push_str("# Pool reserves the top nonce byte\n");
        template.push_str("nicehash = false\n");
        template.push_str("# Reconnect attempts after a drop (0 = forever)\n");
        template.push_str("retries = 5\n");
        template.push_str("retry_pause_secs = 5\n\n");

        template.push_str("[pipeline]\n");
        template.push_str(&format!("result_capacity = {}\n", pipeline.result_capacity));
        template.push_str(&format!("sample_capacity = {}\n", pipeline.sample_capacity));
        template.push_str(&format!(
            "report_interval_secs = {}\n",
            pipeline.report_interval_secs
        ));
        template.push_str(&format!("sample_interval_ms = {}\n", pipeline.sample_interval_ms));
        template.push_str(&format!(
            "max_device_failures = {}\n",
            pipeline.max_device_failures
        ));
        template.push_str(&format!("stall_timeout_secs = {}\n", pipeline.stall_timeout_secs));
        template.push_str(&format!("job_poll_ms = {}\n", pipeline.job_poll_ms));
        template.push_str(&format!("hardware_stats = {}\n\n", pipeline.hardware_stats));

        template.push_str("[cpu]\n");
        template.push_str("# Number of CPU threads (0 = GPU only)\n");
        template.push_str(&format!("threads = {}\n", num_cpus::get()));
        template.push_str("batch_size = 64\n");
        template.push_str("range_len = 4096\n");

        if gpu {
            template.push_str("\n# One [[gpu]] block per GPU thread (needs the opencl feature)\n");
            template.push_str("[[gpu]]\n");
            template.push_str("index = 0\n");
            template.push_str("intensity = 1024\n");
            template.push_str("worksize = 8\n\n");
            template.push_str("[opencl]\n");
            template.push_str("platform = 0\n");
            template.push_str("kernel_path = \"kernels/search.cl\"\n");
        }

        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_back_with_defaults() {
        let config: Config = toml::from_str(&Config::generate_template(false)).unwrap();
        assert_eq!(config.algorithm, AlgorithmType::RandomX);
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.pool.url, "stratum+tcp://pool.example.com:3333");
        assert!(config.gpu.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn gpu_template_adds_threads_and_platform() {
        let config: Config = toml::from_str(&Config::generate_template(true)).unwrap();
        assert_eq!(
            config.gpu,
            vec![GpuThreadConfig {
                index: 0,
                intensity: 1024,
                worksize: 8
            }]
        );
        assert_eq!(config.opencl.kernel_path, PathBuf::from("kernels/search.cl"));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            algorithm = "cryptonight-r"
            [pool]
            url = "ws://pool.example.com:8080"
            user = "wallet"
            "#,
        )
        .unwrap();
        assert_eq!(config.algorithm, AlgorithmType::CryptoNightR);
        assert_eq!(config.pipeline.result_capacity, 1000);
        assert_eq!(config.cpu.threads, num_cpus::get());
        assert_eq!(config.pool.password, "x");
        let settings = config.pipeline.settings();
        assert_eq!(settings.worker.max_failures, 5);
        assert_eq!(settings.report_interval, Duration::from_secs(10));
    }

    #[test]
    fn validation_rejects_configs_that_cannot_mine() {
        let mut config: Config = toml::from_str(&Config::generate_template(false)).unwrap();
        config.cpu.threads = 0;
        assert!(matches!(config.validate(), Err(MinerError::ConfigError(_))));

        config.cpu.threads = 1;
        config.randomx.key = "abcd".into();
        assert!(matches!(config.validate(), Err(MinerError::ConfigError(_))));

        config.algorithm = AlgorithmType::CryptoNightV7;
        config.validate().unwrap();

        config.pipeline.result_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            Config::load("/nonexistent/xmr_pipeline.toml"),
            Err(MinerError::ConfigError(_))
        ));
    }
}
