// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported mining algorithms
///
/// Each variant maps to one [`HashFunction`](crate::miner::HashFunction)
/// implementation. Pools may name the algorithm in job notifications;
/// the miner only mines jobs for the algorithm it was started with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum AlgorithmType {
    /// RandomX algorithm (CPU-optimized, ASIC-resistant)
    ///
    /// Needs a ~2 GiB dataset in fast mode, which makes its scratch
    /// context the most expensive one to build.
    #[value(name = "randomx")]
    #[serde(rename = "randomx")]
    RandomX,

    /// CryptoNight variant 7 algorithm
    #[value(name = "cryptonight-v7")]
    #[serde(rename = "cryptonight-v7")]
    CryptoNightV7,

    /// CryptoNight-R algorithm
    #[value(name = "cryptonight-r")]
    #[serde(rename = "cryptonight-r")]
    CryptoNightR,
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmType::RandomX => write!(f, "randomx"),
            AlgorithmType::CryptoNightV7 => write!(f, "cryptonight-v7"),
            AlgorithmType::CryptoNightR => write!(f, "cryptonight-r"),
        }
    }
}

impl FromStr for AlgorithmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "randomx" | "rx/0" => Ok(AlgorithmType::RandomX),
            "cnv7" | "cn/1" | "cryptonight-v7" => Ok(AlgorithmType::CryptoNightV7),
            "cnr" | "cn/r" | "cryptonight-r" => Ok(AlgorithmType::CryptoNightR),
            _ => Err(format!("Unknown algorithm: {}", s)),
        }
    }
}

/// Kind of compute device behind a worker
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// A CPU hashing thread
    Cpu,
    /// A GPU compute context
    Gpu,
}

/// Identifies one device worker for logs, samples and candidates
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId {
    /// CPU thread or GPU context
    pub kind: DeviceKind,
    /// Index within its kind (CPU thread number, or GPU device index)
    pub index: usize,
}

impl DeviceId {
    /// Identifier for CPU thread `index`
    pub fn cpu(index: usize) -> Self {
        DeviceId {
            kind: DeviceKind::Cpu,
            index,
        }
    }

    /// Identifier for GPU device `index`
    pub fn gpu(index: usize) -> Self {
        DeviceId {
            kind: DeviceKind::Gpu,
            index,
        }
    }

    /// Lowercase kind name, used for thread names
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            DeviceKind::Cpu => "cpu",
            DeviceKind::Gpu => "gpu",
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "CPU #{}", self.index),
            DeviceKind::Gpu => write!(f, "GPU #{}", self.index),
        }
    }
}
