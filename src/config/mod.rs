// src/config/mod.rs
//! Configuration management for the miner
//!
//! This module handles all configuration-related functionality including:
//! - Loading, parsing and validating configuration files
//! - Generating configuration templates
//! - Turning pipeline settings into runtime values
//!
//! The configuration uses TOML format.

/// Core configuration implementation
///
/// Contains the [`Config`] struct and the per-section types.
pub mod config;

// Re-export key items for easy access
pub use config::{Config, CpuConfig, GpuThreadConfig, OpenClConfig, PipelineConfig, RandomXConfig};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads miner configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
///
/// # Arguments
/// * `gpu` - Whether to include a GPU thread and the OpenCL section
///
/// # Returns
/// String containing a ready-to-use TOML configuration template
pub fn generate_template(gpu: bool) -> String {
    Config::generate_template(gpu)
}
