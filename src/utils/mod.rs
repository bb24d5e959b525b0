// src/utils/mod.rs
//! Utilities module for common functionality
//!
//! Error handling and logging infrastructure shared by every component.

/// Error types and handling utilities
///
/// Contains [`MinerError`] for process-level failures and [`DeviceError`]
/// for failures local to one compute device.
pub mod error;

/// Logging configuration and utilities
pub mod logging;

// Re-export for easier access
pub use error::{DeviceError, MinerError};
pub use logging::{init_bench_logging, init_logging};
