// src/network/mod.rs
//! Network communication components
//!
//! This module handles all network interactions with mining pools:
//! - `StratumClient`: login, job notifications, share submission, reconnects
//! - `Transport`: TCP and WebSocket framing
//! - `protocol`: stratum message builders and parsers

/// Mining pool client implementation
///
/// Publishes pool jobs into the job holder and forwards verified shares.
pub mod pool;

/// Stratum message encoding and decoding
pub mod protocol;

/// TCP and WebSocket connections
pub mod transport;

// Re-export main components for cleaner imports
pub use pool::{PoolConfig, PoolSubmitter, StratumClient, submission_channel};
pub use transport::Transport;
