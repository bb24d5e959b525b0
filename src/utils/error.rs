// src/utils/error.rs
use serde_json;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use url;

/// Main error type for the mining application
///
/// This enum represents all possible error conditions that can occur
/// during mining operations, including network, I/O, protocol, and
/// configuration errors.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Errors related to mining algorithms (e.g., unsupported algorithm)
    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    /// The verifier's scratch context could not be allocated
    #[error("Scratch context allocation failed: {0}")]
    ScratchError(String),

    /// Errors related to network connectivity
    #[error("Network connection error: {0}")]
    ConnectionError(String),

    /// The pool refused the login request
    #[error("Authorization failed: {0}")]
    AuthError(String),

    /// Errors in protocol handling or invalid protocol messages
    #[error("Protocol violation: {0}")]
    ProtocolError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// WebSocket communication errors
    #[error("WebSocket error: {0}")]
    WsError(#[from] tungstenite::Error),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// A verified solution could not be converted to its wire form
    #[error("Submission encoding error: {0}")]
    EncodeError(String),

    /// Device-local failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Every configured device has failed; nothing is left to mine with
    #[error("All {0} devices are in the errored state")]
    AllDevicesFailed(usize),

    /// Async task execution errors
    #[error("Task execution error: {0}")]
    TaskError(String),
}

/// Failures reported by a single compute device
///
/// These never cross into other devices: the owning worker retries and
/// only escalates the device to `Errored` after repeated failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Device setup (buffers, kernel compilation, scratch) failed
    #[error("device {device} initialization failed: {reason}")]
    Init {
        /// Device label
        device: String,
        /// Backend-provided reason
        reason: String,
    },

    /// A compute or driver error during a search
    #[error("device {device} compute error: {reason}")]
    Compute {
        /// Device label
        device: String,
        /// Backend-provided reason
        reason: String,
    },

    /// The device produced no hashes for longer than the stall timeout
    #[error("device {device} stalled for {elapsed:?}")]
    Stalled {
        /// Device label
        device: String,
        /// Time spent in the poll without progress
        elapsed: Duration,
    },

    /// A lifecycle edge that the state machine does not allow
    #[error("device {device} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Device label
        device: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },
}

/// Converts hex decoding errors into MinerError
///
/// Used when invalid hex data is encountered in job blobs and targets.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts async task join errors into MinerError
///
/// Raised when the blocking pipeline shutdown task panics or is cancelled.
impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}
