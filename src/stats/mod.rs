//! Statistics collection and reporting module
//!
//! - [`HashrateAggregator`] turns per-device samples into a periodic rate line
//! - [`ShareStats`] counts submitted, rejected and dropped shares
//! - [`HardwareMonitor`] adds CPU usage to the report

/// Windowed hashrate aggregation over the sample side channel
pub mod hashrate;

/// Share counters and hardware sampling
pub mod reporter;

// Re-export main components
pub use hashrate::{
    HashRateSample, HashrateAggregator, HashrateWindow, SampleSender, WindowReport,
    sample_channel,
};
pub use reporter::{HardwareMonitor, HardwareStats, MiningStats, ShareStats};
