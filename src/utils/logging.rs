// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! Uses `env_logger` under the hood with a compact custom format.
//! `RUST_LOG` always wins over the defaults chosen here.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes the logging subsystem for mining
///
/// Default level is Info, or Debug when `verbose` is set.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    apply_env_or(common_log_config(), default).init();
}

/// Configures benchmark-specific logging
///
/// Defaults to Debug so per-device sample rates are visible.
pub fn init_bench_logging() {
    apply_env_or(common_log_config(), LevelFilter::Debug).init();
}

fn apply_env_or(mut builder: Builder, default: LevelFilter) -> Builder {
    if env::var("RUST_LOG").is_err() {
        builder.filter_level(default);
    } else {
        builder.parse_env("RUST_LOG");
    }
    builder
}

/// Creates a base logger builder with the `[ts LEVEL thread module:line] msg` format
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let thread = std::thread::current();
            writeln!(
                buf,
                "[{} {:<5} {} {}:{}] {}",
                buf.timestamp_seconds(),
                record.level(),
                thread.name().unwrap_or("-"),
                record.module_path().unwrap_or_default(),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}
