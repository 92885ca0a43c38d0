// SPDX-License-Identifier: MPL-2.0
//! Logging configuration and initialization.
//!
//! Structured logging with `tracing`, compact console output by default and
//! JSON output for log aggregation.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter (e.g. "debug", "info,vidlens=trace").
pub const LOG_ENV: &str = "VIDLENS_LOG";

/// Environment variable selecting the output format ("json" or anything else).
pub const LOG_FORMAT_ENV: &str = "VIDLENS_LOG_FORMAT";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Use JSON format for logs (default: false)
    pub json_format: bool,
    /// Default log level filter (default: "info")
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

/// Installs the global subscriber.
///
/// The filter is read from `VIDLENS_LOG`, then `RUST_LOG`, then
/// `config.default_level`. Setting `VIDLENS_LOG_FORMAT=json` switches to JSON.
///
/// # Errors
///
/// Fails when a global subscriber has already been installed.
///
/// # Example
///
/// ```no_run
/// use vidlens::logging::{init_logging, LogConfig};
///
/// init_logging(&LogConfig::default()).expect("Failed to initialize logging");
/// ```
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let use_json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(config.json_format);

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if use_json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        subscriber.with(json_layer).try_init()?;
    } else {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_file(false)
            .with_line_number(false)
            .compact();
        subscriber.with(console_layer).try_init()?;
    }

    Ok(())
}

/// Returns true when the `count`-th occurrence of a repeated diagnostic should be logged.
///
/// The first `burst` occurrences are logged, then one every `period`.
#[must_use]
pub fn should_log_occurrence(count: u64, burst: u64, period: u64) -> bool {
    count <= burst || (period > 0 && count % period == 0)
}
