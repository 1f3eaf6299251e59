//! Logging setup controlled by environment variables.
//!
//! # Environment Variables
//!
//! - `LITEBIND_DEBUG=true` (or `1`, `yes`) - Enable debug logging
//! - `LITEBIND_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `LITEBIND_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use litebind_sqlite::logging;
//!
//! // Call once at startup; later calls are no-ops.
//! logging::init();
//! ```
//!
//! Installing a subscriber needs the `tracing-subscriber` feature. Without it the crate only
//! emits events, and the application decides where they go.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const DEBUG_VAR: &str = "LITEBIND_DEBUG";
const LEVEL_VAR: &str = "LITEBIND_LOG_LEVEL";
const FORMAT_VAR: &str = "LITEBIND_LOG_FORMAT";

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_level(value: Option<&str>, debug: bool) -> &'static str {
    match value.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ if debug => "debug",
        _ => "warn",
    }
}

fn parse_format(value: Option<&str>) -> &'static str {
    match value.map(str::to_lowercase).as_deref() {
        Some("pretty") => "pretty",
        Some("compact") => "compact",
        _ => "json",
    }
}

/// Check if `LITEBIND_DEBUG` enables debug logging.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var(DEBUG_VAR).map(|v| parse_flag(&v)).unwrap_or(false)
}

/// Level from `LITEBIND_LOG_LEVEL`; "debug" when debugging is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    parse_level(env::var(LEVEL_VAR).ok().as_deref(), is_debug_enabled())
}

/// Format from `LITEBIND_LOG_FORMAT`, defaulting to "json".
pub fn get_log_format() -> &'static str {
    parse_format(env::var(FORMAT_VAR).ok().as_deref())
}

/// Install the global subscriber if logging was requested through the environment.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var(LEVEL_VAR).is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!("litebind={},litebind_sqlite={}", level, level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            let installed = match get_log_format() {
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                "pretty" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(level, format = get_log_format(), "litebind logging initialized");
            }
        }
    });
}
