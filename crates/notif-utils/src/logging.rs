/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Notif Logging Module
//!
//! Logging for the notif hub, built on `tracing` with a `tracing-subscriber`
//! backend. One subscriber serves the whole process: the hub's own log
//! macros, HTTP trace spans, and the `log`-facade records emitted by
//! dependencies (bridged by the subscriber's log tracer).
//!
//! ## Features
//! - Text or JSON line output
//! - Runtime-adjustable level via a reload handle
//!
//! ## Usage
//!
//! 1. Initialize the subscriber once at startup:
//!    ```ignore
//!    logging::init_with_format("info", "json").expect("Failed to initialize logging");
//!    ```
//!
//! 2. Use the macros from the prelude throughout the code:
//!    ```ignore
//!    use notif_utils::logging::prelude::*;
//!    info!("This is an info message");
//!    ```
//!
//! 3. Update the level at runtime if needed:
//!    ```ignore
//!    logging::update_log_level("debug").expect("Failed to update log level");
//!    ```

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Handle for runtime level changes; set by the first successful init.
static RELOAD_HANDLE: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Initializes the logging subscriber with the specified level and text
/// output.
///
/// # Arguments
/// * `level` - Log level ("trace", "debug", "info", "warn", "error", "off")
pub fn init(level: &str) -> Result<(), String> {
    init_with_format(level, "text")
}

/// Initializes the logging subscriber with the specified level and format.
///
/// Safe to call more than once: a second call only adjusts the level of the
/// already-installed subscriber.
///
/// # Arguments
/// * `level` - Log level ("trace", "debug", "info", "warn", "error", "off")
/// * `format` - Output format ("text" for human-readable, "json" for structured lines)
pub fn init_with_format(level: &str, format: &str) -> Result<(), String> {
    let (filter, handle) = reload::Layer::new(env_filter(level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    match result {
        Ok(()) => {
            let _ = RELOAD_HANDLE.set(handle);
            Ok(())
        }
        // Already installed (repeated init in tests): just retune the level.
        // A foreign subscriber without our reload handle is left alone.
        Err(_) => match RELOAD_HANDLE.get() {
            Some(_) => update_log_level(level),
            None => Ok(()),
        },
    }
}

/// Updates the current log level through the reload handle.
///
/// # Arguments
///
/// * `level` - A string slice that holds the new desired log level.
///
/// # Returns
///
/// * `Ok(())` if the log level was successfully updated.
/// * `Err(String)` if the subscriber is not installed or the reload failed.
pub fn update_log_level(level: &str) -> Result<(), String> {
    let handle = RELOAD_HANDLE
        .get()
        .ok_or_else(|| "Logging is not initialized".to_string())?;

    handle
        .reload(env_filter(level))
        .map_err(|e| format!("Failed to update log level: {}", e))
}

/// Builds the filter for a level string; unknown levels fall back to info.
fn env_filter(level: &str) -> EnvFilter {
    let directive = match level.to_lowercase().as_str() {
        "off" | "error" | "warn" | "info" | "debug" | "trace" => level.to_lowercase(),
        _ => "info".to_string(),
    };
    EnvFilter::new(directive)
}

pub mod prelude {
    pub use tracing::{debug, error, info, trace, warn};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::*;

    #[test]
    fn test_env_filter_levels() {
        assert_eq!(env_filter("debug").to_string(), "debug");
        assert_eq!(env_filter("WARN").to_string(), "warn");
        assert_eq!(env_filter("off").to_string(), "off");
    }

    #[test]
    fn test_env_filter_falls_back_to_info() {
        assert_eq!(env_filter("not_a_level").to_string(), "info");
        assert_eq!(env_filter("").to_string(), "info");
    }

    #[test]
    /// Repeated initialization must not fail; later calls retune the level.
    fn test_init_is_repeatable() {
        assert!(init("info").is_ok());
        assert!(init_with_format("debug", "text").is_ok());
        assert!(update_log_level("warn").is_ok());
    }

    #[test]
    /// Ensures the prelude macros emit through the installed subscriber.
    fn test_log_macros() {
        init("debug").expect("Failed to initialize logging");

        debug!("This is a debug message");
        info!("This is an info message");
        warn!("This is a warning message");
        error!("This is an error message");
    }
}
