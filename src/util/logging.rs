//! Structured logging setup
//!
//! Logs always go to stderr: stdout carries command output (rendered Dockerfiles, plans,
//! probe results) and must stay machine-readable.
//!
//! # Environment Variables
//!
//! - `BOOT_LOG_LEVEL`: trace, debug, info, warn or error - default: info
//! - `BOOT_LOG_JSON`: emit JSON lines (true/false) - default: false
//! - `RUST_LOG`: standard filter directives, applied on top
//!
//! # Example
//!
//! ```no_run
//! use findmyrepo_boot::util::logging;
//! use tracing::info;
//!
//! logging::init_from_env();
//! info!(port = 10000, "Launcher starting");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_LEVEL_VAR: &str = "BOOT_LOG_LEVEL";
pub const LOG_JSON_VAR: &str = "BOOT_LOG_JSON";

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum level for this crate's own events
    pub level: Level,

    /// JSON lines instead of human-readable output
    pub use_json: bool,

    pub include_target: bool,

    /// Include file and line number
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: false,
            include_location: false,
        }
    }
}

/// Parses a log level, falling back to INFO for anything unrecognised
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn build_filter(level: Level, rust_log_set: bool) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env();
    let mut directives = vec![format!("findmyrepo_boot={}", level)];
    if !rust_log_set {
        directives.extend(
            ["h2=warn", "hyper=warn", "hyper_util=warn", "reqwest=warn"]
                .iter()
                .map(|d| d.to_string()),
        );
    }
    for directive in directives {
        if let Ok(d) = directive.parse::<Directive>() {
            filter = filter.add_directive(d);
        }
    }
    filter
}

/// Installs the global subscriber; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level, env::var("RUST_LOG").is_ok());

        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location);

        let result = if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        };

        if let Err(e) = result {
            eprintln!("Failed to initialize logging: {}", e);
        }
    });
}

/// Reads `BOOT_LOG_LEVEL` and `BOOT_LOG_JSON`
pub fn config_from_env() -> LoggingConfig {
    let level = env::var(LOG_LEVEL_VAR)
        .map(|v| parse_level(&v))
        .unwrap_or(Level::INFO);
    let use_json = env::var(LOG_JSON_VAR)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(false);

    LoggingConfig {
        level,
        use_json,
        include_target: use_json,
        ..Default::default()
    }
}

pub fn init_from_env() {
    init_logging(config_from_env());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level(" warning "), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_invalid() {
        assert_eq!(parse_level("loud"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var(LOG_LEVEL_VAR, "debug");
        env::set_var(LOG_JSON_VAR, "yes");
        let config = config_from_env();
        env::remove_var(LOG_LEVEL_VAR);
        env::remove_var(LOG_JSON_VAR);

        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        env::remove_var(LOG_LEVEL_VAR);
        env::remove_var(LOG_JSON_VAR);
        let config = config_from_env();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
    }

    #[test]
    fn test_filter_builds() {
        let filter = build_filter(Level::DEBUG, false);
        assert!(filter
            .to_string()
            .to_lowercase()
            .contains("findmyrepo_boot=debug"));
    }
}
