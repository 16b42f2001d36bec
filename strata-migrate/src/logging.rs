//! Logging setup for strata.
//!
//! The engine logs through `tracing` and never installs a subscriber by
//! itself. Applications either bring their own or call [`init`], which reads:
//!
//! - `STRATA_DEBUG=true` - log at debug level
//! - `STRATA_LOG_LEVEL=trace|debug|info|warn|error` - log at that level
//! - `STRATA_LOG_FORMAT=json|pretty|compact` - output format (default: json)
//!
//! A subscriber is only installed when the `tracing-subscriber` feature is
//! enabled.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Crates whose events the installed filter lets through.
const CRATES: [&str; 5] = ["strata", "strata_migrate", "strata_postgres", "strata_mysql", "strata_sqlite"];

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line, human oriented.
    Pretty,
    /// One short line per event.
    Compact,
}

impl LogFormat {
    fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("pretty") => Self::Pretty,
            Some("compact") => Self::Compact,
            _ => Self::Json,
        }
    }
}

/// What [`init`] installs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Level for the strata crates; `None` leaves logging off.
    pub level: Option<&'static str>,
    /// Output format.
    pub format: LogFormat,
}

impl LogSettings {
    /// Settings from the `STRATA_*` environment variables.
    pub fn from_env() -> Self {
        let debug = env::var("STRATA_DEBUG").ok();
        let level = env::var("STRATA_LOG_LEVEL").ok();
        let format = env::var("STRATA_LOG_FORMAT").ok();
        Self::resolve(debug.as_deref(), level.as_deref(), format.as_deref())
    }

    fn resolve(debug: Option<&str>, level: Option<&str>, format: Option<&str>) -> Self {
        let debug = debug.is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"));
        let level = match level {
            Some(raw) => Some(parse_level(raw).unwrap_or(if debug { "debug" } else { "warn" })),
            None => debug.then_some("debug"),
        };
        Self {
            level,
            format: LogFormat::parse(format),
        }
    }

    /// `EnvFilter` directives for the strata crates, if logging is on.
    pub fn directives(&self) -> Option<String> {
        let level = self.level?;
        Some(
            CRATES
                .iter()
                .map(|krate| format!("{}={}", krate, level))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

fn parse_level(raw: &str) -> Option<&'static str> {
    LEVELS.iter().copied().find(|l| l.eq_ignore_ascii_case(raw))
}

/// Initialize logging from the environment. Subsequent calls are no-ops.
pub fn init() {
    install(LogSettings::from_env());
}

/// Initialize logging at `level`, ignoring `STRATA_LOG_LEVEL`.
pub fn init_with_level(level: &str) {
    let mut settings = LogSettings::from_env();
    settings.level = Some(parse_level(level).unwrap_or("warn"));
    install(settings);
}

#[cfg_attr(not(feature = "tracing-subscriber"), allow(unused_variables))]
fn install(settings: LogSettings) {
    INIT.call_once(|| {
        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let Some(directives) = settings.directives() else {
                return;
            };
            let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("warn"));

            // try_init: the host application may already own the global subscriber.
            let registry = tracing_subscriber::registry().with(filter);
            let installed = match settings.format {
                LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
                LogFormat::Compact => registry.with(fmt::layer().compact()).try_init(),
                LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
            };
            if installed.is_ok() {
                tracing::info!(filter = %directives, format = ?settings.format, "strata logging initialized");
            }
        }
    });
}
