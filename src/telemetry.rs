//! Tracing setup for the CLI and anything embedding the stores.
//!
//! - LOG_LEVEL holds `EnvFilter` directives, e.g. "debug" or
//!   "info,mission=debug,answer=trace,api=debug".
//! - LOG_FORMAT picks "pretty" (default) or "json".
//!
//! Targets used across the crate: `mathmission`, `session`, `mission`, `answer`, `api`.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info,mathmission=debug,mission=debug,answer=debug,session=info,api=info";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env_value(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Directives from `raw`, or `DEFAULT_FILTER` when unset or unparsable.
pub fn filter_from(raw: Option<&str>) -> EnvFilter {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Safe to call twice; the second call is a no-op.
pub fn init_tracing() {
    let level = std::env::var("LOG_LEVEL").ok();
    let format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_from(level.as_deref()))
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    // The two builders have different types, so each branch installs its own.
    let installed = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    if installed.is_err() {
        tracing::debug!(target: "mathmission", "Tracing subscriber already installed");
    }
}
