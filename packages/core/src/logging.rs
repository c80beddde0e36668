//! Log setup shared by the server and the one-shot commands.
//!
//! Logs go to stderr so `fetch` and `config get` can keep stdout for their
//! result line.

use tracing_subscriber::{filter::ParseError, fmt, EnvFilter};

/// Directive used by `serve`.
pub const SERVER_DIRECTIVE: &str = "info";

/// Directive used by the one-shot commands.
pub const COMMAND_DIRECTIVE: &str = "warn";

/// Filter from a `RUST_LOG` value, falling back to `default_directive` when
/// it is unset or does not parse.
pub fn build_filter(rust_log: Option<&str>, default_directive: &str) -> (EnvFilter, Option<ParseError>) {
    match rust_log.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => match EnvFilter::try_new(value) {
            Ok(filter) => (filter, None),
            Err(err) => (EnvFilter::new(default_directive), Some(err)),
        },
        None => (EnvFilter::new(default_directive), None),
    }
}

/// Install the global subscriber. A second call leaves the first one in
/// place.
pub fn init_logging(default_directive: &str) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, rejected) = build_filter(rust_log.as_deref(), default_directive);

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();

    if installed.is_err() {
        return;
    }
    if let Some(err) = rejected {
        tracing::warn!("Ignoring invalid RUST_LOG ({}); using {:?}", err, default_directive);
    }
}
