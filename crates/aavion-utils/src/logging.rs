//! Logging initialization.
//!
//! Structured logging via `tracing` with an env-filter. The default level
//! comes from the `log_level` config key; `RUST_LOG` overrides it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// `level` is the configured default (e.g. `info`, `debug`); the
/// `RUST_LOG` environment variable takes precedence when set. Returns an
/// error only if a subscriber is already installed, which callers may
/// ignore on re-initialization.
pub fn init_tracing(level: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let default = level.unwrap_or("info");
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("aaviondb={default},aavion={default},warn")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
