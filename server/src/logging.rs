//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with a configurable format (JSON
//! for log aggregation, pretty-printed for a terminal) and environment
//! filtering via `RUST_LOG`.
//!
//! Everything goes to stderr. Nothing in this service may ever log key
//! material, decrypted payloads, or collected medical fields — log the
//! metadata (token, screen, fingerprint prefix), never the contents.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored output for local development.
    Pretty,
    /// JSON lines for production log shipping.
    Json,
}

impl LogFormat {
    /// Parse a format string. Accepts "json" or "pretty" (case-insensitive);
    /// anything unrecognized falls back to `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Call exactly once, early in `main()`; a second call panics.
///
/// `default_level` applies when `RUST_LOG` is unset, e.g.
/// `"lifeline_server=info,lifeline_flow=info,tower_http=info"`. When set,
/// `RUST_LOG` wins, with the usual `EnvFilter` directive syntax.
pub fn init_logging(default_level: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true))
                .init();
        }
    }

    tracing::info!("logging initialized (format={:?})", format);
}
