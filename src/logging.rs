//! Structured logging setup.
//!
//! Events go to stderr so stdout stays reserved for plans and rendered
//! documents.

use std::io;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Filter applied when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "homelab=info,warn";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Human,
    /// One JSON object per event.
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global tracing subscriber.
///
/// Call once at program startup. A second call leaves the first subscriber
/// in place.
pub fn init(format: LogFormat) {
    let installed = match format {
        LogFormat::Human => {
            let layer = fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .compact();
            tracing_subscriber::registry()
                .with(env_filter())
                .with(layer)
                .try_init()
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(io::stderr)
                .with_target(true);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(layer)
                .try_init()
        }
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
