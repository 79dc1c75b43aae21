//! Tracing subscriber initialization.
//!
//! The gateway logs structured events through `tracing`. Verbosity is driven
//! by `RUST_LOG` via the env-filter, defaulting to `info`. The process-level
//! metrics plane lives in [`crate::metrics`]; no exporter is wired here.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Holder for the installed subscriber, kept for parity with shutdown hooks.
pub struct Telemetry;

impl Telemetry {
    /// Installs the global tracing subscriber.
    ///
    /// Safe to call once per process; later calls are ignored so tests that
    /// build a full gateway do not panic on double registration.
    pub fn init() -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
        Telemetry
    }
}
