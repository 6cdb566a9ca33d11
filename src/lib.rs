//! Medtrack — medication lifecycle tracking over SQLite.
//!
//! Layering, bottom up: [`db`] owns the schema and row mapping,
//! [`status`] derives lifecycle state from dates, [`cache`] holds
//! per-user read results with a TTL, and [`medications`] ties them
//! together behind ownership checks.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod medications;
pub mod models;
pub mod status;

use tracing_subscriber::EnvFilter;

/// Initialize tracing. `RUST_LOG` wins over the built-in default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
}
