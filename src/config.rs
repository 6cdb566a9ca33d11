use std::path::PathBuf;

use chrono::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Medtrack";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a cached per-user medication list stays valid.
pub const CACHE_TTL: Duration = Duration::minutes(5);

/// Expired medications older than this past their effective end date are
/// removed by the cleanup sweep.
pub const CLEANUP_GRACE_DAYS: i64 = 7;

/// Get the application data directory
/// ~/Medtrack/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Medtrack")
}

/// Path of the SQLite database file
pub fn database_path() -> PathBuf {
    app_data_dir().join("medtrack.db")
}

/// Default log filter when RUST_LOG is not set
pub fn default_log_filter() -> String {
    "medtrack=info".to_string()
}
