use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Gridcheck";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/Gridcheck/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Gridcheck")
}

/// Default location of the analysis database.
pub fn database_path() -> PathBuf {
    app_data_dir().join("gridcheck.db")
}

/// Default tracing filter: engine at debug, dependencies at warn.
pub fn default_log_filter() -> String {
    format!("warn,{}=debug", env!("CARGO_PKG_NAME"))
}
