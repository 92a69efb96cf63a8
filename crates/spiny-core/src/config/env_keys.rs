//! Environment variable names.
//!
//! `SPINY_*` is the primary prefix; aliases exist where a widely used name
//! already means the same thing.

/// `[spiny]` table overrides
pub mod spiny {
    pub const SPINY_ENVIRONMENTS: &str = "SPINY_ENVIRONMENTS";
    pub const SPINY_VENV_DIR: &str = "SPINY_VENV_DIR";
    pub const SPINY_MAX_PROCESSES: &str = "SPINY_MAX_PROCESSES";
    pub const SPINY_CACHE_FILE: &str = "SPINY_CACHE_FILE";

    pub const SPINY_HOST_PYTHON: &str = "SPINY_HOST_PYTHON";
    pub const HOST_PYTHON_ALIASES: &[&str] = &["VIRTUALENV_PYTHON"];

    pub const SPINY_INDEX_URL: &str = "SPINY_INDEX_URL";
    pub const INDEX_URL_ALIASES: &[&str] = &["PIP_INDEX_URL"];
}

/// Logging
pub mod observability {
    pub const SPINY_QUIET: &str = "SPINY_QUIET";
    pub const SPINY_LOG_LEVEL: &str = "SPINY_LOG_LEVEL";
    pub const SPINY_LOG_JSON: &str = "SPINY_LOG_JSON";
}
