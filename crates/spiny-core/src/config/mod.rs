//! spiny configuration layer.
//!
//! All environment variable reads go through this module; the rest of the
//! workspace works with the structured `SpinyConfig`.
//!
//! - `loader`: `.env` loading and `env_or` / `env_optional` / `env_bool`
//! - `schema`: `SpinyConfig` (TOML file + env + `--set` overrides), `ObservabilityConfig`
//! - `env_keys`: variable name constants

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, load_dotenv, load_dotenv_from_dir, set_env_var};
pub use schema::{
    ObservabilityConfig, SpinyConfig, DEFAULT_CONFIG_FILE, DEFAULT_RUNTIME_NAMES,
    DEFAULT_TEST_COMMAND, DEFAULT_VENV_DIR,
};
