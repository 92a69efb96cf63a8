//! Configuration structures.
//!
//! `SpinyConfig` is assembled from, in increasing precedence: defaults, the
//! TOML config file, `SPINY_*` environment variables and `--set` overrides.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::env_keys::{observability as obv_keys, spiny as keys};
use super::loader::{env_bool, env_optional, env_or};
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "spiny.toml";
pub const DEFAULT_VENV_DIR: &str = ".venv";
pub const DEFAULT_TEST_COMMAND: &str = "{envpython} setup.py test";
pub const DEFAULT_RUNTIME_NAMES: &[&str] = &["python", "pypy", "jython", "ipyexe"];

/// A list given either as one whitespace-separated string or as an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Words {
    One(String),
    Many(Vec<String>),
}

impl Words {
    fn into_vec(self) -> Vec<String> {
        match self {
            Words::One(s) => s.split_whitespace().map(String::from).collect(),
            Words::Many(v) => v,
        }
    }
}

/// Command templates: one string (one command per line) or an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Templates {
    One(String),
    Many(Vec<String>),
}

impl Templates {
    fn into_vec(self) -> Vec<String> {
        let raw = match self {
            Templates::One(s) => s.lines().map(String::from).collect(),
            Templates::Many(v) => v,
        };
        raw.into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
struct SpinySection {
    environments: Option<Words>,
    venv_dir: Option<PathBuf>,
    test_commands: Option<Templates>,
    setup_commands: Option<Templates>,
    max_processes: Option<usize>,
    use_setup_py: Option<bool>,
    use_requirements_txt: Option<bool>,
    changedir: Option<PathBuf>,
    cache_file: Option<PathBuf>,
    index_url: Option<String>,
    runtime_names: Option<Words>,
    host_python: Option<PathBuf>,
    require_all: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    spiny: SpinySection,
    pythons: BTreeMap<String, PathBuf>,
}

/// Fully resolved run configuration. All paths are absolute.
#[derive(Debug, Clone)]
pub struct SpinyConfig {
    pub project_dir: PathBuf,
    /// Explicit environment list; `None` means derive from the project.
    pub environments: Option<Vec<String>>,
    pub venv_dir: PathBuf,
    pub test_commands: Vec<String>,
    pub setup_commands: Vec<String>,
    pub max_processes: Option<usize>,
    pub use_setup_py: bool,
    pub use_requirements_txt: bool,
    pub changedir: Option<PathBuf>,
    pub cache_file: PathBuf,
    pub index_url: Option<String>,
    pub runtime_names: Vec<String>,
    pub host_python: Option<PathBuf>,
    /// Abort before provisioning when a requested environment has no runtime.
    pub require_all: bool,
    /// Explicitly declared interpreters: environment name → executable.
    pub pythons: BTreeMap<String, PathBuf>,
}

impl SpinyConfig {
    /// Load configuration for `project_dir`.
    ///
    /// `file` defaults to `<project_dir>/spiny.toml`, which may be absent; an
    /// explicitly named file must exist.
    pub fn load(
        project_dir: &Path,
        file: Option<&Path>,
        overrides: &[String],
    ) -> Result<Self, ConfigError> {
        let (path, required) = match file {
            Some(f) => (absolutize(project_dir, f), true),
            None => (project_dir.join(DEFAULT_CONFIG_FILE), false),
        };
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        let mut table: toml::Table =
            toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })?;
        apply_env_overrides(&mut table, env_optional);
        Self::from_table(project_dir, table, overrides)
    }

    /// Build from TOML text and `overrides` alone; `SPINY_*` variables are
    /// not consulted.
    pub fn from_toml_str(
        project_dir: &Path,
        text: &str,
        overrides: &[String],
    ) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_table(project_dir, table, overrides)
    }

    fn from_table(
        project_dir: &Path,
        mut table: toml::Table,
        overrides: &[String],
    ) -> Result<Self, ConfigError> {
        for o in overrides {
            apply_override(&mut table, o)?;
        }
        let file: ConfigFile = toml::Value::Table(table).try_into()?;
        let s = file.spiny;

        let venv_dir = s
            .venv_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_VENV_DIR));
        let cache_file = s
            .cache_file
            .map(|p| absolutize(project_dir, &p))
            .unwrap_or_else(crate::probe_cache::default_cache_path);

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            environments: s.environments.map(Words::into_vec),
            venv_dir: absolutize(project_dir, &venv_dir),
            test_commands: s
                .test_commands
                .map(Templates::into_vec)
                .unwrap_or_else(|| vec![DEFAULT_TEST_COMMAND.to_string()]),
            setup_commands: s.setup_commands.map(Templates::into_vec).unwrap_or_default(),
            max_processes: s.max_processes.filter(|n| *n > 0),
            use_setup_py: s.use_setup_py.unwrap_or(true),
            use_requirements_txt: s.use_requirements_txt.unwrap_or(true),
            changedir: s.changedir.map(|p| absolutize(project_dir, &p)),
            cache_file,
            index_url: s.index_url,
            runtime_names: s
                .runtime_names
                .map(Words::into_vec)
                .unwrap_or_else(|| DEFAULT_RUNTIME_NAMES.iter().map(|n| n.to_string()).collect()),
            host_python: s.host_python.map(|p| expand_home(&p)),
            require_all: s.require_all.unwrap_or(false),
            pythons: file
                .pythons
                .into_iter()
                .map(|(name, p)| (name, absolutize(project_dir, &p)))
                .collect(),
        })
    }
}

/// Parse an override value as a TOML literal, falling back to a bare string.
fn parse_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {}", raw))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn set_key(table: &mut toml::Table, section: &str, key: &str, value: toml::Value) {
    let entry = table
        .entry(section.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    if !entry.is_table() {
        *entry = toml::Value::Table(toml::Table::new());
    }
    if let toml::Value::Table(t) = entry {
        t.insert(key.to_string(), value);
    }
}

/// Apply one `section.key=value` override (e.g. `spiny.venv-dir=/tmp/v`).
fn apply_override(table: &mut toml::Table, raw: &str) -> Result<(), ConfigError> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::Override(raw.to_string()))?;
    let (section, key) = path
        .trim()
        .split_once(['.', ':'])
        .ok_or_else(|| ConfigError::Override(raw.to_string()))?;
    if section.is_empty() || key.is_empty() {
        return Err(ConfigError::Override(raw.to_string()));
    }
    set_key(table, section, key, parse_value(value.trim()));
    Ok(())
}

/// Copy `SPINY_*` settings into the `[spiny]` table; `lookup` reads one
/// variable and its aliases.
fn apply_env_overrides<F>(table: &mut toml::Table, lookup: F)
where
    F: Fn(&str, &[&str]) -> Option<String>,
{
    let vars: [(&str, &[&str], &str); 6] = [
        (keys::SPINY_ENVIRONMENTS, &[], "environments"),
        (keys::SPINY_VENV_DIR, &[], "venv-dir"),
        (keys::SPINY_MAX_PROCESSES, &[], "max-processes"),
        (keys::SPINY_CACHE_FILE, &[], "cache-file"),
        (keys::SPINY_HOST_PYTHON, keys::HOST_PYTHON_ALIASES, "host-python"),
        (keys::SPINY_INDEX_URL, keys::INDEX_URL_ALIASES, "index-url"),
    ];
    for (primary, aliases, key) in vars {
        if let Some(value) = lookup(primary, aliases) {
            let value = match key {
                "max-processes" => parse_value(&value),
                _ => toml::Value::String(value),
            };
            set_key(table, "spiny", key, value);
        }
    }
}

fn expand_home(p: &Path) -> PathBuf {
    match p.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| p.to_path_buf()),
        Err(_) => p.to_path_buf(),
    }
}

fn absolutize(base: &Path, p: &Path) -> PathBuf {
    let p = expand_home(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}

/// Logging configuration: quiet, log level, JSON output.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: Option<String>,
    pub log_json: bool,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::SPINY_QUIET, &[], false),
                log_level: env_optional(obv_keys::SPINY_LOG_LEVEL, &[]),
                log_json: env_bool(obv_keys::SPINY_LOG_JSON, &[], false),
            }
        })
    }

    /// Filter used when neither `RUST_LOG` nor `SPINY_LOG_LEVEL` is set.
    pub fn default_filter(level: &str) -> String {
        env_or(obv_keys::SPINY_LOG_LEVEL, &[], || {
            format!("warn,spiny={level},spiny_env={level},spiny_core={level}")
        })
    }
}
