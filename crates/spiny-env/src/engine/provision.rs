//! On-disk environment layout, the profile fingerprint and the commands that
//! build an environment.
//!
//! The profile is plain text: environment name, interpreter path, then the
//! sorted dependency specifiers, one per line. It is written to
//! `<venv_dir>/<name>/.profile` after provisioning and dependency install have
//! both succeeded.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use spiny_core::error::PhaseError;
use spiny_core::runtime::{IsolationMode, RuntimeInfo, MIN_SSL_VERSION};

use super::WorkItem;
use crate::metadata::Dependencies;
use crate::process::ProcessSpec;

pub const MARKER_FILE: &str = ".profile";

#[cfg(windows)]
const BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
const BIN_DIR: &str = "bin";

/// Fingerprint of what an environment should contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(String);

impl Profile {
    pub fn new(name: &str, executable_path: &Path, dependencies: &[String]) -> Self {
        let mut deps: Vec<&str> = dependencies.iter().map(String::as_str).collect();
        deps.sort_unstable();
        let mut lines = vec![name.to_string(), executable_path.display().to_string()];
        lines.extend(deps.into_iter().map(String::from));
        Self(lines.join("\n"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `installed` was made for the same name and interpreter.
    pub fn same_runtime(&self, installed: &str) -> bool {
        let head = |s: &str| s.lines().take(2).map(String::from).collect::<Vec<_>>();
        !installed.is_empty() && head(&self.0) == head(installed)
    }
}

/// Where one environment lives and what state it is in.
#[derive(Debug, Clone)]
pub struct ProvisionedEnvironment {
    pub name: String,
    /// Working tree: the virtualenv, or the runtime's own install root.
    pub env_dir: PathBuf,
    /// Directory holding the marker file.
    pub state_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub env_python: PathBuf,
    pub profile: Profile,
    /// Marker contents; empty when never provisioned.
    pub installed: String,
}

impl ProvisionedEnvironment {
    pub fn new(item: &WorkItem, venv_root: &Path) -> Self {
        let runtime = &item.runtime;
        let state_dir = venv_root.join(&item.name);
        let (env_dir, bin_dir, env_python) = match runtime.isolation {
            Some(IsolationMode::Unsupported) => {
                let bin_dir = runtime
                    .executable_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| runtime.install_root());
                (
                    runtime.install_root(),
                    bin_dir,
                    runtime.executable_path.clone(),
                )
            }
            _ => {
                let bin_dir = state_dir.join(BIN_DIR);
                let env_python = bin_dir.join(&runtime.executable_name);
                (state_dir.clone(), bin_dir, env_python)
            }
        };
        Self {
            name: item.name.clone(),
            profile: Profile::new(
                &item.name,
                &runtime.executable_path,
                &item.dependencies.specifiers,
            ),
            installed: read_marker(&state_dir),
            env_dir,
            state_dir,
            bin_dir,
            env_python,
        }
    }

    /// The isolation layer is missing or was built for another interpreter.
    pub fn needs_provision(&self) -> bool {
        !self.profile.same_runtime(&self.installed)
    }

    /// Anything in the profile changed, dependencies included.
    pub fn needs_install(&self) -> bool {
        self.profile.as_str() != self.installed
    }

    pub fn marker_path(&self) -> PathBuf {
        self.state_dir.join(MARKER_FILE)
    }

    pub fn write_marker(&mut self) -> Result<(), PhaseError> {
        let state = |source| PhaseError::State {
            name: self.name.clone(),
            source,
        };
        fs::create_dir_all(&self.state_dir).map_err(state)?;
        fs::write(self.marker_path(), self.profile.as_str()).map_err(state)?;
        self.installed = self.profile.as_str().to_string();
        Ok(())
    }
}

/// Marker contents in `state_dir`, empty when absent or unreadable.
pub fn read_marker(state_dir: &Path) -> String {
    match fs::read_to_string(state_dir.join(MARKER_FILE)) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            tracing::warn!("Could not read {}: {}", state_dir.join(MARKER_FILE).display(), e);
            String::new()
        }
    }
}

/// The command creating the isolation layer; `None` when the runtime's own
/// tree is used.
pub fn provision_command(
    name: &str,
    runtime: &RuntimeInfo,
    env_dir: &Path,
    host_python: Option<&Path>,
) -> Result<Option<ProcessSpec>, PhaseError> {
    let exe = &runtime.executable_path;
    match runtime.isolation {
        Some(IsolationMode::Unsupported) => Ok(None),
        Some(IsolationMode::External) => {
            let host = host_python.ok_or_else(|| PhaseError::Provision(name.to_string()))?;
            Ok(Some(
                ProcessSpec::new(host)
                    .args(["-m", "virtualenv", "-p"])
                    .arg(exe)
                    .arg(env_dir),
            ))
        }
        Some(IsolationMode::Internal) | None => Ok(Some(
            ProcessSpec::new(exe).args(["-m", "virtualenv"]).arg(env_dir),
        )),
    }
}

/// `pip install` for the environment's dependencies; `None` without any.
pub fn install_command(
    env: &ProvisionedEnvironment,
    runtime: &RuntimeInfo,
    deps: &Dependencies,
    index_url: Option<&str>,
) -> Option<ProcessSpec> {
    if deps.specifiers.is_empty() {
        return None;
    }
    let pip = env.bin_dir.join("pip");
    let mut spec = if pip.is_file() {
        ProcessSpec::new(pip)
    } else {
        ProcessSpec::new(&env.env_python).args(["-m", "pip"])
    };
    spec = spec.arg("install");
    if runtime.version.is_older_than(MIN_SSL_VERSION) {
        spec = spec.arg("--insecure");
    }
    if let Some(url) = index_url {
        spec = spec.arg("--index-url").arg(url);
    }
    for link in &deps.find_links {
        spec = spec.arg("--find-links").arg(link);
    }
    Some(spec.args(&deps.specifiers))
}
