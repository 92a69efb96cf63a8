//! Environment resolver: map environment names to concrete interpreters.
//!
//! Resolution order:
//!
//!   ① Explicit `[pythons]` declarations: validated and registered under the
//!     family name and every alias, a shared name going to the highest version
//!   ② Interpreters discovered on the search path fill aliases nobody claimed
//!   ③ Each requested name gets an isolation check: its own virtualenv, else
//!     the host interpreter's virtualenv, else fail

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use spiny_core::error::EnvironmentError;
use spiny_core::probe_cache::ProbeCache;
use spiny_core::runtime::{IsolationMode, RuntimeInfo, MIN_ISOLATION_VERSION};

use crate::discovery::{is_executable, Discovery};
use crate::probe::probe;
use crate::process::{ProcessRunner, ProcessSpec};

// ─── Registry ───────────────────────────────────────────────────────────────

/// Environment name → the runtime chosen to satisfy it.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentRegistry {
    entries: BTreeMap<String, RuntimeInfo>,
}

impl EnvironmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&RuntimeInfo> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Register `info` under `alias` unless an entry with an equal or higher
    /// version is already there. Returns whether the entry changed.
    pub fn insert_if_higher(&mut self, alias: &str, info: &RuntimeInfo) -> bool {
        match self.entries.get(alias) {
            Some(existing) if existing.version >= info.version => false,
            _ => {
                self.entries.insert(alias.to_string(), info.clone());
                true
            }
        }
    }

    /// Register `info` under `alias` only if nothing claims it yet.
    pub fn insert_if_absent(&mut self, alias: &str, info: &RuntimeInfo) -> bool {
        if self.entries.contains_key(alias) {
            return false;
        }
        self.entries.insert(alias.to_string(), info.clone());
        true
    }

    /// Record the isolation mode on every alias backed by `executable`.
    pub fn set_isolation(&mut self, executable: &Path, mode: IsolationMode) {
        for info in self.entries.values_mut() {
            if info.executable_path == executable {
                info.isolation = Some(mode);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RuntimeInfo)> {
        self.entries.iter()
    }

    /// Distinct runtimes, highest version first.
    pub fn runtimes(&self) -> Vec<&RuntimeInfo> {
        let mut out: Vec<&RuntimeInfo> = Vec::new();
        for info in self.entries.values() {
            if !out.iter().any(|o| o.executable_path == info.executable_path) {
                out.push(info);
            }
        }
        out.sort_by(|a, b| {
            a.family
                .cmp(&b.family)
                .then_with(|| b.version.cmp(&a.version))
        });
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Resolution ─────────────────────────────────────────────────────────────

/// Inputs of one resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Declared environment name → executable.
    pub explicit: BTreeMap<String, PathBuf>,
    pub search_paths: Vec<PathBuf>,
    /// Stripped executable names discovery accepts.
    pub known_names: Vec<String>,
    /// Names that must get an isolation check (and, if `require_all`, exist).
    pub requested: Vec<String>,
    /// Interpreter whose virtualenv may build environments for others.
    pub host_python: Option<PathBuf>,
    /// Fail instead of reporting missing names.
    pub require_all: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub registry: EnvironmentRegistry,
    /// Requested names no runtime satisfies, in request order.
    pub missing: Vec<String>,
}

/// `python3` or `python` from `$PATH`, used when no host interpreter is configured.
pub fn default_host_python() -> Option<PathBuf> {
    which::which("python3")
        .or_else(|_| which::which("python"))
        .ok()
}

/// Resolve the registry for `request`.
pub fn resolve(
    request: &ResolveRequest,
    cache: &mut ProbeCache,
    runner: &dyn ProcessRunner,
) -> Result<Resolution, EnvironmentError> {
    let mut registry = EnvironmentRegistry::new();

    for (name, path) in &request.explicit {
        if !is_executable(path) {
            return Err(EnvironmentError::NotExecutable { path: path.clone() });
        }
        let path = std::fs::canonicalize(path)
            .map_err(|_| EnvironmentError::NotExecutable { path: path.clone() })?;
        let info = probe(&path, cache, runner)?;
        if !info.satisfies(name) {
            return Err(EnvironmentError::VersionMismatch {
                name: name.clone(),
                path,
            });
        }
        for alias in info.names() {
            registry.insert_if_higher(&alias, &info);
        }
    }

    let discovery = Discovery::new(request.search_paths.clone(), request.known_names.clone());
    for path in discovery.candidates() {
        let info = match probe(&path, cache, runner) {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!("Ignoring {}: {}", path.display(), e);
                continue;
            }
        };
        for alias in info.names() {
            registry.insert_if_absent(&alias, &info);
        }
    }

    let mut missing = Vec::new();
    for name in &request.requested {
        let Some(info) = registry.get(name) else {
            if request.require_all {
                return Err(EnvironmentError::NotFound { name: name.clone() });
            }
            tracing::error!("ERROR: Could not find an executable for {}", name);
            missing.push(name.clone());
            continue;
        };
        if info.isolation.is_some() {
            continue;
        }
        let exe = info.executable_path.clone();
        let mode = check_isolation(info, request.host_python.as_deref(), runner)?;
        tracing::debug!("{} uses {} isolation", exe.display(), mode);
        registry.set_isolation(&exe, mode);
        cache.update_isolation(&exe, mode);
    }

    Ok(Resolution { registry, missing })
}

/// Decide how environments for `info` are created.
pub fn check_isolation(
    info: &RuntimeInfo,
    host_python: Option<&Path>,
    runner: &dyn ProcessRunner,
) -> Result<IsolationMode, EnvironmentError> {
    if info.version.is_older_than(MIN_ISOLATION_VERSION) {
        return Ok(IsolationMode::Unsupported);
    }
    let exe = &info.executable_path;
    if has_virtualenv(exe, runner) {
        return Ok(IsolationMode::Internal);
    }
    // Most likely this interpreter has no virtualenv module; try the host's.
    if let Some(host) = host_python {
        if can_use_host_virtualenv(host, exe, runner) {
            return Ok(IsolationMode::External);
        }
    }
    Err(EnvironmentError::NoIsolationTool {
        path: exe.clone(),
        host: host_python
            .map(|h| h.display().to_string())
            .unwrap_or_else(|| "the host interpreter".to_string()),
    })
}

fn has_virtualenv(exe: &Path, runner: &dyn ProcessRunner) -> bool {
    let spec = ProcessSpec::new(exe).args(["-m", "virtualenv", "--version"]);
    tracing::trace!("Checking for virtualenv: {}", spec.display());
    match runner.run(&spec) {
        Ok(out) => {
            tracing::trace!("{}{}", out.stdout_str(), out.stderr_str());
            out.success() && !out.stderr_str().contains("No module named")
        }
        Err(_) => false,
    }
}

fn can_use_host_virtualenv(host: &Path, exe: &Path, runner: &dyn ProcessRunner) -> bool {
    let Ok(scratch) = tempfile::tempdir() else {
        return false;
    };
    let spec = ProcessSpec::new(host)
        .args(["-m", "virtualenv", "-p"])
        .arg(exe)
        .arg(scratch.path().join("env"));
    tracing::trace!("Trying host virtualenv: {}", spec.display());
    match runner.run(&spec) {
        // virtualenv versions disagree on how they report this; accept only a clean run.
        Ok(out) => out.success() && !out.stdout_str().contains("ERROR:"),
        Err(_) => false,
    }
}
