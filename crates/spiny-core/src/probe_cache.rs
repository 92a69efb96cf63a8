//! Interpreter probe cache.
//!
//! Persists probe results to `~/.cache/spiny/pythons.json`. Key = canonical
//! executable path. An entry is reused only while the executable's mtime equals
//! the recorded `probed_mtime`, so upgrading an interpreter forces a re-probe.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::runtime::RuntimeInfo;

const CACHE_FILENAME: &str = "pythons.json";

/// Default on-disk location of the probe cache.
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("spiny")
        .join(CACHE_FILENAME)
}

/// Path → `RuntimeInfo` map, passed explicitly into every probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeCache {
    entries: BTreeMap<PathBuf, RuntimeInfo>,
    dirty: bool,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache. A missing file yields an empty cache; a corrupt one is
    /// logged and discarded.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not load info cache from {}: {}", path.display(), e);
                }
                return Self::new();
            }
        };
        match serde_json::from_str::<BTreeMap<PathBuf, RuntimeInfo>>(&content) {
            Ok(entries) => Self {
                entries,
                dirty: false,
            },
            Err(e) => {
                tracing::warn!("Could not load info cache from {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Write the cache if anything changed since it was loaded.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Create cache dir {}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(&self.entries)?;
        fs::write(path, content).with_context(|| format!("Write {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }

    /// Cached entry for `path`, if its recorded mtime still matches `mtime`.
    pub fn fresh(&self, path: &Path, mtime: SystemTime) -> Option<&RuntimeInfo> {
        self.entries
            .get(path)
            .filter(|info| info.probed_mtime == mtime)
    }

    pub fn get(&self, path: &Path) -> Option<&RuntimeInfo> {
        self.entries.get(path)
    }

    pub fn insert(&mut self, info: RuntimeInfo) {
        self.entries.insert(info.executable_path.clone(), info);
        self.dirty = true;
    }

    /// Record an isolation check result on the cached entry for `path`.
    pub fn update_isolation(&mut self, path: &Path, mode: crate::runtime::IsolationMode) {
        if let Some(info) = self.entries.get_mut(path) {
            if info.isolation != Some(mode) {
                info.isolation = Some(mode);
                self.dirty = true;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
