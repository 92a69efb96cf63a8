//! Runtime discovery: find interpreter executables on the search path.
//!
//! A file is a candidate when its lowercased name, stripped of everything but
//! ASCII letters, equals a known runtime name (`python3.9` → `python`,
//! `pypy3` → `pypy`). Candidates are canonicalized, must be executable and are
//! yielded once per pass.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs::ReadDir;
use std::path::{Path, PathBuf};

/// Directories from `$PATH`, in order.
pub fn search_paths_from_env() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default()
}

/// `Python3.9.exe` → `pythonexe`; `pypy3` → `pypy`.
pub fn stripped_name(file_name: &str) -> String {
    file_name
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_lowercase)
        .collect()
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Scanner over a fixed list of search directories.
#[derive(Debug, Clone)]
pub struct Discovery {
    search_paths: Vec<PathBuf>,
    known_names: Vec<String>,
}

impl Discovery {
    pub fn new(search_paths: Vec<PathBuf>, known_names: Vec<String>) -> Self {
        Self {
            search_paths,
            known_names,
        }
    }

    /// Start a fresh pass over the filesystem. Each call re-scans.
    pub fn candidates(&self) -> Candidates<'_> {
        Candidates {
            known_names: &self.known_names,
            pending_dirs: self.search_paths.iter().cloned().collect(),
            current: None,
            seen: HashSet::new(),
        }
    }
}

/// Lazy iterator over canonical candidate paths for one discovery pass.
pub struct Candidates<'a> {
    known_names: &'a [String],
    pending_dirs: VecDeque<PathBuf>,
    current: Option<(PathBuf, ReadDir)>,
    seen: HashSet<PathBuf>,
}

impl Candidates<'_> {
    fn accept(&mut self, dir: &Path, file_name: OsString) -> Option<PathBuf> {
        let name = file_name.to_string_lossy();
        let stripped = stripped_name(&name);
        if !self.known_names.iter().any(|k| *k == stripped) {
            return None;
        }
        let fullpath = std::fs::canonicalize(dir.join(&file_name)).ok()?;
        if !is_executable(&fullpath) {
            tracing::trace!("Skipping non-executable {}", fullpath.display());
            return None;
        }
        if !self.seen.insert(fullpath.clone()) {
            return None;
        }
        Some(fullpath)
    }
}

impl Iterator for Candidates<'_> {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            if let Some((dir, entries)) = self.current.as_mut() {
                let dir = dir.clone();
                match entries.next() {
                    Some(Ok(entry)) => {
                        if let Some(path) = self.accept(&dir, entry.file_name()) {
                            return Some(path);
                        }
                        continue;
                    }
                    Some(Err(_)) => continue,
                    None => self.current = None,
                }
            }
            let dir = self.pending_dirs.pop_front()?;
            // Missing or unreadable directories are not an error.
            if let Ok(entries) = std::fs::read_dir(&dir) {
                self.current = Some((dir, entries));
            }
        }
    }
}
