//! Runtime prober: ask an interpreter who it is.
//!
//! Runs `<exe> -V`, parses `<family> <version>` (with the PyPy dialect as a
//! special case) and derives the environment-name aliases. Results are cached
//! per executable path and reused while the file's mtime is unchanged.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use spiny_core::error::ProbeError;
use spiny_core::probe_cache::ProbeCache;
use spiny_core::runtime::{RuntimeInfo, Version};

use crate::process::{ProcessRunner, ProcessSpec};

fn pypy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"PyPy ([\d.]*)").expect("static pypy regex"))
}

/// Split version output into `(family, version)`.
///
/// `Python 3.9.1` → `("Python", "3.9.1")`. PyPy reports the language version
/// first and its own version inside brackets; the family becomes `PyPy3` or
/// `PyPy` depending on the language major and the PyPy version is used.
pub fn parse_version_output(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    let parts: Vec<&str> = text.split_whitespace().collect();
    if let Some(caps) = pypy_re().captures(text) {
        let reported = parts.get(1)?;
        let family = if reported.starts_with('3') {
            "PyPy3"
        } else {
            "PyPy"
        };
        return Some((family.to_string(), caps[1].to_string()));
    }
    match parts.as_slice() {
        [family, version] => Some((family.to_string(), version.to_string())),
        _ => None,
    }
}

/// Probe `path`, consulting and updating `cache`.
pub fn probe(
    path: &Path,
    cache: &mut ProbeCache,
    runner: &dyn ProcessRunner,
) -> Result<RuntimeInfo, ProbeError> {
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| ProbeError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
    if let Some(info) = cache.fresh(path, mtime) {
        tracing::trace!("Using cached version info for {}", path.display());
        return Ok(info.clone());
    }

    tracing::trace!("Getting Python version for {}", path.display());
    let spec = ProcessSpec::new(path).arg("-V");
    let output = runner.run(&spec).map_err(|source| ProbeError::Spawn {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::trace!(
        "{} -V: stdout={:?} stderr={:?}",
        path.display(),
        output.stdout_str(),
        output.stderr_str()
    );

    // Some interpreters print the version on stdout, others on stderr.
    let stdout = output.stdout_str();
    let text = if stdout.trim().is_empty() {
        output.stderr_str()
    } else {
        stdout
    };
    if text.trim().is_empty() {
        return Err(ProbeError::NoOutput {
            path: path.to_path_buf(),
        });
    }

    let unparseable = || ProbeError::Unparseable {
        path: path.to_path_buf(),
        output: text.trim().to_string(),
    };
    let (family, version) = parse_version_output(&text).ok_or_else(unparseable)?;
    let version = Version::parse(&version).map_err(|_| unparseable())?;

    let info = RuntimeInfo::new(family, version, path.to_path_buf(), mtime);
    cache.insert(info.clone());
    Ok(info)
}
