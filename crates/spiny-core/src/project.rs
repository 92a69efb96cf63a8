//! Project metadata as reported by the metadata extractor.
//!
//! The core only consumes this as data; how it is obtained (running a
//! project's `setup.py` in a helper process) lives in `spiny-env`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Keyword arguments a project passes to `setup()`, restricted to the ones
/// spiny cares about. Missing fields deserialize as empty.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectMetadata {
    pub install_requires: Vec<String>,
    pub setup_requires: Vec<String>,
    pub tests_require: Vec<String>,
    pub extras_require: HashMap<String, Vec<String>>,
    pub dependency_links: Vec<String>,
    pub classifiers: Vec<String>,
}

impl ProjectMetadata {
    /// install + setup + tests + `extras_require["tests"]`, first occurrence wins.
    pub fn dependency_specifiers(&self) -> Vec<String> {
        let extras = self
            .extras_require
            .get("tests")
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let mut out: Vec<String> = Vec::new();
        for spec in self
            .install_requires
            .iter()
            .chain(&self.setup_requires)
            .chain(&self.tests_require)
            .chain(extras)
        {
            let spec = spec.trim();
            if !spec.is_empty() && !out.iter().any(|s| s == spec) {
                out.push(spec.to_string());
            }
        }
        out
    }
}

/// Parse `requirements.txt` content: one specifier per line, comments, blank
/// lines and pip option lines (`-r`, `-e`, `--index-url`, …) skipped.
pub fn parse_requirements(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|l| match l.find(" #") {
            Some(pos) => &l[..pos],
            None => l,
        })
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
        .map(String::from)
        .collect()
}

/// Read `requirements.txt` from `project_dir`; absent file → empty list.
pub fn read_requirements(project_dir: &Path) -> std::io::Result<Vec<String>> {
    let path = project_dir.join("requirements.txt");
    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(parse_requirements(&content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}
