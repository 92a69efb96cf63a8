//! Which environment names a run asks for.
//!
//! Names come from an explicit list or from the project's trove classifiers.
//! A general name is dropped when a more specific one is also requested:
//! `python3` + `python3.9` tests only `python3.9`.

use std::sync::OnceLock;

use regex::Regex;

/// Where the requested names come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentSource {
    /// Space-separated names from configuration.
    Explicit(String),
    /// `classifiers` as reported by the metadata extractor.
    Classifiers(Vec<String>),
    /// Raw `setup.py` text, scanned without running it.
    SetupPy(String),
}

fn trove_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"Programming Language :: Python :: (.*?)( :: (.*?))?['"]"#)
            .expect("static trove regex")
    })
}

/// Requested names for `source`, specificity-deduplicated.
pub fn compute_requested_names(source: &EnvironmentSource) -> Vec<String> {
    let names = match source {
        EnvironmentSource::Explicit(list) => list.split_whitespace().map(String::from).collect(),
        EnvironmentSource::Classifiers(classifiers) => names_from_classifiers(classifiers),
        EnvironmentSource::SetupPy(text) => names_from_setup_py(text),
    };
    specificity_dedup(&names)
}

/// Names from classifier strings such as `Programming Language :: Python :: 3.9`.
pub fn names_from_classifiers(classifiers: &[String]) -> Vec<String> {
    classifiers
        .iter()
        .filter_map(|c| {
            let parts: Vec<&str> = c.split("::").map(str::trim).collect();
            match parts.as_slice() {
                ["Programming Language", "Python", version] => {
                    environment_name(version, None)
                }
                ["Programming Language", "Python", version, qualifier, ..] => {
                    environment_name(version, Some(qualifier))
                }
                _ => None,
            }
        })
        .collect()
}

/// Names from classifiers written literally in `setup.py`.
pub fn names_from_setup_py(text: &str) -> Vec<String> {
    trove_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let version = caps.get(1).map_or("", |m| m.as_str());
            let qualifier = caps.get(3).map(|m| m.as_str());
            environment_name(version, qualifier)
        })
        .collect()
}

/// `("3.9", None)` → `python3.9`; `("Implementation", Some("PyPy"))` → `pypy`.
fn environment_name(version: &str, qualifier: Option<&str>) -> Option<String> {
    match qualifier {
        Some(q) => {
            let q = q.trim().to_lowercase();
            // CPython support is assumed; "3 :: Only" is not an implementation.
            if q.is_empty() || q == "cpython" || q == "only" {
                None
            } else {
                Some(q)
            }
        }
        None => {
            let version = version.trim();
            if version.is_empty() {
                None
            } else {
                Some(format!("python{}", version))
            }
        }
    }
}

/// Drop duplicates and every name that prefixes a longer requested name.
pub fn specificity_dedup(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        let superseded = names
            .iter()
            .any(|other| other.len() > name.len() && other.starts_with(name.as_str()));
        if !superseded && !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}
