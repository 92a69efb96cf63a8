//! CLI commands and the plumbing they share.
//!
//!   run:     resolve, provision and test, then print a summary
//!   pythons: list usable interpreters
//!   envs:    list requested environment names

pub mod envs;
pub mod pythons;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use spiny_core::config::SpinyConfig;
use spiny_core::probe_cache::ProbeCache;
use spiny_env::discovery::search_paths_from_env;
use spiny_env::environments::{compute_requested_names, EnvironmentSource};
use spiny_env::metadata::{MetadataExtractor, SetupPyExtractor};
use spiny_env::process::ProcessRunner;
use spiny_env::resolver::{default_host_python, ResolveRequest};

/// Interpreter used for virtualenv fallback and metadata extraction.
pub(crate) fn host_python(config: &SpinyConfig) -> Option<PathBuf> {
    config.host_python.clone().or_else(default_host_python)
}

pub(crate) fn metadata_extractor(
    config: &SpinyConfig,
    host: Option<&PathBuf>,
    runner: &Arc<dyn ProcessRunner>,
) -> Option<SetupPyExtractor> {
    if !config.use_setup_py {
        return None;
    }
    match host {
        Some(h) => Some(SetupPyExtractor::new(h.clone(), Arc::clone(runner))),
        None => {
            tracing::warn!("No host Python found, dependencies in setup.py are ignored");
            None
        }
    }
}

/// The environment names this run tests.
///
/// An explicit `environments` setting wins. Otherwise the classifiers in
/// `setup.py` decide: read through the extractor when there is one, scanned
/// from the file text when there isn't (or when extraction fails).
pub(crate) fn requested_names(
    config: &SpinyConfig,
    extractor: Option<&dyn MetadataExtractor>,
) -> Result<Vec<String>> {
    if let Some(envs) = &config.environments {
        return Ok(compute_requested_names(&EnvironmentSource::Explicit(
            envs.join(" "),
        )));
    }
    let setup_py = config.project_dir.join("setup.py");
    if !setup_py.is_file() {
        return Ok(Vec::new());
    }
    if let Some(extractor) = extractor {
        match extractor.extract(&config.project_dir, None) {
            Ok(meta) if !meta.classifiers.is_empty() => {
                return Ok(compute_requested_names(&EnvironmentSource::Classifiers(
                    meta.classifiers,
                )));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not read setup.py metadata: {:#}", e),
        }
    }
    let text = std::fs::read_to_string(&setup_py)
        .with_context(|| format!("Could not read {}", setup_py.display()))?;
    Ok(compute_requested_names(&EnvironmentSource::SetupPy(text)))
}

pub(crate) fn resolve_request(
    config: &SpinyConfig,
    requested: Vec<String>,
    host: Option<PathBuf>,
) -> ResolveRequest {
    ResolveRequest {
        explicit: config.pythons.clone(),
        search_paths: search_paths_from_env(),
        known_names: config.runtime_names.clone(),
        requested,
        host_python: host,
        require_all: config.require_all,
    }
}

/// Persist the probe cache; a failure only costs re-probing next time.
pub(crate) fn save_cache(cache: &mut ProbeCache, config: &SpinyConfig) {
    if let Err(e) = cache.save(&config.cache_file) {
        tracing::warn!("Could not save {}: {:#}", config.cache_file.display(), e);
    }
}
