//! Project metadata extraction.
//!
//! A project's `setup()` keyword arguments are captured by running a small
//! helper script with a host interpreter; the helper prints them as JSON on a
//! marker line and the result is parsed into [`ProjectMetadata`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use spiny_core::project::{read_requirements, ProjectMetadata};
use spiny_core::runtime::Version;

use crate::process::{ProcessRunner, ProcessSpec};

const HELPER_SCRIPT: &str = include_str!("extract_setup.py");
const MARKER: &str = "SPINY-METADATA:";

/// Source of project metadata.
pub trait MetadataExtractor: Send + Sync {
    /// Metadata as the project declares it when run by `version`
    /// (`None`: the extractor's own interpreter version).
    fn extract(&self, project_dir: &Path, version: Option<&Version>) -> Result<ProjectMetadata>;
}

/// Runs `setup.py` under a host interpreter with `setup()` replaced.
pub struct SetupPyExtractor {
    host: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl SetupPyExtractor {
    pub fn new(host: impl Into<PathBuf>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            host: host.into(),
            runner,
        }
    }
}

impl MetadataExtractor for SetupPyExtractor {
    fn extract(&self, project_dir: &Path, version: Option<&Version>) -> Result<ProjectMetadata> {
        if !project_dir.join("setup.py").is_file() {
            return Ok(ProjectMetadata::default());
        }
        let spec = ProcessSpec::new(&self.host)
            .arg("-c")
            .arg(HELPER_SCRIPT)
            .arg(project_dir)
            .arg(version.map(Version::as_str).unwrap_or(""))
            .current_dir(project_dir);
        tracing::debug!("Reading project metadata with {}", self.host.display());
        let output = self
            .runner
            .run(&spec)
            .with_context(|| format!("Could not run {}", self.host.display()))?;
        if !output.success() {
            bail!(
                "Reading setup.py failed (exit code {}): {}",
                output.exit_code,
                output.stderr_str().trim()
            );
        }
        parse_helper_output(&output.stdout_str())
    }
}

/// The JSON on the last marker line of the helper's stdout.
pub fn parse_helper_output(stdout: &str) -> Result<ProjectMetadata> {
    let json = stdout
        .lines()
        .rev()
        .find_map(|l| l.strip_prefix(MARKER))
        .context("setup.py metadata helper produced no result")?;
    serde_json::from_str(json).context("Invalid metadata from setup.py helper")
}

/// Dependency specifiers and extra package locations for one environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub specifiers: Vec<String>,
    /// Passed to the installer as `--find-links`.
    pub find_links: Vec<String>,
}

/// Which project files dependencies are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencySources {
    pub use_setup_py: bool,
    pub use_requirements_txt: bool,
}

/// Dependencies of `project_dir` as seen by an interpreter of `version`.
/// Without an extractor `setup.py` is not consulted.
pub fn dependencies_for(
    project_dir: &Path,
    sources: DependencySources,
    extractor: Option<&dyn MetadataExtractor>,
    version: &Version,
) -> Result<Dependencies> {
    let mut deps = Dependencies::default();
    if let Some(extractor) = extractor.filter(|_| sources.use_setup_py) {
        let meta = extractor.extract(project_dir, Some(version))?;
        deps.specifiers = meta.dependency_specifiers();
        deps.find_links = meta.dependency_links;
    }
    if sources.use_requirements_txt {
        let reqs = read_requirements(project_dir).with_context(|| {
            format!("Could not read requirements.txt in {}", project_dir.display())
        })?;
        for r in reqs {
            if !deps.specifiers.contains(&r) {
                deps.specifiers.push(r);
            }
        }
    }
    Ok(deps)
}
