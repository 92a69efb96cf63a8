//! Error taxonomy shared by the resolver, the engine and the CLI.
//!
//! Resolution errors (`ProbeError`, `EnvironmentError`) abort a run before any
//! environment is provisioned. `PhaseError` is scoped to a single environment
//! and is turned into that environment's outcome by the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Could not determine a runtime's identity.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Could not run {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} printed no version information")]
    NoOutput { path: PathBuf },

    #[error("Could not parse version output of {path}: {output:?}")]
    Unparseable { path: PathBuf, output: String },

    #[error("Could not stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A requested or declared environment cannot be satisfied.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("{path} is not executable")]
    NotExecutable { path: PathBuf },

    #[error("Executable {path} is not the given version {name}")]
    VersionMismatch { name: String, path: PathBuf },

    #[error("Could not find an executable for {name}")]
    NotFound { name: String },

    #[error(
        "The Python at {path} does not have virtualenv installed, and the virtualenv for {host} \
         could not install that Python version. To solve this, install virtualenv for {path}"
    )]
    NoIsolationTool { path: PathBuf, host: String },

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Failure of one phase of one environment.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("provisioning failed for {0}")]
    Provision(String),

    #[error("dependency install failed for {0}")]
    DependencyInstall(String),

    #[error("setup commands failed for {0}")]
    SetupCommand(String),

    #[error("tests failed for {0}")]
    TestCommand(String),

    #[error("could not run {program} for {name}: {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write environment state for {name}: {source}")]
    State {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted while working on {0}")]
    Interrupted(String),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid override {0:?}: expected section.key=value")]
    Override(String),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] toml::de::Error),
}
