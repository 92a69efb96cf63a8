//! Observability: tracing initialization and verbosity levels.
//!
//! Uses `config::ObservabilityConfig` for SPINY_QUIET, SPINY_LOG_LEVEL and
//! SPINY_LOG_JSON. `RUST_LOG` overrides everything.

use tracing_subscriber::{prelude::*, EnvFilter};

/// The five output severities.
///
/// | Verbosity | tracing level | shows                                   |
/// |-----------|---------------|-----------------------------------------|
/// | Critical  | error         | fatal problems only                     |
/// | Summary   | warn          | per-environment summary and warnings    |
/// | Normal    | info          | progress, subprocess stderr             |
/// | Verbose   | debug         | subprocess stdout                       |
/// | Debug     | trace         | every command line and probe            |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Critical,
    Summary,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    /// From `-v` / `-q` counts; Normal is the baseline.
    pub fn from_flags(verbose: u8, quiet: u8) -> Self {
        let level = 2i16 + i16::from(verbose) - i16::from(quiet);
        match level {
            i16::MIN..=0 => Self::Critical,
            1 => Self::Summary,
            2 => Self::Normal,
            3 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    pub fn as_level_str(self) -> &'static str {
        match self {
            Self::Critical => "error",
            Self::Summary => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
            Self::Debug => "trace",
        }
    }
}

/// Initialize tracing. Call once at process startup.
/// When SPINY_QUIET=1, verbosity is capped at Summary.
pub fn init_tracing(verbosity: Verbosity) {
    let cfg = crate::config::ObservabilityConfig::from_env();
    let verbosity = if cfg.quiet {
        verbosity.min(Verbosity::Summary)
    } else {
        verbosity
    };
    let level = crate::config::ObservabilityConfig::default_filter(verbosity.as_level_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .without_time()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
}
