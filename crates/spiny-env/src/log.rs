//! Quiet-mode aware logging. When SPINY_QUIET=1, progress `[INFO]` lines are
//! suppressed even if the subscriber would let them through.
//! Uses `tracing::info!` so output is captured by the tracing subscriber.

#[macro_export]
macro_rules! info_log {
    ($($arg:tt)*) => {{
        if !$crate::log::is_quiet() {
            tracing::info!($($arg)*);
        }
    }};
}

pub fn is_quiet() -> bool {
    spiny_core::config::ObservabilityConfig::from_env().quiet
}
