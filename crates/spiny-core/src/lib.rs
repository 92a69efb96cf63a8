pub mod config;
pub mod error;
pub mod observability;
pub mod probe_cache;
pub mod project;
pub mod runtime;
