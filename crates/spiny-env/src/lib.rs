//! Interpreter discovery, environment resolution and the provision/test engine.
//!
//! Flow of a run:
//!
//! 1. [`environments`] decides which environment names are requested.
//! 2. [`resolver`] maps names to interpreters found by [`discovery`] and
//!    identified by [`probe`].
//! 3. [`metadata`] reads the project's dependencies per interpreter.
//! 4. [`engine`] provisions, installs and runs the test commands in parallel.

pub mod discovery;
pub mod engine;
pub mod environments;
pub mod log;
pub mod metadata;
pub mod probe;
pub mod process;
pub mod resolver;

#[cfg(test)]
mod testing;

pub use engine::{run_all, CancelToken, EngineOptions, Outcome, RunReport, WorkItem};
pub use process::{ProcessRunner, SystemRunner};
pub use resolver::{resolve, Resolution, ResolveRequest};
