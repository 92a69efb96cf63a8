//! Synchronous subprocess execution.
//!
//! Everything spiny runs (version probes, virtualenv, pip, test commands) goes
//! through a [`ProcessRunner`], so the resolver and the engine can be driven
//! by scripted runners in tests.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

/// One command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Build from an argv whose first element is the program.
    pub fn from_argv<S: Into<OsString>>(argv: Vec<S>) -> Option<Self> {
        let mut it = argv.into_iter();
        let program = it.next()?;
        Some(Self::new(program).args(it))
    }

    /// Shell-like rendering for log lines.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|a| a.to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; -1 when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Runs a process to completion and captures both output streams.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput>;
}

/// Spawns real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        let mut child = cmd.spawn()?;

        // Drain both pipes while the child runs; a child filling one pipe
        // buffer would otherwise block forever.
        let stdout_handle = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_handle = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let status = child.wait()?;
        let stdout = stdout_handle
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        let stderr = stderr_handle
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();

        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

/// Forward captured output to the log: stderr at info, stdout at debug, or
/// both at info when `escalate_stdout` is set.
pub fn log_output(context: &str, output: &ProcessOutput, escalate_stdout: bool) {
    let stderr = output.stderr_str();
    let stderr = stderr.trim_end();
    if !stderr.is_empty() {
        tracing::info!("[{}] {}", context, stderr);
    }
    let stdout = output.stdout_str();
    let stdout = stdout.trim_end();
    if !stdout.is_empty() {
        if escalate_stdout {
            tracing::info!("[{}] {}", context, stdout);
        } else {
            tracing::debug!("[{}] {}", context, stdout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder_and_display() {
        let spec = ProcessSpec::new("/usr/bin/python3")
            .arg("-m")
            .args(["virtualenv", "/tmp/env"])
            .current_dir("/work");
        assert_eq!(spec.display(), "/usr/bin/python3 -m virtualenv /tmp/env");
        assert_eq!(spec.cwd, Some(PathBuf::from("/work")));
        assert!(ProcessSpec::from_argv(Vec::<String>::new()).is_none());
        let from = ProcessSpec::from_argv(vec!["pip", "install"]).unwrap();
        assert_eq!(from.program, OsString::from("pip"));
        assert_eq!(from.args, vec![OsString::from("install")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_both_streams() {
        let out = SystemRunner
            .run(&ProcessSpec::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout_str(), "out\n");
        assert_eq!(out.stderr_str(), "err\n");
        assert!(!out.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_large_output_does_not_deadlock() {
        let out = SystemRunner
            .run(&ProcessSpec::new("sh").args([
                "-c",
                "i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done",
            ]))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.len(), 20000 * 11);
    }

    #[test]
    fn test_system_runner_missing_program() {
        let err = SystemRunner.run(&ProcessSpec::new("/nonexistent/spiny-test-binary"));
        assert!(err.is_err());
    }
}
