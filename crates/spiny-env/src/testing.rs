//! Scripted process runner for unit tests.

use std::io;
use std::sync::Mutex;

use crate::process::{ProcessOutput, ProcessRunner, ProcessSpec};

type Matcher = Box<dyn Fn(&[String]) -> bool + Send + Sync>;

/// Answers each command with the first matching canned output (exit 0 with no
/// output when nothing matches) and records every call.
pub(crate) struct ScriptedRunner {
    rules: Vec<(Matcher, io::Result<ProcessOutput>)>,
    calls: Mutex<Vec<ProcessSpec>>,
}

pub(crate) fn argv(spec: &ProcessSpec) -> Vec<String> {
    std::iter::once(&spec.program)
        .chain(&spec.args)
        .map(|a| a.to_string_lossy().to_string())
        .collect()
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn on<F>(mut self, matcher: F, exit_code: i32, stdout: &str, stderr: &str) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.rules.push((
            Box::new(matcher),
            Ok(ProcessOutput {
                exit_code,
                stdout: stdout.as_bytes().to_vec(),
                stderr: stderr.as_bytes().to_vec(),
            }),
        ));
        self
    }

    pub(crate) fn fail_spawn<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.rules.push((
            Box::new(matcher),
            Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
        ));
        self
    }

    pub(crate) fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().iter().map(argv).collect()
    }

    pub(crate) fn count<F>(&self, matcher: F) -> usize
    where
        F: Fn(&[String]) -> bool,
    {
        self.calls().iter().filter(|c| matcher(c)).count()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, spec: &ProcessSpec) -> io::Result<ProcessOutput> {
        self.calls.lock().unwrap().push(spec.clone());
        let argv = argv(spec);
        for (matcher, result) in &self.rules {
            if matcher(&argv) {
                return match result {
                    Ok(out) => Ok(out.clone()),
                    Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
                };
            }
        }
        Ok(ProcessOutput::default())
    }
}
