//! Provisioning & execution engine.
//!
//! Every work item (environment name + resolved runtime + dependencies) goes
//! through provision → install → setup commands → test commands, strictly in
//! that order. Items run on a fixed-size rayon pool and report back over a
//! channel; a failing item never affects its siblings.

pub mod provision;
pub mod template;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use spiny_core::error::PhaseError;
use spiny_core::runtime::RuntimeInfo;

use crate::info_log;
use crate::metadata::Dependencies;
use crate::process::{log_output, ProcessOutput, ProcessRunner, ProcessSpec};
use provision::{install_command, provision_command, ProvisionedEnvironment};
use template::Placeholders;

/// One environment to provision and test.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub name: String,
    pub runtime: RuntimeInfo,
    pub dependencies: Dependencies,
}

/// Settings shared by all work items of a run.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub venv_dir: PathBuf,
    pub project_dir: PathBuf,
    pub changedir: Option<PathBuf>,
    pub test_commands: Vec<String>,
    pub setup_commands: Vec<String>,
    pub max_processes: Option<usize>,
    pub index_url: Option<String>,
    /// Runs virtualenv for runtimes with external isolation.
    pub host_python: Option<PathBuf>,
}

impl EngineOptions {
    fn working_dir(&self) -> &Path {
        self.changedir.as_deref().unwrap_or(&self.project_dir)
    }
}

#[derive(Debug)]
pub enum Outcome {
    Succeeded,
    Failed(PhaseError),
    Interrupted,
    Skipped(String),
}

impl Outcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::Interrupted)
    }
}

/// Per-environment results of one run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: BTreeMap<String, Outcome>,
    pub parallelism: usize,
}

impl RunReport {
    /// No failures and no interruptions; skipped environments don't count.
    pub fn is_success(&self) -> bool {
        !self.outcomes.values().any(Outcome::is_fatal)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn summary_lines(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .map(|(name, outcome)| match outcome {
                Outcome::Succeeded => format!("{}: succeeded", name),
                Outcome::Failed(e) => format!("{}: ERROR: {}", name, e),
                Outcome::Interrupted => format!("{}: interrupted", name),
                Outcome::Skipped(why) => format!("{}: skipped ({})", name, why),
            })
            .collect()
    }
}

/// Cooperative cancellation flag shared by all workers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Worker count: `min(cores, items, max)`, at least 1; 1 when the items
/// install different dependency sets into the shared package cache.
pub fn effective_parallelism(
    cores: usize,
    items: usize,
    max: Option<usize>,
    deps_differ: bool,
) -> usize {
    if deps_differ {
        return 1;
    }
    cores.min(items).min(max.unwrap_or(usize::MAX)).max(1)
}

fn dependencies_differ(items: &[WorkItem]) -> bool {
    let mut sets = items.iter().map(|i| {
        let mut s = i.dependencies.specifiers.clone();
        s.sort_unstable();
        s
    });
    match sets.next() {
        Some(first) => sets.any(|s| s != first),
        None => false,
    }
}

/// Provision and test every item; `missing` names are reported as skipped.
pub fn run_all(
    items: Vec<WorkItem>,
    missing: &[String],
    options: &EngineOptions,
    runner: &dyn ProcessRunner,
    cancel: &CancelToken,
) -> RunReport {
    let mut report = RunReport::default();
    for name in missing {
        report
            .outcomes
            .insert(name.clone(), Outcome::Skipped("no executable found".to_string()));
    }
    if items.is_empty() {
        report.parallelism = 1;
        return report;
    }

    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let deps_differ = dependencies_differ(&items);
    if deps_differ {
        tracing::warn!("Dependencies differ between environments, running one at a time");
    }
    let parallelism =
        effective_parallelism(cores, items.len(), options.max_processes, deps_differ);
    report.parallelism = parallelism;
    tracing::debug!(
        "Running {} environment(s) with {} worker(s)",
        items.len(),
        parallelism
    );

    let (tx, rx) = mpsc::channel::<(String, Outcome)>();
    match rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism)
        .thread_name(|i| format!("spiny-worker-{}", i))
        .build()
    {
        Ok(pool) => pool.scope(|s| {
            for item in &items {
                let tx = tx.clone();
                s.spawn(move |_| {
                    let outcome = run_one(item, options, runner, cancel);
                    let _ = tx.send((item.name.clone(), outcome));
                });
            }
        }),
        Err(e) => {
            tracing::warn!("Could not start worker pool ({}), running sequentially", e);
            for item in &items {
                let _ = tx.send((item.name.clone(), run_one(item, options, runner, cancel)));
            }
        }
    }
    drop(tx);

    for (name, outcome) in rx {
        report.outcomes.insert(name, outcome);
    }
    report
}

/// Provision, install, set up and test one environment.
pub fn run_one(
    item: &WorkItem,
    options: &EngineOptions,
    runner: &dyn ProcessRunner,
    cancel: &CancelToken,
) -> Outcome {
    if cancel.is_cancelled() {
        return Outcome::Interrupted;
    }
    match run_phases(item, options, runner, cancel) {
        Ok(()) => {
            info_log!("[{}] succeeded", item.name);
            Outcome::Succeeded
        }
        Err(PhaseError::Interrupted(_)) => Outcome::Interrupted,
        Err(e) => {
            tracing::error!("[{}] {}", item.name, e);
            Outcome::Failed(e)
        }
    }
}

fn run_phases(
    item: &WorkItem,
    options: &EngineOptions,
    runner: &dyn ProcessRunner,
    cancel: &CancelToken,
) -> Result<(), PhaseError> {
    let name = item.name.as_str();
    let runtime = &item.runtime;
    let mut env = ProvisionedEnvironment::new(item, &options.venv_dir);
    let checkpoint = || {
        if cancel.is_cancelled() {
            Err(PhaseError::Interrupted(name.to_string()))
        } else {
            Ok(())
        }
    };

    if env.needs_provision() {
        checkpoint()?;
        if let Some(spec) =
            provision_command(name, runtime, &env.env_dir, options.host_python.as_deref())?
        {
            info_log!("[{}] Creating environment in {}", name, env.env_dir.display());
            let out = run_logged(name, &spec, runner, cancel, true)?;
            if !out.success() {
                return Err(PhaseError::Provision(name.to_string()));
            }
        }
    }

    if env.needs_install() {
        checkpoint()?;
        if let Some(spec) = install_command(
            &env,
            runtime,
            &item.dependencies,
            options.index_url.as_deref(),
        ) {
            info_log!("[{}] Installing dependencies", name);
            let out = run_logged(name, &spec, runner, cancel, true)?;
            if !out.success() {
                return Err(PhaseError::DependencyInstall(name.to_string()));
            }
        }
        env.write_marker()?;
    } else {
        tracing::debug!("[{}] Environment is up to date", name);
    }

    let placeholders = Placeholders {
        basepython: &runtime.executable_path,
        envdir: &env.env_dir,
        envpython: &env.env_python,
        projectdir: &options.project_dir,
        changedir: options.working_dir(),
    };
    run_commands(
        name,
        &options.setup_commands,
        &placeholders,
        options.working_dir(),
        runner,
        cancel,
    )
    .map_err(|e| match e {
        CommandFailure::Phase(e) => e,
        CommandFailure::Failed => PhaseError::SetupCommand(name.to_string()),
    })?;
    run_commands(
        name,
        &options.test_commands,
        &placeholders,
        options.working_dir(),
        runner,
        cancel,
    )
    .map_err(|e| match e {
        CommandFailure::Phase(e) => e,
        CommandFailure::Failed => PhaseError::TestCommand(name.to_string()),
    })
}

enum CommandFailure {
    /// A command could not run, or the run was cancelled.
    Phase(PhaseError),
    /// A command ran and exited non-zero, or its template was invalid.
    Failed,
}

impl From<PhaseError> for CommandFailure {
    fn from(e: PhaseError) -> Self {
        CommandFailure::Phase(e)
    }
}

fn run_commands(
    name: &str,
    templates: &[String],
    placeholders: &Placeholders<'_>,
    cwd: &Path,
    runner: &dyn ProcessRunner,
    cancel: &CancelToken,
) -> Result<(), CommandFailure> {
    for tmpl in templates {
        if cancel.is_cancelled() {
            return Err(PhaseError::Interrupted(name.to_string()).into());
        }
        let argv = template::render(tmpl, placeholders).map_err(|e| {
            tracing::error!("[{}] {}", name, e);
            CommandFailure::Failed
        })?;
        let Some(spec) = ProcessSpec::from_argv(argv) else {
            return Err(CommandFailure::Failed);
        };
        let spec = spec.current_dir(cwd);
        info_log!("[{}] {}", name, spec.display());
        let out = run_logged(name, &spec, runner, cancel, false)?;
        if !out.success() {
            return Err(CommandFailure::Failed);
        }
    }
    Ok(())
}

/// Run `spec` and forward its output; `escalate_on_failure` raises stdout of
/// a failed run to info.
///
/// Ctrl+C reaches the whole process group, so a child that fails while the
/// token is set was interrupted rather than broken.
fn run_logged(
    name: &str,
    spec: &ProcessSpec,
    runner: &dyn ProcessRunner,
    cancel: &CancelToken,
    escalate_on_failure: bool,
) -> Result<ProcessOutput, PhaseError> {
    tracing::trace!("[{}] Running {}", name, spec.display());
    let out = runner.run(spec).map_err(|source| PhaseError::Spawn {
        name: name.to_string(),
        program: spec.program.to_string_lossy().to_string(),
        source,
    })?;
    if !out.success() && cancel.is_cancelled() {
        tracing::debug!("[{}] {} stopped by interrupt", name, spec.display());
        return Err(PhaseError::Interrupted(name.to_string()));
    }
    log_output(name, &out, escalate_on_failure && !out.success());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use spiny_core::runtime::{IsolationMode, Version};
    use std::time::SystemTime;

    fn runtime(version: &str, mode: IsolationMode) -> RuntimeInfo {
        let mut info = RuntimeInfo::new(
            "Python",
            Version::parse(version).unwrap(),
            PathBuf::from(format!("/opt/python{}/bin/python{}", version, version)),
            SystemTime::UNIX_EPOCH,
        );
        info.isolation = Some(mode);
        info
    }

    fn item(name: &str, version: &str, deps: &[&str]) -> WorkItem {
        WorkItem {
            name: name.to_string(),
            runtime: runtime(version, IsolationMode::Internal),
            dependencies: Dependencies {
                specifiers: deps.iter().map(|s| s.to_string()).collect(),
                find_links: Vec::new(),
            },
        }
    }

    fn options(venv: &Path) -> EngineOptions {
        EngineOptions {
            venv_dir: venv.to_path_buf(),
            project_dir: PathBuf::from("/work/project"),
            test_commands: vec!["{envpython} -m unittest discover".to_string()],
            ..Default::default()
        }
    }

    fn is_virtualenv(a: &[String]) -> bool {
        a.iter().any(|x| x == "virtualenv")
    }

    fn is_install(a: &[String]) -> bool {
        a.iter().any(|x| x == "install")
    }

    fn is_test(a: &[String]) -> bool {
        a.iter().any(|x| x == "unittest")
    }

    #[test]
    fn test_effective_parallelism() {
        assert_eq!(effective_parallelism(8, 3, None, false), 3);
        assert_eq!(effective_parallelism(2, 5, None, false), 2);
        assert_eq!(effective_parallelism(8, 5, Some(4), false), 4);
        assert_eq!(effective_parallelism(8, 5, Some(0), false), 1);
        assert_eq!(effective_parallelism(8, 5, None, true), 1);
    }

    #[test]
    fn test_differing_dependencies_run_serially() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let items = vec![
            item("python3.9", "3.9.1", &["pytest", "six"]),
            item("python3.10", "3.10.2", &["pytest"]),
        ];
        let report = run_all(items, &[], &options(tmp.path()), &runner, &CancelToken::new());
        assert_eq!(report.parallelism, 1);
        assert!(report.is_success());

        let same = vec![
            item("python3.9", "3.9.1", &["six", "pytest"]),
            item("python3.10", "3.10.2", &["pytest", "six"]),
        ];
        assert!(!dependencies_differ(&same));
    }

    #[test]
    fn test_second_run_skips_provision_and_install() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let opts = options(tmp.path());
        let it = item("python3.9", "3.9.1", &["pytest"]);

        assert!(matches!(
            run_one(&it, &opts, &runner, &CancelToken::new()),
            Outcome::Succeeded
        ));
        assert!(matches!(
            run_one(&it, &opts, &runner, &CancelToken::new()),
            Outcome::Succeeded
        ));
        assert_eq!(runner.count(is_virtualenv), 1);
        assert_eq!(runner.count(is_install), 1);
        assert_eq!(runner.count(is_test), 2);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("python3.9/.profile")).unwrap(),
            format!("python3.9\n{}\npytest", it.runtime.executable_path.display())
        );
    }

    #[test]
    fn test_changed_dependencies_reinstall_without_reprovisioning() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let opts = options(tmp.path());
        let cancel = CancelToken::new();
        run_one(&item("python3.9", "3.9.1", &["pytest"]), &opts, &runner, &cancel);
        run_one(&item("python3.9", "3.9.1", &["nose"]), &opts, &runner, &cancel);
        assert_eq!(runner.count(is_virtualenv), 1);
        assert_eq!(runner.count(is_install), 2);
    }

    #[test]
    fn test_provision_failure_stops_the_item() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().on(is_virtualenv, 1, "", "boom");
        let opts = options(tmp.path());
        let it = item("python3.9", "3.9.1", &["pytest"]);
        let outcome = run_one(&it, &opts, &runner, &CancelToken::new());
        assert!(matches!(outcome, Outcome::Failed(PhaseError::Provision(_))));
        assert_eq!(runner.count(is_install), 0);
        assert_eq!(runner.count(is_test), 0);
        assert!(!tmp.path().join("python3.9/.profile").exists());
    }

    #[test]
    fn test_install_failure_leaves_no_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().on(is_install, 1, "Could not find a version", "");
        let opts = options(tmp.path());
        let it = item("python3.9", "3.9.1", &["nope"]);
        let outcome = run_one(&it, &opts, &runner, &CancelToken::new());
        assert_eq!(
            outcome_message(&outcome),
            "dependency install failed for python3.9"
        );
        assert_eq!(runner.count(is_test), 0);
        assert!(!tmp.path().join("python3.9/.profile").exists());
    }

    fn outcome_message(o: &Outcome) -> String {
        match o {
            Outcome::Failed(e) => e.to_string(),
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_one_failing_environment_of_three() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().on(
            |a| is_test(a) && a[0].contains("python3.10"),
            1,
            "1 failed",
            "",
        );
        let items = vec![
            item("python3.9", "3.9.1", &[]),
            item("python3.10", "3.10.2", &[]),
            item("python3.11", "3.11.4", &[]),
        ];
        let report = run_all(items, &[], &options(tmp.path()), &runner, &CancelToken::new());
        assert_eq!(report.outcomes.len(), 3);
        assert!(matches!(report.outcomes["python3.9"], Outcome::Succeeded));
        assert!(matches!(report.outcomes["python3.11"], Outcome::Succeeded));
        assert!(matches!(
            report.outcomes["python3.10"],
            Outcome::Failed(PhaseError::TestCommand(_))
        ));
        assert_eq!(report.exit_code(), 1);
        assert!(report
            .summary_lines()
            .contains(&"python3.10: ERROR: tests failed for python3.10".to_string()));
    }

    #[test]
    fn test_unsupported_runtime_runs_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let mut it = item("python2.3", "2.3.7", &[]);
        it.runtime.isolation = Some(IsolationMode::Unsupported);
        let outcome = run_one(&it, &options(tmp.path()), &runner, &CancelToken::new());
        assert!(matches!(outcome, Outcome::Succeeded));
        assert_eq!(runner.count(is_virtualenv), 0);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], "/opt/python2.3.7/bin/python2.3.7");
        assert!(tmp.path().join("python2.3/.profile").exists());
    }

    #[test]
    fn test_missing_environment_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let report = run_all(
            vec![item("python3.9", "3.9.1", &[])],
            &["jython2".to_string()],
            &options(tmp.path()),
            &runner,
            &CancelToken::new(),
        );
        assert!(matches!(report.outcomes["jython2"], Outcome::Skipped(_)));
        assert!(matches!(report.outcomes["python3.9"], Outcome::Succeeded));
        assert!(runner.calls().iter().all(|c| !c.join(" ").contains("jython")));
        assert!(report.is_success());
        assert!(report
            .summary_lines()
            .contains(&"jython2: skipped (no executable found)".to_string()));
    }

    #[test]
    fn test_cancelled_run_is_interrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = run_all(
            vec![item("python3.9", "3.9.1", &[]), item("python3.10", "3.10.2", &[])],
            &[],
            &options(tmp.path()),
            &runner,
            &cancel,
        );
        assert!(report.outcomes.values().all(|o| matches!(o, Outcome::Interrupted)));
        assert!(runner.calls().is_empty());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_setup_commands_run_before_tests() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().on(|a| a[0] == "make", 2, "", "no rule");
        let mut opts = options(tmp.path());
        opts.setup_commands = vec!["make -C {projectdir} fixtures".to_string()];
        let it = item("python3.9", "3.9.1", &[]);
        let outcome = run_one(&it, &opts, &runner, &CancelToken::new());
        assert_eq!(outcome_message(&outcome), "setup commands failed for python3.9");
        assert_eq!(runner.count(is_test), 0);
        assert_eq!(
            runner.calls().last().unwrap(),
            &vec!["make", "-C", "/work/project", "fixtures"]
        );
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail_spawn(is_test);
        let it = item("python3.9", "3.9.1", &[]);
        let outcome = run_one(&it, &options(tmp.path()), &runner, &CancelToken::new());
        assert!(matches!(outcome, Outcome::Failed(PhaseError::Spawn { .. })));
    }

    #[test]
    fn test_command_killed_by_interrupt_is_interrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let runner = ScriptedRunner::new().on(
            move |a| {
                if is_test(a) {
                    token.cancel();
                }
                is_test(a)
            },
            -1,
            "",
            "KeyboardInterrupt",
        );
        let it = item("python3.9", "3.9.1", &[]);
        let outcome = run_one(&it, &options(tmp.path()), &runner, &cancel);
        assert!(matches!(outcome, Outcome::Interrupted), "{:?}", outcome);
        assert_eq!(runner.count(is_test), 1);
    }

    #[test]
    fn test_interrupted_provision_is_not_a_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let runner = ScriptedRunner::new().on(
            move |a| {
                if is_virtualenv(a) {
                    token.cancel();
                }
                is_virtualenv(a)
            },
            1,
            "",
            "",
        );
        let it = item("python3.9", "3.9.1", &["six"]);
        let outcome = run_one(&it, &options(tmp.path()), &runner, &cancel);
        assert!(matches!(outcome, Outcome::Interrupted), "{:?}", outcome);
        assert_eq!(runner.count(is_install), 0);
        assert!(!tmp.path().join("python3.9/.profile").exists());
    }

    #[test]
    fn test_interrupt_during_run_stops_at_the_next_phase() {
        let tmp = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        // Provisioning succeeds, but the interrupt arrives while it runs.
        let runner = ScriptedRunner::new().on(
            move |a| {
                if is_virtualenv(a) {
                    token.cancel();
                }
                false
            },
            0,
            "",
            "",
        );
        let mut opts = options(tmp.path());
        opts.max_processes = Some(1);
        let report = run_all(
            vec![item("python3.9", "3.9.1", &["six"]), item("python3.10", "3.10.2", &["six"])],
            &["jython2".to_string()],
            &opts,
            &runner,
            &cancel,
        );

        assert_eq!(report.parallelism, 1);
        assert_eq!(report.outcomes.len(), 3);
        assert!(matches!(report.outcomes["jython2"], Outcome::Skipped(_)));
        assert!(matches!(report.outcomes["python3.9"], Outcome::Interrupted));
        assert!(matches!(report.outcomes["python3.10"], Outcome::Interrupted));
        // Only the first item ever started; it finished provisioning and went no further.
        assert_eq!(runner.count(is_virtualenv), 1);
        assert_eq!(runner.count(is_install), 0);
        assert_eq!(runner.count(is_test), 0);
        assert_eq!(report.exit_code(), 1);
        assert!(report
            .summary_lines()
            .contains(&"python3.10: interrupted".to_string()));
    }
}
