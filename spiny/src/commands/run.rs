//! `spiny run`: resolve, provision and test every requested environment.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use spiny_core::config::SpinyConfig;
use spiny_core::probe_cache::ProbeCache;
use spiny_env::engine::{run_all, CancelToken, EngineOptions, WorkItem};
use spiny_env::metadata::{dependencies_for, Dependencies, DependencySources, MetadataExtractor};
use spiny_env::process::{ProcessRunner, SystemRunner};
use spiny_env::resolver::resolve;

use super::{host_python, metadata_extractor, requested_names, resolve_request, save_cache};

pub fn cmd_run(config: &SpinyConfig) -> Result<i32> {
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
    let host = host_python(config);
    let extractor = metadata_extractor(config, host.as_ref(), &runner);
    let extractor = extractor.as_ref().map(|e| e as &dyn MetadataExtractor);

    let requested = requested_names(config, extractor)?;
    if requested.is_empty() {
        bail!(
            "No environments to test: set `environments` in the [spiny] section \
             or add Python version classifiers to setup.py"
        );
    }
    tracing::info!("Environments: {}", requested.join(" "));

    let mut cache = ProbeCache::load(&config.cache_file);
    let resolution = resolve(
        &resolve_request(config, requested.clone(), host.clone()),
        &mut cache,
        runner.as_ref(),
    );
    save_cache(&mut cache, config);
    let resolution = resolution?;

    let sources = DependencySources {
        use_setup_py: config.use_setup_py,
        use_requirements_txt: config.use_requirements_txt,
    };
    let mut by_version: HashMap<String, Dependencies> = HashMap::new();
    let mut items = Vec::new();
    for name in &requested {
        let Some(runtime) = resolution.registry.get(name) else {
            continue;
        };
        let key = runtime.version.as_str().to_string();
        let dependencies = match by_version.get(&key) {
            Some(d) => d.clone(),
            None => {
                let d = dependencies_for(&config.project_dir, sources, extractor, &runtime.version)
                    .with_context(|| format!("Could not determine dependencies for {}", name))?;
                by_version.insert(key, d.clone());
                d
            }
        };
        items.push(WorkItem {
            name: name.clone(),
            runtime: runtime.clone(),
            dependencies,
        });
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupted, waiting for running commands to finish...");
        handler_token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let options = EngineOptions {
        venv_dir: config.venv_dir.clone(),
        project_dir: config.project_dir.clone(),
        changedir: config.changedir.clone(),
        test_commands: config.test_commands.clone(),
        setup_commands: config.setup_commands.clone(),
        max_processes: config.max_processes,
        index_url: config.index_url.clone(),
        host_python: host,
    };
    let report = run_all(items, &resolution.missing, &options, runner.as_ref(), &cancel);

    println!();
    for line in report.summary_lines() {
        println!("{}", line);
    }
    Ok(report.exit_code())
}
