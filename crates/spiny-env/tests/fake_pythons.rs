//! End-to-end runs against shell scripts standing in for interpreters.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use spiny_core::probe_cache::ProbeCache;
use spiny_core::runtime::IsolationMode;
use spiny_env::engine::{run_all, CancelToken, EngineOptions, Outcome, WorkItem};
use spiny_env::metadata::Dependencies;
use spiny_env::process::SystemRunner;
use spiny_env::resolver::{resolve, ResolveRequest};

/// A fake interpreter: answers `-V`, emulates `-m virtualenv` and `-m pip`,
/// and exits with `test_exit` for `run-tests`.
fn fake_python(dir: &Path, name: &str, version: &str, test_exit: i32) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
case "$1" in
  -V) echo "Python {version}" >&2 ;;
  -m)
    if [ "$2" = virtualenv ]; then
      if [ "$3" = --version ]; then echo "virtualenv 20.0"; exit 0; fi
      mkdir -p "$3/bin" && cp "$0" "$3/bin/{name}" && echo created >> "$3/provisioned"
      exit 0
    fi
    if [ "$2" = pip ]; then
      shift 2
      echo "$@" >> "$(dirname "$0")/../installed"
      exit 0
    fi
    exit 1 ;;
  run-tests) exit {test_exit} ;;
esac
exit 0
"#
    );
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    fs::canonicalize(path).unwrap()
}

fn request(bin: &Path, requested: &[&str]) -> ResolveRequest {
    ResolveRequest {
        search_paths: vec![bin.to_path_buf()],
        known_names: vec!["python".to_string()],
        requested: requested.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

fn options(project: &Path, venvs: &Path) -> EngineOptions {
    EngineOptions {
        venv_dir: venvs.to_path_buf(),
        project_dir: project.to_path_buf(),
        test_commands: vec!["{envpython} run-tests".to_string()],
        ..Default::default()
    }
}

fn work_items(
    resolution: &spiny_env::resolver::Resolution,
    names: &[&str],
    deps: &[&str],
) -> Vec<WorkItem> {
    names
        .iter()
        .filter_map(|n| {
            resolution.registry.get(n).map(|rt| WorkItem {
                name: n.to_string(),
                runtime: rt.clone(),
                dependencies: Dependencies {
                    specifiers: deps.iter().map(|s| s.to_string()).collect(),
                    find_links: Vec::new(),
                },
            })
        })
        .collect()
}

#[test]
fn failing_environment_does_not_stop_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    fake_python(&bin, "python3.9", "3.9.1", 0);
    fake_python(&bin, "python3.8", "3.8.10", 1);
    let venvs = tmp.path().join("venvs");

    let names = ["python3.9", "python3.8", "jython2"];
    let mut cache = ProbeCache::new();
    let resolution = resolve(&request(&bin, &names), &mut cache, &SystemRunner).unwrap();
    assert_eq!(resolution.missing, vec!["jython2"]);
    assert_eq!(
        resolution.registry.get("python3.9").unwrap().isolation,
        Some(IsolationMode::Internal)
    );

    let items = work_items(&resolution, &names, &[]);
    let opts = options(tmp.path(), &venvs);
    let report = run_all(items, &resolution.missing, &opts, &SystemRunner, &CancelToken::new());

    assert!(matches!(report.outcomes["python3.9"], Outcome::Succeeded));
    assert!(matches!(report.outcomes["python3.8"], Outcome::Failed(_)));
    assert!(matches!(report.outcomes["jython2"], Outcome::Skipped(_)));
    assert_eq!(report.exit_code(), 1);
    assert!(venvs.join("python3.9/.profile").is_file());
    assert!(venvs.join("python3.9/bin/python3.9").is_file());
}

#[test]
fn unchanged_environment_is_provisioned_once() {
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    fake_python(&bin, "python3.11", "3.11.4", 0);
    let venvs = tmp.path().join("venvs");
    let opts = options(tmp.path(), &venvs);

    let mut cache = ProbeCache::new();
    let resolution = resolve(&request(&bin, &["python3.11"]), &mut cache, &SystemRunner).unwrap();
    for _ in 0..2 {
        let items = work_items(&resolution, &["python3.11"], &["six", "attrs"]);
        let report = run_all(items, &[], &opts, &SystemRunner, &CancelToken::new());
        assert!(report.is_success(), "{:?}", report.summary_lines());
    }

    let provisioned = fs::read_to_string(venvs.join("python3.11/provisioned")).unwrap();
    assert_eq!(provisioned.lines().count(), 1);
    let installed = fs::read_to_string(venvs.join("python3.11/installed")).unwrap();
    assert_eq!(installed.trim(), "install six attrs");
    let profile = fs::read_to_string(venvs.join("python3.11/.profile")).unwrap();
    assert!(profile.ends_with("\nattrs\nsix"));
}

#[test]
fn probe_results_survive_a_cache_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let bin = tmp.path().join("bin");
    fs::create_dir_all(&bin).unwrap();
    let exe = fake_python(&bin, "python3.10", "3.10.2", 0);
    let cache_file = tmp.path().join("cache/pythons.json");

    let mut cache = ProbeCache::load(&cache_file);
    resolve(&request(&bin, &["python3.10"]), &mut cache, &SystemRunner).unwrap();
    cache.save(&cache_file).unwrap();

    let reloaded = ProbeCache::load(&cache_file);
    let info = reloaded.get(&exe).unwrap();
    assert_eq!(info.version.as_str(), "3.10.2");
    assert_eq!(info.isolation, Some(IsolationMode::Internal));
}
