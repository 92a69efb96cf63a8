//! `spiny pythons`: list declared and discovered interpreters.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use spiny_core::config::SpinyConfig;
use spiny_core::probe_cache::ProbeCache;
use spiny_env::process::SystemRunner;
use spiny_env::resolver::resolve;

use super::{resolve_request, save_cache};

#[derive(Debug, Serialize)]
struct PythonEntry<'a> {
    family: &'a str,
    version: &'a str,
    executable: &'a Path,
    aliases: &'a [String],
}

pub fn cmd_pythons(config: &SpinyConfig, json: bool) -> Result<()> {
    let mut cache = ProbeCache::load(&config.cache_file);
    // Nothing requested: listing needs no isolation checks.
    let resolution = resolve(
        &resolve_request(config, Vec::new(), None),
        &mut cache,
        &SystemRunner,
    );
    save_cache(&mut cache, config);
    let resolution = resolution?;

    let entries: Vec<PythonEntry<'_>> = resolution
        .registry
        .runtimes()
        .into_iter()
        .map(|info| PythonEntry {
            family: &info.family,
            version: info.version.as_str(),
            executable: &info.executable_path,
            aliases: &info.aliases,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No Python interpreters found.");
        return Ok(());
    }
    for e in &entries {
        println!(
            "{:<8} {:<10} {}  ({})",
            e.family,
            e.version,
            e.executable.display(),
            e.aliases.join(", ")
        );
    }
    Ok(())
}
