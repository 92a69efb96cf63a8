//! `spiny envs`: print the environments a run would test.

use std::sync::Arc;

use anyhow::Result;
use spiny_core::config::SpinyConfig;
use spiny_env::metadata::MetadataExtractor;
use spiny_env::process::{ProcessRunner, SystemRunner};

use super::{host_python, metadata_extractor, requested_names};

pub fn cmd_envs(config: &SpinyConfig) -> Result<()> {
    let extractor = if config.environments.is_some() {
        None
    } else {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
        metadata_extractor(config, host_python(config).as_ref(), &runner)
    };
    let names = requested_names(
        config,
        extractor.as_ref().map(|e| e as &dyn MetadataExtractor),
    )?;
    for name in names {
        println!("{}", name);
    }
    Ok(())
}
