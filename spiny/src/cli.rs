use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// spiny - run a project's tests against every Python it supports
#[derive(Parser, Debug)]
#[command(name = "spiny")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: spiny.toml in the project directory)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Project directory
    #[arg(
        short = 'p',
        long = "project-dir",
        value_name = "DIR",
        default_value = ".",
        env = "SPINY_PROJECT_DIR",
        global = true
    )]
    pub project_dir: PathBuf,

    /// More output (repeatable: -v shows subprocess stdout, -vv every command)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Less output (repeatable: -q summary only, -qq errors only)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// Override a config value, e.g. --set spiny.venv-dir=/tmp/venvs
    #[arg(long = "set", value_name = "SECTION.KEY=VALUE", global = true)]
    pub overrides: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Provision environments and run the test commands (default)
    Run,

    /// List the Python interpreters spiny can use
    Pythons {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the environments a run would test
    Envs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::parse_from(["spiny"]);
        assert_eq!(cli.command, None);
        assert_eq!(cli.project_dir, PathBuf::from("."));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "spiny",
            "pythons",
            "--json",
            "-vv",
            "--set",
            "spiny.max-processes=2",
            "--set",
            "spiny.venv-dir=/tmp/v",
        ]);
        assert_eq!(cli.command, Some(Commands::Pythons { json: true }));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.overrides.len(), 2);
    }
}
