// src/cli/mod.rs
// CLI module for Bellwether commands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod baseline;
pub mod check;
pub mod discover;
pub mod golden;
pub mod validate;

pub use check::run_check_command;
pub use discover::run_discover;
pub use validate::run_validate;

const DEFAULT_CONFIG: &str = "bellwether.yaml";

#[derive(Parser)]
#[command(name = "bellwether")]
#[command(about = "Conformance testing and drift detection for MCP servers")]
#[command(version)]
pub struct Cli {
    /// Config file (YAML or JSON)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the deterministic conformance check
    Check {
        /// Write the resulting baseline to the configured path
        #[arg(long)]
        save: bool,

        /// Map drift severity to the exit code (2 = warning, 3 = breaking)
        #[arg(long)]
        fail_on_drift: bool,
    },

    /// Manage baseline documents
    Baseline {
        #[command(subcommand)]
        action: BaselineAction,
    },

    /// Manage golden tool-output snapshots
    Golden {
        #[command(subcommand)]
        action: GoldenAction,
    },

    /// Perform only the handshake and print the server's capabilities
    Discover {
        /// Also exercise prompts/get and resources/read once
        #[arg(long)]
        deep: bool,
    },

    /// Sanity-check the configuration without any network activity
    ValidateConfig,
}

#[derive(Subcommand)]
pub enum BaselineAction {
    /// Run a check and save its baseline
    Save {
        /// Output path (defaults to the configured baseline path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a check and diff it against the stored baseline
    Compare {
        /// Baseline to compare against (defaults to the configured path)
        #[arg(short, long)]
        baseline: Option<PathBuf>,

        /// Map drift severity to the exit code
        #[arg(long)]
        fail_on_drift: bool,
    },

    /// Print a stored baseline
    Show {
        /// Baseline file
        path: PathBuf,
    },

    /// Diff two stored baseline files
    Diff {
        /// The older baseline
        old: PathBuf,

        /// The newer baseline
        new: PathBuf,

        /// Map drift severity to the exit code
        #[arg(long)]
        fail_on_drift: bool,

        /// Compare even if one baseline came from a cancelled run
        #[arg(long)]
        allow_cancelled: bool,
    },
}

#[derive(Subcommand)]
pub enum GoldenAction {
    /// Run a check and pin the stable tool outputs
    Save,

    /// Run a check and report divergence from the pinned outputs
    Compare {
        /// Exit 2 on any mismatch
        #[arg(long)]
        fail_on_drift: bool,
    },

    /// List tools with pinned outputs
    List,

    /// Delete one tool's pinned outputs
    Delete {
        /// Tool name
        tool: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check() {
        let cli = Cli::try_parse_from(["bellwether", "check", "--save"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Check {
                save: true,
                fail_on_drift: false
            }
        ));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG));
    }

    #[test]
    fn test_parse_baseline_diff() {
        let cli = Cli::try_parse_from([
            "bellwether",
            "baseline",
            "diff",
            "a.json",
            "b.json",
            "--fail-on-drift",
        ])
        .unwrap();
        match cli.command {
            Commands::Baseline {
                action:
                    BaselineAction::Diff {
                        old,
                        new,
                        fail_on_drift,
                        allow_cancelled,
                    },
            } => {
                assert_eq!(old, PathBuf::from("a.json"));
                assert_eq!(new, PathBuf::from("b.json"));
                assert!(fail_on_drift);
                assert!(!allow_cancelled);
            }
            _ => panic!("wrong parse"),
        }
    }

    #[test]
    fn test_parse_golden_delete() {
        let cli =
            Cli::try_parse_from(["bellwether", "golden", "delete", "list_users"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Golden {
                action: GoldenAction::Delete { .. }
            }
        ));
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["bellwether", "--config", "custom.yaml", "discover"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.yaml"));
    }
}
