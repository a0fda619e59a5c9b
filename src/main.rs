// src/main.rs
// Bellwether - conformance testing and drift detection for MCP servers

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use bellwether::BellwetherError;
use bellwether::cli::{BaselineAction, Cli, Commands, GoldenAction};

#[tokio::main]
async fn main() {
    // Load .env from ~/.bellwether/.env only (never from CWD -- a cloned repo
    // must not be able to override credentials)
    if let Some(home) = dirs::home_dir()
        && let Err(e) = dotenvy::from_path(home.join(".bellwether/.env"))
    {
        tracing::debug!("no global .env loaded: {}", e);
    }

    let cli = Cli::parse();

    let log_level = match std::env::var("BELLWETHER_LOG").ok().as_deref() {
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") | None => Level::WARN,
        Some("error") => Level::ERROR,
        Some(other) => {
            eprintln!("[bellwether] unknown BELLWETHER_LOG={other:?}, using warn");
            Level::WARN
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let result = match cli.command {
        Commands::Check {
            save,
            fail_on_drift,
        } => bellwether::cli::run_check_command(&cli.config, save, fail_on_drift).await,
        Commands::Baseline { action } => match action {
            BaselineAction::Save { output } => {
                bellwether::cli::baseline::run_save(&cli.config, output.as_deref()).await
            }
            BaselineAction::Compare {
                baseline,
                fail_on_drift,
            } => {
                bellwether::cli::baseline::run_compare(
                    &cli.config,
                    baseline.as_deref(),
                    fail_on_drift,
                )
                .await
            }
            BaselineAction::Show { path } => bellwether::cli::baseline::run_show(&path),
            BaselineAction::Diff {
                old,
                new,
                fail_on_drift,
                allow_cancelled,
            } => bellwether::cli::baseline::run_diff(
                Some(&cli.config),
                &old,
                &new,
                fail_on_drift,
                allow_cancelled,
            ),
        },
        Commands::Golden { action } => match action {
            GoldenAction::Save => bellwether::cli::golden::run_save(&cli.config).await,
            GoldenAction::Compare { fail_on_drift } => {
                bellwether::cli::golden::run_compare(&cli.config, fail_on_drift).await
            }
            GoldenAction::List => bellwether::cli::golden::run_list(&cli.config),
            GoldenAction::Delete { tool } => {
                bellwether::cli::golden::run_delete(&cli.config, &tool)
            }
        },
        Commands::Discover { deep } => bellwether::cli::run_discover(&cli.config, deep).await,
        Commands::ValidateConfig => bellwether::cli::run_validate(&cli.config),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            if let Some(hint) = remediation_hint(&e) {
                eprintln!("hint: {}", hint);
            }
            std::process::exit(1);
        }
    }
}

/// Short remediation hint per error kind, for humans in a hurry.
fn remediation_hint(error: &BellwetherError) -> Option<&'static str> {
    match error {
        BellwetherError::SpawnFailed(_) => {
            Some("check that the server command exists and is executable")
        }
        BellwetherError::ConnectRefused(_) => {
            Some("check the server URL and that the server is running")
        }
        BellwetherError::AuthFailed(_) => {
            Some("check the credential named by server.auth.token_env")
        }
        BellwetherError::ConfigNotFound(_) => {
            Some("pass --config or create bellwether.yaml in this directory")
        }
        BellwetherError::UnsupportedVersion(_) => {
            Some("the server speaks an unknown protocol revision; update bellwether")
        }
        BellwetherError::VersionMismatch { .. } => {
            Some("baselines come from different format versions; re-save the baseline")
        }
        BellwetherError::IntegrityFailed { .. } => {
            Some("the baseline file was modified after saving; re-save it")
        }
        BellwetherError::CancelledBaseline => {
            Some("re-run the check to completion, or pass --allow-cancelled")
        }
        _ => None,
    }
}
