//! Litmus CLI - Follow and steer experiments on the experimentation platform
//!
//! Usage:
//!   litmus ls                          List experiments
//!   litmus show <ID>                   Experiment and its current report
//!   litmus watch <ID>                  Live report view (TUI)
//!   litmus terminate <ID>              Terminate a running experiment
//!   litmus guardrail <ID> <NAME> ...   Record a guardrail observation
//!   litmus export <ID> --format csv    Export the current report
//!   litmus config                      Show or set the platform URLs

mod commands;
mod config;
mod format;
mod tui;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::experiments::{CreateOptions, Lifecycle};
use litmus_common::{ExperimentPatch, ExperimentStatus, GuardrailDirection};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "litmus")]
#[command(author = "Litmus Team")]
#[command(version)]
#[command(about = "Follow and steer experiments on the experimentation platform", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Platform URL (overrides LITMUS_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Live channel URL (derived from the API URL when unset)
    #[arg(long, global = true)]
    ws_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List experiments
    Ls,

    /// Running experiments with condensed performance
    Running,

    /// Experiment counts by status
    Summary,

    /// Show an experiment and its current report
    Show {
        /// Experiment ID
        id: String,
    },

    /// Create an A/B experiment
    Create {
        /// Experiment name (prompted when omitted)
        name: Option<String>,

        #[arg(long)]
        hypothesis: Option<String>,

        #[arg(long)]
        owner_team: Option<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Minimum detectable effect
        #[arg(long, default_value_t = 0.05)]
        mde: f64,

        #[arg(long, default_value_t = 0.1)]
        baseline_rate: f64,

        /// Variant as NAME=WEIGHT (repeatable; default control/treatment 50/50)
        #[arg(long = "variant")]
        variants: Vec<String>,
    },

    /// Update experiment fields
    Edit {
        /// Experiment ID
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        owner_team: Option<String>,

        /// Replace the tags (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        ramp_pct: Option<u8>,
    },

    /// Start (or resume) an experiment
    Launch {
        /// Experiment ID
        id: String,

        /// Percentage of traffic to enroll
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        ramp_pct: Option<u8>,
    },

    /// Pause a running experiment
    Pause {
        /// Experiment ID
        id: String,
    },

    /// Stop an experiment
    Stop {
        /// Experiment ID
        id: String,
    },

    /// Terminate a running experiment
    Terminate {
        /// Experiment ID
        id: String,

        /// Reason recorded with the termination
        #[arg(short, long)]
        reason: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Record a guardrail observation
    Guardrail {
        /// Experiment ID
        id: String,

        /// Metric name (e.g. p95_latency_ms)
        name: String,

        /// Observed value
        #[arg(allow_negative_numbers = true)]
        value: f64,

        /// Threshold the value is checked against
        #[arg(allow_negative_numbers = true)]
        threshold: f64,

        /// `max` breaches above the threshold, `min` below it
        #[arg(long, default_value = "max")]
        direction: GuardrailDirection,
    },

    /// Live report view
    Watch {
        /// Experiment ID
        id: String,

        /// Print changes as lines instead of the full-screen view
        #[arg(long)]
        plain: bool,
    },

    /// Report snapshot history
    Snapshots {
        /// Experiment ID
        id: String,
    },

    /// Exposure series and lift estimates
    Results {
        /// Experiment ID
        id: String,

        /// Bucket size for the exposure series
        #[arg(long, default_value = "hour", value_parser = ["minute", "hour"])]
        interval: String,
    },

    /// Export the current report
    Export {
        /// Experiment ID
        id: String,

        #[arg(long, default_value = "json", value_parser = ["json", "csv"])]
        format: String,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Status decision history
    History {
        /// Experiment ID
        id: String,
    },

    /// Manually set an experiment's status
    Override {
        /// Experiment ID
        id: String,

        /// New status
        status: ExperimentStatus,

        #[arg(short, long)]
        reason: Option<String>,

        /// Who is making the decision
        #[arg(long, env = "USER", default_value = "cli")]
        actor: String,
    },

    /// Show or set the platform URLs
    Config {
        /// Save a platform URL
        #[arg(long)]
        set_api_url: Option<String>,

        /// Save a live channel URL
        #[arg(long)]
        set_ws_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Ensure config directories exist
    config::ensure_dirs()?;

    // Initialize logging
    let full_screen = matches!(cli.command, Commands::Watch { plain: false, .. });
    init_logging(cli.verbose, full_screen)?;

    let client_config = config::resolve(&config::Overrides {
        api_url: cli.api_url.clone(),
        ws_url: cli.ws_url.clone(),
    })?;

    // Handle commands
    match cli.command {
        Commands::Ls => {
            commands::experiments::list(&client_config).await?;
        }

        Commands::Running => {
            commands::experiments::running(&client_config).await?;
        }

        Commands::Summary => {
            commands::experiments::summary(&client_config).await?;
        }

        Commands::Show { id } => {
            commands::experiments::show(&client_config, &id).await?;
        }

        Commands::Create {
            name,
            hypothesis,
            owner_team,
            tags,
            mde,
            baseline_rate,
            variants,
        } => {
            let opts = CreateOptions {
                name,
                hypothesis,
                owner_team,
                tags,
                mde,
                baseline_rate,
                variants,
            };
            commands::experiments::create(&client_config, opts).await?;
        }

        Commands::Edit {
            id,
            name,
            description,
            owner_team,
            tags,
            ramp_pct,
        } => {
            let patch = ExperimentPatch {
                name,
                description,
                owner_team,
                tags: (!tags.is_empty()).then_some(tags),
                ramp_pct,
                variants: None,
            };
            commands::experiments::edit(&client_config, &id, patch).await?;
        }

        Commands::Launch { id, ramp_pct } => {
            commands::experiments::lifecycle(&client_config, &id, Lifecycle::Launch { ramp_pct }).await?;
        }

        Commands::Pause { id } => {
            commands::experiments::lifecycle(&client_config, &id, Lifecycle::Pause).await?;
        }

        Commands::Stop { id } => {
            commands::experiments::lifecycle(&client_config, &id, Lifecycle::Stop).await?;
        }

        Commands::Terminate { id, reason, yes } => {
            commands::live::terminate(&client_config, &id, reason, yes).await?;
        }

        Commands::Guardrail {
            id,
            name,
            value,
            threshold,
            direction,
        } => {
            commands::live::guardrail(&client_config, &id, name, value, threshold, direction).await?;
        }

        Commands::Watch { id, plain } => {
            commands::live::watch(&client_config, &id, plain).await?;
        }

        Commands::Snapshots { id } => {
            commands::experiments::snapshots(&client_config, &id).await?;
        }

        Commands::Results { id, interval } => {
            commands::experiments::results(&client_config, &id, &interval).await?;
        }

        Commands::Export { id, format, output } => {
            commands::experiments::export(&client_config, &id, &format, output.as_deref()).await?;
        }

        Commands::History { id } => {
            commands::experiments::history(&client_config, &id).await?;
        }

        Commands::Override {
            id,
            status,
            reason,
            actor,
        } => {
            commands::experiments::override_decision(&client_config, &id, status, reason, actor).await?;
        }

        Commands::Config {
            set_api_url,
            set_ws_url,
        } => {
            commands::settings::run(&client_config, set_api_url, set_ws_url)?;
        }
    }

    Ok(())
}

/// Log to stderr, or to a file while the full-screen view owns the terminal
fn init_logging(verbose: bool, full_screen: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(verbose).into());

    if full_screen {
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config::logs_dir().join("litmus.log"))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(log_file))
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().without_time())
            .init();
    }
    Ok(())
}

/// Filter used when `RUST_LOG` is unset
fn default_filter(verbose: bool) -> String {
    if verbose {
        "debug,litmus_cli=debug,litmus_client=debug".to_string()
    } else {
        "warn,litmus_cli=info,litmus_client=info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_verbose_filter_reaches_litmus_crates() {
        let verbose = default_filter(true);
        assert!(verbose.contains("litmus_client=debug"));
        assert!(verbose.contains("litmus_cli=debug"));
        assert!(!default_filter(false).contains("debug"));
        assert!(tracing_subscriber::EnvFilter::try_new(verbose).is_ok());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_export_format_is_restricted() {
        let cli = Cli::try_parse_from(["litmus", "export", "exp-1", "--format", "csv"]).unwrap();
        match cli.command {
            Commands::Export { id, format, output } => {
                assert_eq!(id, "exp-1");
                assert_eq!(format, "csv");
                assert!(output.is_none());
            }
            _ => panic!("expected export"),
        }
        assert!(Cli::try_parse_from(["litmus", "export", "exp-1", "--format", "xml"]).is_err());
    }
}
