use std::path::PathBuf;

use agentic_tester::config::{LoggingConfig, TesterConfig};
use agentic_tester::runner::{ExecutionStatus, TestExecutor, TestRunner};
use agentic_tester::storage::{
    FileHistoryLedger, FileStateStore, HistoryLedger, RunOutcome, StateStore,
};
use agentic_tester::tenant::{TenantId, TenantLayout, DEFAULT_TENANT};
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agentic-tester",
    about = "Agent-driven API testing: scan, generate, execute, score and heal",
    version,
    long_about = None
)]
struct Cli {
    /// TOML config file (default: $AGENTIC_TESTER_CONFIG, then ./agentic-tester.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (HTTP API + pipeline orchestrator)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Execute one test file and print its scored result
    Run {
        /// Test file handed to the runner
        file: PathBuf,

        /// Timeout in seconds, overrides the config file
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show a tenant's run history, newest first
    History {
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,

        #[arg(long)]
        json: bool,
    },

    /// Show a tenant's dashboard statistics
    Stats {
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,

        #[arg(long)]
        json: bool,
    },

    /// Show a tenant's current pipeline state
    State {
        #[arg(long, default_value = DEFAULT_TENANT)]
        tenant: String,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TesterConfig::load(path)?,
        None => TesterConfig::load_or_default(),
    };
    init_tracing(&config.logging);

    let layout = TenantLayout::new(config.storage.root.clone());

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting agentic-tester daemon");
            agentic_tester::serve(config).await?;
        }
        Commands::Run {
            file,
            timeout,
            json,
        } => {
            if let Some(secs) = timeout {
                config.runner.timeout_secs = secs;
            }
            let executor = TestExecutor::new(&config.runner);
            let result = executor.run(&file).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let status = match result.status {
                    ExecutionStatus::Success => "SUCCESS",
                    ExecutionStatus::Failure => "FAILURE",
                    ExecutionStatus::Error => "ERROR",
                };
                println!("\n=== Test Run: {} ===", result.test_file);
                println!("Status:  {}", status);
                println!(
                    "Summary: {} passed, {} failed, {} error ({} total)",
                    result.summary.passed,
                    result.summary.failed,
                    result.summary.error,
                    result.summary.total
                );
                match result.reward {
                    Some(reward) => println!("Reward:  {:.1}", reward),
                    None => println!("Reward:  n/a"),
                }
                println!("\n{}", result.logs.trim_end());
            }
        }
        Commands::History { tenant, json } => {
            let tenant = TenantId::parse(&tenant)?;
            let entries = FileHistoryLedger::new(layout).list(&tenant).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No runs recorded for tenant '{}'.", tenant);
            } else {
                println!(
                    "{:<26} | {:<20} | {:<6} | {:>7} | Summary",
                    "Timestamp", "Project", "Status", "Reward"
                );
                println!("{:-<26}-|-{:-<20}-|-{:-<6}-|-{:-<7}-|-{:-<20}", "", "", "", "", "");
                for e in entries {
                    let status = match e.status {
                        RunOutcome::Passed => "PASS",
                        RunOutcome::Failed => "FAIL",
                    };
                    let reward = e
                        .reward
                        .map(|r| format!("{:.1}", r))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<26} | {:<20} | {:<6} | {:>7} | {}/{} passed",
                        e.timestamp,
                        e.project_name,
                        status,
                        reward,
                        e.summary.passed,
                        e.summary.total
                    );
                }
            }
        }
        Commands::Stats { tenant, json } => {
            let tenant = TenantId::parse(&tenant)?;
            let stats = FileHistoryLedger::new(layout).stats(&tenant).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("\n=== Dashboard: {} ===", tenant);
                println!("Total runs:      {}", stats.total_runs);
                println!("Passed runs:     {}", stats.passed_runs);
                println!("Average reward:  {:.2}", stats.avg_reward);
                println!("Active projects: {}", stats.active_projects);
            }
        }
        Commands::State { tenant } => {
            let tenant = TenantId::parse(&tenant)?;
            let state = FileStateStore::new(layout).load(&tenant).await;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}
