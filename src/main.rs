use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;

use stagewise_rs::stagewise::bootstrap::{bootstrap, checkpoint_store};
use stagewise_rs::stagewise::config::{OutputFormat, RunConfig, Settings};
use stagewise_rs::stagewise::server::{self, AppState};
use stagewise_rs::stagewise::workflow::runner::RunResult;
use stagewise_rs::stagewise::workflow::service::{list_runs, run_status};
use stagewise_rs::stagewise::workflow::state::Stage;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML run configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a research run
    Run {
        /// The research query
        #[arg(short, long)]
        query: String,

        /// Maximum research iterations
        #[arg(long)]
        iterations: Option<u32>,

        /// Stages to pause before, comma separated
        #[arg(long, value_delimiter = ',')]
        interrupt_before: Vec<Stage>,

        /// Report format (markdown or plain)
        #[arg(long)]
        format: Option<OutputFormat>,
    },
    /// Continue a run from its last checkpoint
    Resume {
        #[arg(long)]
        run_id: String,

        /// Approve the pending interruption point
        #[arg(long)]
        approve: bool,
    },
    /// Show a run, or every run when no id is given
    Status {
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<RunConfig> {
    let config = match path {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RunConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn print_result(run_id: &str, result: &RunResult) {
    match result {
        RunResult::Completed { state } => {
            println!("Run {} completed\n", run_id);
            println!("{}", state.report().unwrap_or_default());
        }
        RunResult::AwaitingApproval { stage } => {
            println!(
                "Run {} is waiting for approval before '{}'. Resume with:\n  stagewise-rs resume --run-id {} --approve",
                run_id, stage, run_id
            );
        }
        RunResult::Failed { stage, cause } => {
            println!("Run {} failed at '{}': {}", run_id, stage, cause);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::from_env();

    if let Commands::Status { run_id } = &args.command {
        let store = checkpoint_store(&settings);
        match run_id {
            Some(id) => {
                let status = run_status(store.as_ref(), id).await?;
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
            None => {
                for run in list_runs(store.as_ref()).await? {
                    println!(
                        "{}  {:<12} cursor={}  {}",
                        run.run_id,
                        run.stage.to_string(),
                        run.cursor,
                        serde_json::to_string(&run.outcome)?
                    );
                }
            }
        }
        return Ok(());
    }

    let mut config = load_config(args.config.as_ref())?;

    if let Commands::Run {
        iterations,
        interrupt_before,
        format,
        ..
    } = &args.command
    {
        if let Some(limit) = iterations {
            config.iteration_limit = *limit;
        }
        config.interrupt_before.extend(interrupt_before.iter().copied());
        if let Some(format) = format {
            config.output_format = *format;
        }
        config.validate()?;
    }

    let boot = bootstrap(&settings, config).context("failed to initialize")?;
    for status in &boot.components {
        log::debug!("component: {:?}", status);
    }
    let service = boot.service.clone();

    match args.command {
        Commands::Run { query, .. } => {
            let handle = service.start(&query).await?;
            print_result(&handle.run_id, &handle.result);
        }
        Commands::Resume { run_id, approve } => {
            let result = service.resume(&run_id, approve).await?;
            print_result(&run_id, &result);
        }
        Commands::Status { .. } => {}
        Commands::Serve { port } => {
            let state = AppState {
                service,
                components: Arc::new(boot.components),
            };
            server::serve(state, port)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
    }

    Ok(())
}
