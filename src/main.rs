use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fabcell::config::OperationLogBackend;
use fabcell::{
    build_operation_log, init_telemetry, shutdown_telemetry, BroadcastPublisher,
    ControlSurface, FabCellConfig, Orchestrator, OrchestratorOptions, ShutdownCoordinator,
    StartRunResponse,
};

#[derive(Parser)]
#[command(name = "fabcell")]
#[command(about = "Hybrid manufacturing cell controller")]
#[command(long_about = "fabcell drives a manufacturing job through a fixed sequence of simulated \
                       stages (transport, position, print, transfer, machine), records each \
                       completed stage and broadcasts it to observers. Start with 'fabcell run'.")]
struct Cli {
    /// Configuration file to use instead of fabcell.toml / environment lookup
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start one run and stream stage events until it finishes (Ctrl-C cancels)
    Run,
    /// Show the most recent operation record
    Status,
    /// Show recent operation records, oldest first
    History {
        /// Number of records to show
        #[arg(long, short = 'n', default_value = "10")]
        limit: usize,
    },
    /// List the configured stages in execution order
    Stages,
    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_telemetry(&config.observability)?;

    let result = match cli.command {
        None | Some(Commands::Run) => {
            tokio::runtime::Runtime::new()?.block_on(async { run_command(&config).await })
        }
        Some(Commands::Status) => {
            tokio::runtime::Runtime::new()?.block_on(async { status_command(&config).await })
        }
        Some(Commands::History { limit }) => tokio::runtime::Runtime::new()?
            .block_on(async { history_command(&config, limit).await }),
        Some(Commands::Stages) => stages_command(&config),
        Some(Commands::Config) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    };

    shutdown_telemetry();
    result
}

fn load_config(path: Option<&PathBuf>) -> Result<FabCellConfig> {
    match path {
        Some(path) => FabCellConfig::from_file(path),
        None => {
            fabcell::init_config()?;
            Ok(fabcell::config()?.clone())
        }
    }
}

async fn run_command(config: &FabCellConfig) -> Result<()> {
    let stages = config.stage_table()?;
    let log = build_operation_log(&config.operation_log).await?;

    let publisher = BroadcastPublisher::new(config.events.channel_capacity);
    publisher.connect().await;
    let mut subscription = publisher.subscribe(&config.orchestrator.topic).await?;

    let grace_period = stages
        .iter()
        .map(|s| s.simulated_duration)
        .max()
        .unwrap_or_default()
        + Duration::from_secs(5);

    let orchestrator = Orchestrator::new(
        stages,
        log,
        Arc::new(publisher.clone()),
        OrchestratorOptions::from(&config.orchestrator),
    );
    let control = ControlSurface::new(orchestrator.clone());
    let shutdown = ShutdownCoordinator::new(orchestrator.clone(), publisher.clone())
        .with_grace_period(grace_period);

    let printer = tokio::spawn(async move {
        while let Some(payload) = subscription.next().await {
            println!("  → {payload}");
        }
    });

    match control.start_run().await {
        StartRunResponse::Accepted { run_id } => {
            println!("Run {run_id} started ({} stages)", orchestrator.stages().len());
        }
        StartRunResponse::Rejected { reason } => bail!("Run rejected: {reason}"),
    }

    tokio::select! {
        _ = orchestrator.wait_until_idle() => {}
        signal = ShutdownCoordinator::wait_for_signal() => {
            signal?;
            println!("Interrupted, stopping after the current stage...");
            shutdown.cancel_active_run().await;
        }
    }

    let status = shutdown.shutdown().await?;
    printer.await?;

    println!("Run finished: {}", status.state);
    if config.observability.metrics_enabled {
        orchestrator.metrics().log_stats();
    }
    Ok(())
}

async fn status_command(config: &FabCellConfig) -> Result<()> {
    warn_if_volatile(config);
    let log = build_operation_log(&config.operation_log).await?;

    match log.latest().await? {
        Some(record) => println!(
            "[{}] {} {}",
            record.id,
            record.timestamp.to_rfc3339(),
            record.description
        ),
        None => println!("No operations recorded yet"),
    }
    Ok(())
}

async fn history_command(config: &FabCellConfig, limit: usize) -> Result<()> {
    warn_if_volatile(config);
    let log = build_operation_log(&config.operation_log).await?;

    let records = log.recent(limit).await?;
    if records.is_empty() {
        println!("No operations recorded yet");
    }
    for record in records {
        println!(
            "[{}] {} {}",
            record.id,
            record.timestamp.to_rfc3339(),
            record.description
        );
    }
    Ok(())
}

fn stages_command(config: &FabCellConfig) -> Result<()> {
    let stages = config.stage_table()?;
    for (index, stage) in stages.iter().enumerate() {
        println!(
            "{:>2}. {:<12} {:>6} ms",
            index + 1,
            stage.name,
            stage.simulated_duration.as_millis()
        );
    }
    println!("Total: {} ms", stages.total_duration().as_millis());
    Ok(())
}

fn warn_if_volatile(config: &FabCellConfig) {
    if config.operation_log.backend == OperationLogBackend::Memory {
        eprintln!("Operation log backend is 'memory'; records from other processes are not visible");
    }
}
