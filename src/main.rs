//! statebus - partitioned state machine event service
//!
//! Runs the definition service, event producer and partition consumers, or
//! checks definitions offline.

use clap::{Parser, Subcommand};
use statebus_core::{MachineSpec, TransitionTable};
use statebus_server::{Config, Runtime};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statebus")]
#[command(about = "Partitioned state machine event service")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "STATEBUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service (default)
    Serve,

    /// Check a definition file (YAML or JSON)
    Validate {
        /// Definition file
        file: PathBuf,
    },

    /// Apply a sequence of events to a definition without any I/O
    Simulate {
        /// Definition file
        file: PathBuf,

        /// Comma-separated events
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<String>,

        /// Starting state (defaults to the initial state)
        #[arg(short, long)]
        from: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cli.config.as_deref()).await,
        Commands::Validate { file } => {
            let table = load_table(&file)?;
            println!(
                "{}: ok ({} states, {} transitions, initial state {})",
                file.display(),
                table.states().len(),
                table.len(),
                table.initial()
            );
            Ok(())
        }
        Commands::Simulate { file, events, from } => {
            let table = load_table(&file)?;
            simulate(&table, &events, from)
        }
    }
}

async fn serve(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if let Some(path) = config_path {
        tracing::info!("Loaded config from {}", path.display());
    }

    tracing::info!("Starting statebus");
    tracing::info!("  Topic: {} ({} partitions)", config.bus.topic, config.bus.partitions);
    tracing::info!("  Consumer group: {}", config.bus.group_id);
    tracing::info!("  Storage: {:?}", config.storage.backend);
    tracing::info!("  Cache: {:?}", config.cache.backend);
    if config.metrics.enabled {
        tracing::info!("  Metrics: http://{}/metrics", config.metrics.bind_addr);
    } else {
        tracing::info!("  Metrics: disabled");
    }

    let runtime = Runtime::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping...");

    runtime.shutdown().await;
    tracing::info!("Stopped");
    Ok(())
}

fn load_table(path: &Path) -> Result<TransitionTable, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    // YAML parsing also accepts JSON documents
    let spec: MachineSpec = serde_yaml::from_str(&content)?;
    Ok(spec.compile()?)
}

fn simulate(
    table: &TransitionTable,
    events: &[String],
    from: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut current = match from {
        Some(state) if table.has_state(&state) => state,
        Some(state) => return Err(format!("unknown state {}", state).into()),
        None => table.initial().to_string(),
    };

    println!("{}", current);
    for event in events {
        let step = table.apply(&current, event);
        if step.accepted {
            println!("  --{}--> {}", event, step.to_state);
        } else {
            println!("  --{}--> (not accepted in {})", event, step.from_state);
        }
        current = step.to_state.into_string();
    }
    println!("final: {}", current);
    Ok(())
}
