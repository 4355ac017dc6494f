//! electrum-watch CLI - balances and chain height from an Electrum server.
//!
//! This is the main binary entry point. See the `electrum_watch` library
//! for the core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use electrum_watch::{commands, Config, Electrum, StratumClient};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "electrum-watch")]
#[command(version)]
#[command(about = "Watch address balances and chain height on an Electrum server")]
struct Cli {
    /// Server host (overrides config and ELECTRUM_WATCH_HOST)
    #[arg(long, global = true)]
    host: Option<String>,
    /// Server TCP port (overrides config and ELECTRUM_WATCH_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch addresses interactively (+ADDR, -ADDR, new, exit on stdin)
    Watch,
    /// Print the current balance of an address
    Balance {
        /// Address to query
        address: String,
    },
    /// Print the current chain-tip height
    Height,
    /// Print the server's software and protocol version
    Version,
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    // stderr unless ELECTRUM_WATCH_LOG_FILE is set
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Ok(path) = std::env::var("ELECTRUM_WATCH_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

async fn connect(config: &Config) -> Result<Electrum> {
    let client = StratumClient::connect(&config.host, config.port, config.client_config())
        .await
        .with_context(|| format!("Could not reach {}:{}", config.host, config.port))?;
    Ok(Electrum::new(client))
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Watch => {
            let electrum = connect(&config).await?;
            commands::watch::run(electrum).await?;
        }
        Commands::Balance { address } => {
            let electrum = connect(&config).await?;
            commands::balance(&electrum, &address).await?;
            electrum.client().close().await?;
        }
        Commands::Height => {
            let electrum = connect(&config).await?;
            commands::height(&electrum).await?;
            electrum.client().close().await?;
        }
        Commands::Version => {
            let electrum = connect(&config).await?;
            commands::version(&electrum, &config.client_name, &config.protocol_version).await?;
            electrum.client().close().await?;
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
                log::info!("Saved configuration to {}", Config::config_dir()?.display());
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start Tokio runtime")?;
    runtime.block_on(run(cli, config))
}
