use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dhcpdora::{Config, HardwareAddress, LeaseServer, ProbeClient, Result, TracingSink};

#[derive(Parser)]
#[command(name = "dhcpdora")]
#[command(author, version, about = "An address leasing server speaking the DORA handshake", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve leases until interrupted.
    Run,
    /// Print the effective configuration.
    ShowConfig,
    /// Walk one client through a full exchange against a running server.
    Probe {
        #[arg(short, long, default_value = "127.0.0.1:67")]
        server: SocketAddr,

        #[arg(short, long, default_value = "02:00:00:00:00:01")]
        mac: HardwareAddress,

        #[arg(short, long, default_value_t = 5)]
        timeout_secs: u64,

        /// Renew the lease this many times, each at T1 from the latest ACK.
        #[arg(short, long, default_value_t = 0)]
        renewals: u32,

        /// Keep the lease instead of releasing it afterwards.
        #[arg(short, long)]
        keep: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = Config::load_or_create(&cli.config).await?;
            info!("Starting lease server with config: {:?}", cli.config);
            let server = LeaseServer::new(config, Arc::new(TracingSink)).await?;

            tokio::select! {
                result = server.run() => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal, stopping server...");
                    Ok(())
                }
            }
        }
        Commands::ShowConfig => {
            let config = Config::load_or_create(&cli.config).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Probe {
            server,
            mac,
            timeout_secs,
            renewals,
            keep,
        } => {
            let client = ProbeClient::bind(server, Duration::from_secs(timeout_secs))?;
            let offered = client.run_exchange(mac, renewals, keep).await?;
            println!("{}", serde_json::to_string_pretty(&offered)?);
            Ok(())
        }
    }
}
