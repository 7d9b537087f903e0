//! wg-fleet main entry point
//!
//! This binary starts one of the three fleet services. It handles CLI
//! parsing, logging setup and shutdown signals.

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wg_fleet::config::{ControllerConfig, DaemonConfig, NodeAgentConfig};
use wg_fleet::security::warn_if_unprivileged;
use wg_fleet::{controller, daemon, node, APP_NAME, VERSION};

/// WireGuard fleet controller, node agent and host daemon
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (defaults to /etc/wg-fleet/<service>.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller device API
    Controller,

    /// Run the node agent
    Node {
        /// Token the controller must present
        #[arg(long, env = "WG_FLEET_NODE_TOKEN")]
        token: Option<String>,

        /// Relay brought up at start
        #[arg(long, env = "WG_FLEET_DEFAULT_RELAY")]
        default_relay: Option<String>,
    },

    /// Run the host daemon
    Daemon,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Execute command
    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn config_path(cli: &Option<String>, service: &str) -> String {
    cli.clone()
        .unwrap_or_else(|| format!("/etc/wg-fleet/{}.toml", service))
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Controller => {
            let path = config_path(&cli.config, "controller");
            info!("Starting {} v{} controller with config: {}", APP_NAME, VERSION, path);
            let config = ControllerConfig::from_file(&path)?;
            controller::serve(config, shutdown_signal()).await?;
            Ok(())
        }
        Commands::Node {
            token,
            default_relay,
        } => {
            let path = config_path(&cli.config, "node");
            info!("Starting {} v{} node agent with config: {}", APP_NAME, VERSION, path);
            let mut config = NodeAgentConfig::from_file(&path)?;
            if let Some(token) = token {
                config.token = token;
            }
            if let Some(relay) = default_relay {
                config.default_relay = relay;
            }
            warn_if_unprivileged("node agent");
            node::serve(config, shutdown_signal()).await?;
            Ok(())
        }
        Commands::Daemon => {
            let path = config_path(&cli.config, "daemon");
            info!("Starting {} v{} daemon with config: {}", APP_NAME, VERSION, path);
            let config = DaemonConfig::from_file(&path)?;
            warn_if_unprivileged("daemon");
            daemon::serve(config, shutdown_signal()).await?;
            Ok(())
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
