//! Deskpilot backend entry point.
//!
//! Binary name: `dpilot`
//!
//! Parses CLI arguments, initializes the database and services, then starts
//! the HTTP/WebSocket server with graceful shutdown.

mod http;
mod state;

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};

use state::AppState;

#[derive(Parser)]
#[command(name = "dpilot", about = "Local control plane for desktop automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the backend server.
    Serve {
        /// Bind host; overrides config.toml.
        #[arg(long)]
        host: Option<String>,
        /// Bind port; overrides config.toml.
        #[arg(long)]
        port: Option<u16>,
        /// Data directory (config, database). Defaults to ~/.deskpilot.
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Export spans via OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "dpilot", &mut std::io::stdout());
        return Ok(());
    }

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "debug,sqlx=info",
        _ => "trace",
    };

    match cli.command {
        Commands::Serve {
            host,
            port,
            data_dir,
            otel,
        } => {
            deskpilot_observe::tracing_setup::init_tracing(default_filter, otel)
                .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

            let data_dir = data_dir.unwrap_or_else(deskpilot_infra::config::resolve_data_dir);
            let state = AppState::init(data_dir).await?;

            let host = host.unwrap_or_else(|| state.config.host.clone());
            let port = port.unwrap_or(state.config.port);
            let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
            tracing::info!(%host, port, "deskpilot backend listening");

            let router = http::router::build_router(state.clone());
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            tracing::info!("shutting down run control plane");
            state.shutdown().await;
            deskpilot_observe::tracing_setup::shutdown_tracing();
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
