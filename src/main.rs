mod api;
mod bridge;
mod cache;
mod commands;
mod config;
mod error;
mod gateway;
mod logging;
#[cfg(test)]
mod test_support;
mod usage;

use anyhow::{Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};

use crate::api::{DashService, router as api_router};
use crate::config::{DashConfig, load_config};
use crate::gateway::event::DEFAULT_SESSION_KEY;
use crate::logging::{LoggingOptions, init_tracing};

#[derive(Parser, Debug)]
#[command(name = "clawdash")]
#[command(about = "Dashboard backend for an OpenClaw gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP/WebSocket server (default)
    Serve {
        /// Listen host; defaults to the config value
        #[arg(long)]
        host: Option<String>,
        /// Listen port; defaults to the config value (8765)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Read the usage log
    Usage {
        #[command(subcommand)]
        cmd: UsageCommand,
    },
    /// Send one message through the gateway and print the reply
    Chat {
        message: String,
        #[arg(long, default_value = DEFAULT_SESSION_KEY)]
        session: String,
    },
    /// Manage ~/.clawdash/config.toml
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum UsageCommand {
    /// Per-model token totals
    Summary {
        #[arg(long, default_value_t = 7)]
        days: u32,
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// Hourly series of tokens, cost or requests
    Timeseries {
        #[arg(long, default_value = "tokens")]
        metric: String,
        #[arg(long, default_value_t = 24)]
        hours: u32,
        #[arg(long)]
        json: bool,
    },
    /// Seven-day per-model totals and daily trend
    Breakdown {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Write a commented config.toml template
    Init {
        /// Overwrite an existing file (a .bak copy is kept)
        #[arg(long)]
        force: bool,
    },
    /// Print the effective config with the token masked
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config().await?;
    let _log_guard = init_tracing(&LoggingOptions::from_env(cfg.log_level.clone()));

    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Usage { cmd } => {
            commands::usage::handle_usage_cmd(&cfg, cmd).await?;
        }
        Command::Chat { message, session } => {
            commands::chat::handle_chat_cmd(&cfg, message, session).await?;
        }
        Command::Config { cmd } => {
            commands::config::handle_config_cmd(cmd).await?;
        }
        Command::Serve { host, port } => {
            let mut cfg = cfg;
            if let Some(host) = host {
                cfg.host = host;
            }
            if let Some(port) = port {
                cfg.port = port;
            }
            run_server(cfg).await?;
        }
    }

    Ok(())
}

async fn run_server(cfg: DashConfig) -> Result<()> {
    let svc = DashService::new(&cfg)?;
    let (token, source) = cfg.resolve_gateway_token();
    if token.is_none() {
        tracing::warn!("no gateway token configured; the gateway may reject the handshake");
    } else {
        tracing::info!("gateway token from {}", source);
    }
    tracing::info!(
        gateway = %cfg.gateway.ws_url,
        trace_file = %svc.usage.trace_file().display(),
        "usage and chat services ready"
    );

    let app: Router = api_router(svc);
    let addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!("clawdash listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("clawdash stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}
