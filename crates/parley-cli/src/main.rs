mod config;

use clap::{Parser, Subcommand};
use parley_builtins::{register_builtins, ToolRegistry};
use parley_core::{FeedbackCollector, ToolCall};
use parley_gateway::{FeedbackBridge, GatewayServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", about = "Parley - human feedback bridge for AI agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "parley.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the feedback gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Ask for feedback once and print the result
    Ask {
        /// Work summary shown to the user
        #[arg(short, long)]
        summary: String,
        /// Seconds to wait for a reply (defaults to bridge.default_timeout_secs)
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Reuse a session id instead of generating one
        #[arg(long)]
        session: Option<String>,
        /// Print the feedback URL and keep serving instead of waiting
        #[arg(long)]
        no_wait: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let bridge = FeedbackBridge::new(config.bridge.clone());
            let sweeper = bridge.spawn_sweeper();
            let app = GatewayServer::build(bridge);

            let addr = config.server.bind_addr();
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(
                addr = %addr,
                public_url = %config.server.public_url(),
                "Parley gateway listening"
            );
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            sweeper.abort();
            info!("Parley gateway stopped");
        }
        Commands::Ask {
            summary,
            timeout,
            session,
            no_wait,
        } => {
            let bridge = FeedbackBridge::new(config.bridge.clone());
            let sweeper = bridge.spawn_sweeper();
            let app = GatewayServer::build(bridge.clone());

            let addr = config.server.bind_addr();
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            let server = tokio::spawn(async move { axum::serve(listener, app).await });

            let mut registry = ToolRegistry::new();
            let collector: Arc<dyn FeedbackCollector> = bridge;
            register_builtins(
                &mut registry,
                collector,
                config.server.public_url(),
                config.bridge.default_timeout(),
            );

            let mut arguments = serde_json::json!({
                "work_summary": summary,
                "require_response": !no_wait,
            });
            if let Some(secs) = timeout {
                arguments["timeout"] = serde_json::json!(secs);
            }
            if let Some(id) = session {
                arguments["session_id"] = serde_json::json!(id);
            }

            info!(addr = %addr, "Waiting for feedback");
            let result = registry
                .execute(ToolCall {
                    id: "cli".to_string(),
                    name: "collect_feedback".to_string(),
                    arguments,
                })
                .await?;
            println!("{}", result.content);

            if result.is_error {
                sweeper.abort();
                server.abort();
                anyhow::bail!("collect_feedback failed");
            }
            if no_wait {
                // The page stays reachable until interrupted.
                shutdown_signal().await;
            }
            sweeper.abort();
            server.abort();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
