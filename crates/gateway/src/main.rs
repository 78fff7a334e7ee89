//! HydroChat gateway binary: a conversational dispatcher that turns
//! clinician utterances into CRUD and retrieval operations against a
//! patient-records REST backend.

mod api;
mod bootstrap;
mod runtime;
mod state;

use clap::{Parser, Subcommand};

use hc_domain::config::Config;

#[derive(Parser)]
#[command(name = "hydrochat", version, about = "HydroChat conversational dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default).
    Serve {
        /// Override the bind host from HYDROCHAT_HOST.
        #[arg(long)]
        host: Option<String>,
        /// Override the bind port from HYDROCHAT_PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Load the configuration from the environment, print the effective
    /// (secret-redacted) values, and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Some(Command::CheckConfig) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config.redacted_summary())?
            );
            Ok(())
        }
        Some(Command::Serve { host, port }) => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        None => serve(config).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    bootstrap::init_tracing(&config);

    let addr = format!("{}:{}", config.host, config.port);
    let state = bootstrap::build(config)?;
    let app = api::router(state.clone()).with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
