use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs in production (CHARLA_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("CHARLA_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("charla_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = charla_server::config::ServerConfig::parse();
    tracing::info!("starting chat server on {}", config.listen_addr);

    let server = charla_server::server::Server::new(config);

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!("error waiting for shutdown signal: {e}");
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });

    server.run().await
}

/// SIGTERM or SIGINT on unix, ctrl-c elsewhere.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
