use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shopgate::config::ShopgateConfig;
use shopgate::http::HttpServer;
use shopgate::identity::ChainResolver;
use shopgate::ratelimit::RoutePolicy;

/// Sliding-window admission control for the storefront services.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "SHOPGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Shopgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ShopgateConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        limiters = config.rate_limiting.limiters.len(),
        routes = config.routes.len(),
        "Configuration loaded"
    );

    let policy = Arc::new(RoutePolicy::from_config(&config)?);
    let resolver = Arc::new(ChainResolver::new(
        config.rate_limiting.identity_sources.clone(),
    ));
    info!(sources = ?resolver.sources(), "Identity resolver initialized");

    let server = HttpServer::new(config.server.listen_addr, policy, resolver);

    // Serve until Ctrl+C or SIGTERM
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Shopgate Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Resolve once the process is asked to stop, so in-flight requests drain.
///
/// A signal handler that cannot be installed is logged and ignored; the
/// server then keeps running until one of the other signals arrives.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = wait_for_ctrl_c() => {}
                    _ = terminate.recv() => {
                        info!("SIGTERM received, draining connections");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM, only Ctrl+C stops the gateway");
                wait_for_ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, draining connections"),
        Err(e) => {
            warn!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_signal_waits_for_a_signal() {
        // Installing the handlers must not resolve or panic on its own.
        let result = tokio::time::timeout(Duration::from_millis(50), shutdown_signal()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["shopgate"]);
        assert_eq!(cli.log_format, LogFormat::Pretty);
        assert!(cli.listen.is_none());
    }
}
