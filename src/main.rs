use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::gate::DecisionGate;
use tollgate::http::{router, HttpIdentityResolver, HttpServer};
use tollgate::ratelimit::{
    Clock, InMemoryWindowStore, RateLimiterBackend, SlidingWindowLimiter, SystemClock,
};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "tollgate", version, about = "Sliding-window request admission control")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    let limits = config.limit_table()?;
    info!(
        http_addr = %config.server.http_addr,
        default_limit = limits.default_limit().max_requests(),
        default_window = ?limits.default_limit().window(),
        overrides = limits.overridden_operations().count(),
        "Configuration loaded"
    );
    if config.rate_limiting.identity.trust_proxy {
        warn!("Trusting proxy headers for caller identity; only safe behind a proxy that overwrites them");
    }

    // Initialize the window store and rate limiter
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryWindowStore::new(clock.clone()));
    let reaper = store
        .clone()
        .spawn_reaper(config.rate_limiting.store.reap_interval());
    let limiter = Arc::new(SlidingWindowLimiter::new(store, clock));
    let gate = Arc::new(DecisionGate::new(limiter, limits));
    let resolver = Arc::new(HttpIdentityResolver::from_config(
        &config.rate_limiting.identity,
    ));
    info!("Rate limiter initialized");

    #[cfg(unix)]
    if let Some(path) = args.config.clone() {
        tokio::spawn(reload_on_hangup(path, gate.clone()));
    }

    let server = HttpServer::new(config.server.http_addr, router(gate, resolver));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    reaper.abort();
    info!("Tollgate stopped");
    Ok(())
}

/// Reload rate limits from the configuration file on every SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup<B: RateLimiterBackend>(path: String, gate: Arc<DecisionGate<B>>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGHUP handler; limits will not reload");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        match TollgateConfig::load(Some(path.as_str())).and_then(|config| config.limit_table()) {
            Ok(limits) => {
                info!(
                    path = %path,
                    overrides = limits.overridden_operations().count(),
                    "Reloaded rate limits"
                );
                gate.set_limits(limits);
            }
            Err(e) => warn!(path = %path, error = %e, "Reload failed; keeping previous limits"),
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
