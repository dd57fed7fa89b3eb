//! record_admin - single-admin record manager with image uploads

use clap::Parser;
use record_admin::api::{self, AppState};
use record_admin::clock::{SharedClock, SystemClock};
use record_admin::config::Config;
use record_admin::tls;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// record_admin - single-admin record manager
#[derive(Parser, Debug)]
#[command(name = "record_admin")]
#[command(author, version, about, long_about = None)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("RADM_BUILD_TIME"), ")"))]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the salted hash of PASSWORD for `admin.password_hash`, then exit
    #[arg(long, value_name = "PASSWORD")]
    hash_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration from file if specified, otherwise use default loading
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    if let Some(mut password) = cli.hash_password {
        println!("{}", config.hash_with_salt(&password));
        zeroize::Zeroize::zeroize(&mut password);
        return Ok(());
    }

    // Initialize tracing
    let log_level = if cli.verbose {
        "record_admin=trace,tower_http=trace".to_string()
    } else {
        config.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    info!("Starting record_admin {}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", config.listen_addr);
    info!("  Data file: {}", config.data_file.display());
    info!("  Upload directory: {}", config.upload_dir.display());
    info!(
        "  Max upload size: {} MB",
        config.max_upload_size / 1024 / 1024
    );
    info!("  Session lifetime: {}s", config.session.lifetime_secs);
    info!(
        "  Login rate limit: {} per {}s",
        config.rate_limit.login_max_requests, config.rate_limit.login_period_secs
    );
    if !config.session.cookie_secure {
        warn!("  Session cookie is NOT marked Secure (development mode)");
    }

    let listen_addr = config.listen_addr;
    let tls_config = config.tls.clone();
    let sweep_every = Duration::from_secs(config.session.cleanup_interval_secs.max(1));

    let clock: SharedClock = Arc::new(SystemClock);
    let state = Arc::new(AppState::from_config(config, clock).await?);
    info!("  Records loaded: {}", state.records.ids().await?.len());

    // Expired sessions are otherwise only dropped when their cookie comes back.
    let sessions = state.sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired();
            if removed > 0 {
                debug!("Swept {} expired sessions ({} live)", removed, sessions.len());
            }
        }
    });

    let app = api::router(state).into_make_service_with_connect_info::<SocketAddr>();

    if tls_config.enabled {
        let rustls = tls::build_rustls_config(&tls_config, listen_addr).await?;
        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        info!("record_admin listening on https://{}", listen_addr);
        axum_server::bind_rustls(listen_addr, rustls)
            .handle(handle)
            .serve(app)
            .await?;
    } else {
        let listener = TcpListener::bind(&listen_addr).await?;
        info!("record_admin listening on http://{}", listen_addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
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
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
