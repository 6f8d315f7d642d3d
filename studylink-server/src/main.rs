//! studylink-server - study coordination server
//!
//! Serves the participant and lab pages, accepts participant registrations
//! over WebSocket, and applies the survey platform's stage notifications.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use studylink_common::config::Config;
use studylink_common::Identifier;
use studylink_server::persistence::{store, PersistenceGateway};
use studylink_server::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Command-line arguments; each overrides the config file
#[derive(Parser, Debug)]
#[command(name = "studylink-server")]
#[command(about = "Coordinates webcam recording with survey progress")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "STUDYLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "STUDYLINK_BIND")]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "STUDYLINK_PORT")]
    port: Option<u16>,

    /// Namespace UUID for participant identifiers
    #[arg(long, env = "STUDYLINK_UUID_NAMESPACE")]
    uuid_namespace: Option<Uuid>,

    /// Directory of participant-facing pages
    #[arg(long, env = "STUDYLINK_PUBLIC_DIR")]
    public_dir: Option<PathBuf>,

    /// Directory of lab-only pages
    #[arg(long, env = "STUDYLINK_PRIVATE_DIR")]
    private_dir: Option<PathBuf>,

    /// Username for the /private area
    #[arg(long, env = "STUDYLINK_AUTH_USER")]
    auth_user: Option<String>,

    /// Password for the /private area
    #[arg(long, env = "STUDYLINK_AUTH_PASS", hide_env_values = true)]
    auth_pass: Option<String>,

    /// Redirect plain-http requests to https
    #[arg(long, env = "STUDYLINK_FORCE_HTTPS")]
    force_https: bool,
}

impl Args {
    fn apply(self, mut config: Config) -> Config {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.uuid_namespace.is_some() {
            config.uuid_namespace = self.uuid_namespace;
        }
        if let Some(dir) = self.public_dir {
            config.public_dir = dir;
        }
        if let Some(dir) = self.private_dir {
            config.private_dir = dir;
        }
        if self.auth_user.is_some() {
            config.auth.username = self.auth_user;
        }
        if self.auth_pass.is_some() {
            config.auth.password = self.auth_pass;
        }
        config.force_https |= self.force_https;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "studylink_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting studylink-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let config = args.apply(config);
    config.validate().context("Invalid configuration")?;

    let identifier = match config.uuid_namespace {
        Some(namespace) => Identifier::new(namespace),
        None => {
            let identifier = Identifier::ephemeral();
            warn!(
                namespace = %identifier.namespace(),
                "No uuid_namespace configured; participant ids will change on restart"
            );
            identifier
        }
    };

    if config.auth.credentials().is_none() {
        warn!("No credential configured; /private is closed to everyone");
    }

    let store = store::from_config(&config.store).context("Failed to set up snapshot store")?;
    let persistence = PersistenceGateway::start(store, None);
    info!("Snapshots go to the {} store", persistence.store_name());

    info!("Public files: {}", config.public_dir.display());
    info!("Private files: {}", config.private_dir.display());

    let state = AppState::new(&config, identifier, persistence);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_addr, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("studylink-server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
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
            Ok(mut sig) => {
                sig.recv().await;
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
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
