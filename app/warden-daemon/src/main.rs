use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_core::{Config, Endpoint, Identity, Lifecycle, Policy, Registry};
use warden_docker::{DockerApiServer, HttpEngine};

#[derive(Debug, Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct DaemonArgs {
    /// Config file to load instead of the system and user files.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listening endpoint (`tcp://host:port` or `unix:///path`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Engine endpoint (`unix:///var/run/docker.sock` or `tcp://host:port`).
    #[arg(long)]
    pub engine_host: Option<String>,

    /// Refuse to start against an engine older than the targeted API.
    #[arg(long)]
    pub strict_version: bool,

    /// Cgroup every container is confined to (detected when unset).
    #[arg(long)]
    pub cgroup_parent: Option<String>,

    /// Hostname containers may link to (system hostname when unset).
    #[arg(long)]
    pub hostname: Option<String>,

    /// Seconds the engine waits before killing a container at shutdown.
    #[arg(long)]
    pub stop_timeout: Option<u64>,
}

impl DaemonArgs {
    fn apply(self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(host) = self.engine_host {
            config.engine.host = host;
        }
        if self.strict_version {
            config.engine.strict_version = true;
        }
        if let Some(cgroup_parent) = self.cgroup_parent {
            config.identity.cgroup_parent = cgroup_parent;
        }
        if let Some(hostname) = self.hostname {
            config.identity.hostname = hostname;
        }
        if let Some(secs) = self.stop_timeout {
            config.shutdown.stop_timeout_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = DaemonArgs::parse();
    let mut config = match args.config.take() {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    args.apply(&mut config);

    let level = &config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "warden={level},warden_daemon={level},warden_docker={level},warden_core={level}"
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    info!("Starting Warden gateway...");

    let listen = Endpoint::parse(&config.server.listen).context("Invalid listen address")?;
    let engine_endpoint = Endpoint::parse(&config.engine.host).context("Invalid engine host")?;
    let identity = Identity::detect(&config.identity).context("Failed to detect gateway identity")?;

    let engine = Arc::new(HttpEngine::new(
        engine_endpoint.clone(),
        config.engine.api_version.clone(),
    ));
    let registry = Arc::new(Registry::new());
    let policy = Policy::new(engine.clone(), Arc::clone(&registry), identity);
    let lifecycle = Lifecycle::new(engine, registry, config.shutdown.stop_timeout());

    lifecycle
        .check_compatibility(&config.engine.api_version, config.engine.strict_version)
        .await
        .context("Engine compatibility check failed")?;

    let server = DockerApiServer::new(listen.clone(), policy, &config.engine.api_version);
    let mut server_handle = tokio::spawn(async move { server.run().await });

    info!(listen = %listen, engine = %engine_endpoint, "Warden gateway started");

    let server_result = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            server_handle.abort();
            Ok(())
        }
        joined = &mut server_handle => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("API server error: {e}");
                Err(anyhow::Error::new(e).context("API server failed"))
            }
            Err(e) => Err(anyhow::Error::new(e).context("API server task failed")),
        },
    };

    info!("Shutting down...");
    let report = lifecycle.shutdown().await;
    if !report.failed.is_empty() || !report.timed_out.is_empty() {
        warn!(
            failed = ?report.failed,
            timed_out = ?report.timed_out,
            "Some owned containers did not stop cleanly"
        );
    }

    if let Endpoint::Unix(path) = &listen {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove socket {}: {}", path.display(), e);
            }
        }
    }

    info!("Warden gateway stopped");
    server_result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
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
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
