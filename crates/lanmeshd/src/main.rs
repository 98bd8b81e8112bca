//! lanmeshd: LAN discovery daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lanmesh_api::{ApiState, NodeIdentity};
use lanmesh_core::LanmeshConfig;
use lanmesh_services::hosts_file::running_as_root;
use lanmesh_services::{Discovery, DiscoveryConfig, HostsFile, MetadataSource, Registry};

mod probe;

use probe::SystemProbe;

#[derive(Parser)]
#[command(name = "lanmeshd", about = "Authenticated LAN host discovery daemon")]
struct Args {
    /// Config file (default: $LANMESH_CONFIG or ~/.config/lanmesh/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a default config file and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init {
        let path = args.config.unwrap_or_else(LanmeshConfig::file_path);
        let path = LanmeshConfig::write_default_if_missing(&path)?;
        println!("config: {}", path.display());
        return Ok(());
    }

    let config = LanmeshConfig::load(args.config.as_deref()).context("failed to load config")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let resolved = config.node.validate().context("invalid configuration")?;

    // ── Local identity ───────────────────────────────────────────────────────
    let probe = SystemProbe::detect(resolved.network).context("failed to probe local system")?;
    let iface = probe.interface();
    let hostname = probe.hostname();
    tracing::info!(
        interface = %iface.name,
        ip = %iface.ip,
        mac = %iface.mac,
        hostname = %hostname,
        "lanmeshd starting"
    );

    // ── Registry ─────────────────────────────────────────────────────────────
    let registry = Registry::open(&config.node.db_path)
        .with_context(|| format!("failed to open registry {}", config.node.db_path.display()))?;
    tracing::info!(path = %config.node.db_path.display(), "registry opened");

    let hosts_file = if config.hosts_file.enabled {
        if !running_as_root() {
            tracing::warn!(
                path = %config.hosts_file.path.display(),
                "hosts file sync enabled but not running as root; writes will likely fail"
            );
        }
        Some(HostsFile::new(&config.hosts_file.path))
    } else {
        None
    };

    // ── Query API listener ───────────────────────────────────────────────────
    let api_listener = lanmesh_api::bind(config.api.port).await?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Discovery ────────────────────────────────────────────────────────────
    let discovery_config = DiscoveryConfig::from_node(&config.node, &resolved, Some(iface.ip));
    let source: Arc<dyn MetadataSource> = Arc::new(probe);
    let discovery = Discovery::bind(
        discovery_config,
        resolved.secret.clone(),
        source,
        registry.clone(),
        hosts_file,
    )
    .context("failed to bind discovery socket")?;
    let stats = discovery.stats();
    let tasks = discovery.spawn(&shutdown_tx);

    // ── Query API ────────────────────────────────────────────────────────────
    let api_state = ApiState {
        registry: registry.clone(),
        stats,
        identity: NodeIdentity {
            mac_address: iface.mac.clone(),
            ip_address: iface.ip.to_string(),
            hostname,
        },
        role: config.node.role,
        started_at: std::time::Instant::now(),
    };
    let mut api_task = tokio::spawn(lanmesh_api::serve_on(
        api_listener,
        api_state,
        shutdown_tx.subscribe(),
    ));

    // ── Wait for exit ────────────────────────────────────────────────────────
    let mut shutdown_rx = shutdown_tx.subscribe();

    let early_api_exit = tokio::select! {
        _ = shutdown_rx.recv() => {
            tracing::info!("shutting down");
            None
        }
        r = &mut api_task => {
            tracing::error!("API server exited before shutdown");
            let _ = shutdown_tx.send(());
            Some(r)
        }
    };

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "discovery task failed"),
            Err(e) => tracing::error!(error = %e, "discovery task panicked"),
        }
    }

    let api_result = match early_api_exit {
        Some(r) => r,
        None => api_task.await,
    };
    match api_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.context("API server failed")),
        Err(e) => Err(anyhow::anyhow!("API server task panicked: {}", e)),
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
