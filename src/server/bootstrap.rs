use crate::config::validator;
use crate::metrics::Metrics;
use crate::server::{self, GatewayState};
use anyhow::Result;
use std::net::IpAddr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub bind: IpAddr,
    pub admin_listen: Option<String>,
    /// Validate the configuration, print diagnostics, and exit.
    pub check: bool,
}

/// Gateway lifecycle: init → load+validate → listen → drain → exit.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let content = std::fs::read_to_string(&args.config_path).map_err(|e| {
        anyhow::anyhow!("read config {}: {}", args.config_path.display(), e)
    })?;

    let report = validator::validate_str(&content);
    for warning in &report.warnings {
        tracing::warn!("config: {}", warning);
    }
    for error in &report.errors {
        tracing::error!("config: {}", error);
    }
    if !report.valid {
        anyhow::bail!(
            "configuration invalid: {} error(s), see diagnostics above",
            report.errors.len()
        );
    }
    let config = report
        .normalized
        .ok_or_else(|| anyhow::anyhow!("validation yielded no config"))?;

    tracing::info!(
        "config: loaded, ports={}, rules={}, tls_ports={}",
        config.table.port_count(),
        config.table.rule_count(),
        config.tls.len(),
    );

    if args.check {
        println!("configuration OK");
        return Ok(());
    }

    let metrics = Metrics::install();
    let state = GatewayState::new(config).with_metrics(metrics);

    if let Some(admin_listen) = args.admin_listen.clone() {
        let admin_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_admin_server(&admin_listen, admin_state).await {
                tracing::error!("server: admin failed, error={}", e);
            }
        });
    }

    let listeners = server::start(state, args.bind).await?;
    if listeners.bound().is_empty() {
        anyhow::bail!("no listener could be started");
    }

    wait_for_shutdown().await;

    listeners.shutdown().await;
    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }
}
