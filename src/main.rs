use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use accesslens::config::AppConfig;
use accesslens::engine::{builtin, RuleCatalog};
use accesslens::{coordinator, db, routes, AppState};
use mimalloc::MiMalloc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// M-MIMALLOC-APP: Use mimalloc as global allocator for improved performance.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "accesslens=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = AppConfig::from_env()?;
    let stores = db::open_stores(&config).await?;

    let catalog = RuleCatalog::with_rules(builtin::rules());
    if let Some(path) = &config.rules_path {
        let report = catalog.load_file(Path::new(path))?;
        for rejected in &report.rejected {
            tracing::warn!(rule_id = %rejected.id, reason = %rejected.reason, "Rule file entry skipped");
        }
    }
    tracing::info!(rules = catalog.len(), "Rule catalog ready");

    let state = AppState::new(
        config.clone(),
        stores.findings,
        stores.content,
        Arc::new(catalog),
    )?;

    if !config.rule_id_migrations.is_empty() {
        let renamed = state
            .lifecycle
            .migrate_rule_ids(&config.rule_id_migrations)
            .await?;
        tracing::info!(renamed, "Rule id migrations applied");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = coordinator::scheduler::spawn(
        Arc::clone(&state.coordinator),
        config.scheduler_poll_interval,
        shutdown_rx,
    );

    let host: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((host, config.port));
    tracing::info!(host = %addr, "Starting AccessLens API server");

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    scheduler.await?;
    tracing::info!("Server stopped");

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown requested");
}
