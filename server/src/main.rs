mod admin;
mod config;
mod session;

use admin::{AdminListener, RetentionSweeper};
use config::ServerConfig;
use dronesim_shared::{JsonFileBackend, MemoryBackend, TelemetryBackend};
use session::{AdminRegistry, SessionServer};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ServerConfig::from_env()?;

    let backend: Arc<dyn TelemetryBackend> = match &config.telemetry_dir {
        Some(dir) => {
            let backend = JsonFileBackend::new(dir)?;
            info!("Persisting telemetry under {}", backend.dir().display());
            Arc::new(backend)
        }
        None => {
            info!("Keeping telemetry in memory");
            Arc::new(MemoryBackend::new())
        }
    };
    if let Some(seed) = config.seed {
        info!("Environment seed fixed at {}", seed);
    }

    let registry = Arc::new(AdminRegistry::new());

    let sweeper = RetentionSweeper::new(
        registry.clone(),
        config.sweep_interval,
        config.registry_retention,
    );
    tokio::spawn(async move { sweeper.run().await });

    let admin_listener = TcpListener::bind(&config.admin_addr).await?;
    info!("Admin snapshots on {}", config.admin_addr);
    let admin = AdminListener::new(registry.view());
    tokio::spawn(async move {
        if let Err(e) = admin.run(admin_listener).await {
            error!("Admin listener stopped: {}", e);
        }
    });

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Drone simulator listening on {}", config.bind_addr);
    info!("  idle timeout: {}s", config.idle_timeout.as_secs());
    info!("  boundary: ±{}", config.flight.max_position);

    let server = Arc::new(SessionServer::new(config, registry.clone(), backend));

    tokio::select! {
        result = server.run(listener) => {
            if let Err(e) = &result {
                error!("Session server stopped: {}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            let view = registry.view();
            info!(
                "Shutting down with {} active of {} registered sessions",
                view.active_count().await,
                view.count().await
            );
            Ok(())
        }
    }
}
