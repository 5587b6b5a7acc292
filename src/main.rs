mod config;
mod pilot;
mod transport;

use config::PilotConfig;
use pilot::Pilot;
use transport::{connect_with_retry, TcpConnector, TransportConnector};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = PilotConfig::from_env()?;

    info!("Drone pilot starting");
    info!("  server: {}", config.server_addr);
    info!("  plan: {} ticks per cycle, max {} ticks", config.plan.cycle_len(), config.max_ticks);

    let connector = TcpConnector::new(config.server_addr.clone(), config.connect_timeout);
    let stream = connect_with_retry(&connector, &config.retry).await?;
    info!("Connected to {} via {}", connector.address(), connector.name());

    let mut pilot = Pilot::new(stream, config.response_timeout);
    match pilot.fly(&config.plan, config.max_ticks).await {
        Ok(summary) => {
            let (iterations, distance) = summary
                .metrics
                .map(|m| (m.iterations, m.total_distance))
                .unwrap_or_default();
            match summary.crash {
                Some(cause) => warn!(
                    "Session {} ended in crash {} after {} iterations, {} distance",
                    summary.session_id, cause, iterations, distance
                ),
                None => info!(
                    "Session {} completed {} iterations, {} distance, {} rejected",
                    summary.session_id, iterations, distance, summary.rejected
                ),
            }
            Ok(())
        }
        Err(e) => {
            error!("Flight aborted: {}", e);
            Err(e)
        }
    }
}
