//! tenant-realtime feed monitor.
//!
//! Opens the tenant's live connection and logs every status change and
//! decoded event until Ctrl-C.

use tracing_subscriber::EnvFilter;

use tenant_realtime::config::RealtimeConfig;
use tenant_realtime::domain::Envelope;
use tenant_realtime::service::RealtimeService;
use tenant_realtime::ws::TungsteniteConnector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = RealtimeConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(base_url = %config.ws_base_url, "starting tenant-realtime monitor");

    let service = RealtimeService::start(config, TungsteniteConnector);

    let status_sub = service.subscribe_status(|status| {
        tracing::info!(%status, "connection status changed");
    });
    let event_sub = service.subscribe(|envelope: &Envelope| {
        tracing::info!(event = %envelope.event, data = %envelope.data, "event received");
    });
    tracing::debug!(
        status_subscriber = status_sub.id(),
        event_subscriber = event_sub.id(),
        "log subscribers registered"
    );

    let tenant = service.ensure_connection();
    tracing::info!(%tenant, "live feed requested");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    service.shutdown().await;

    Ok(())
}
