use sip_registrar::config::Config;
use sip_registrar::domain::registration::{RegistrationEvent, RegistrationStore};
use sip_registrar::domain::shared::events::{DomainEvent, EventBus};
use sip_registrar::infrastructure::protocols::sip::{DigestNonceAuthenticator, ExpirySweeper, Registrar};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting SIP registrar");
    info!("Configuration loaded: {:?}", config);

    let store = Arc::new(RegistrationStore::new());
    let events: EventBus<RegistrationEvent> = EventBus::new();
    let auth = Arc::new(DigestNonceAuthenticator::with_admins(
        config.registrar.admin_users.iter().cloned(),
    ));

    let registrar = Arc::new(
        Registrar::new(store.clone(), auth, config.registrar.clone()).with_events(events.clone()),
    );
    info!(
        "Registrar serving domains {:?} (expires {}..{}, default {})",
        registrar.config().domains,
        registrar.config().min_expires,
        registrar.config().max_expires,
        registrar.config().default_expires
    );

    let sweeper = ExpirySweeper::new(store.clone(), events.clone()).with_interval(config.sweeper.interval());
    let sweeper_handle = sweeper.start();

    // Registration event log
    let mut receiver = events.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!(
                        target: "registration_events",
                        event_type = event.event_type(),
                        aor = %event.registration().aor(),
                        "{}",
                        json
                    ),
                    Err(e) => warn!("Failed to serialize registration event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Event logger lagged, {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("SIP registrar started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    sweeper_handle.stop().await;
    event_logger.abort();
    info!("Registrations at shutdown: {}", store.len().await);

    Ok(())
}
