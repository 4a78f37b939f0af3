//! Background expiry of stale registrations

use crate::domain::registration::{RegistrationEvent, RegistrationStore, SweepReport, UnregisterReason};
use crate::domain::shared::events::EventBus;
use chrono::Utc;
use futures::FutureExt;
use metrics::gauge;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Default sweep period
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

/// Periodically purges expired bindings and empty registrations
pub struct ExpirySweeper {
    store: Arc<RegistrationStore>,
    events: EventBus<RegistrationEvent>,
    interval: Duration,
}

/// Running sweeper task
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<RegistrationStore>, events: EventBus<RegistrationEvent>) -> Self {
        Self {
            store,
            events,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep and publish `Unregistered` for every dropped AOR
    pub async fn sweep_once(&self) -> SweepReport {
        let report = self.store.sweep_expired(Utc::now()).await;

        for registration in &report.dropped {
            info!(aor = %registration.aor(), "Registration expired");
            self.events.publish(RegistrationEvent::unregistered(
                registration.clone(),
                UnregisterReason::Expired,
            ));
        }

        gauge!("sip_registered_aors").set(self.store.len().await as f64);
        report
    }

    /// Spawn the periodic task
    pub fn start(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        info!("Starting expiry sweeper (interval: {:?})", self.interval);

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Some(report) = guarded_tick(self.sweep_once()).await {
                            debug!(
                                removed = report.removed_bindings,
                                dropped = report.dropped.len(),
                                "Sweep tick complete"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Expiry sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

/// Run one tick, turning a panic into `None` so the loop keeps going
async fn guarded_tick<F>(tick: F) -> Option<SweepReport>
where
    F: Future<Output = SweepReport>,
{
    match AssertUnwindSafe(tick).catch_unwind().await {
        Ok(report) => Some(report),
        Err(_) => {
            error!("Expiry sweep panicked, continuing with next tick");
            None
        }
    }
}

impl SweeperHandle {
    /// Signal the task to stop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Expiry sweeper task failed: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registration::Binding;
    use crate::domain::shared::value_objects::Aor;
    use chrono::Duration as ChronoDuration;

    async fn seed(store: &RegistrationStore, aor: &str, contact: &str, expires_in: i64) {
        let aor = Aor::parse(aor).unwrap();
        let expires_at = Utc::now() + ChronoDuration::seconds(expires_in);
        store
            .update(&aor, "test", |reg| {
                reg.upsert_binding(Binding::new(contact, "call", 1, expires_at));
                Ok::<_, ()>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_once_publishes_expired() {
        let store = Arc::new(RegistrationStore::new());
        let events = EventBus::new();
        let mut rx = events.subscribe();

        seed(&store, "sip:alice@example.com", "sip:alice@10.0.0.1", -1).await;
        seed(&store, "sip:bob@example.com", "sip:bob@10.0.0.2", 600).await;

        let sweeper = ExpirySweeper::new(store.clone(), events);
        let report = sweeper.sweep_once().await;

        assert_eq!(report.dropped.len(), 1);
        assert_eq!(store.len().await, 1);

        match rx.try_recv().unwrap() {
            RegistrationEvent::Unregistered(e) => {
                assert_eq!(e.reason, UnregisterReason::Expired);
                assert_eq!(e.registration.aor().user(), "alice");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_and_stop() {
        let store = Arc::new(RegistrationStore::new());
        seed(&store, "sip:alice@example.com", "sip:alice@10.0.0.1", -1).await;

        let handle = ExpirySweeper::new(store.clone(), EventBus::new())
            .with_interval(Duration::from_secs(15))
            .start();

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(store.is_empty().await);

        // Later ticks keep sweeping
        seed(&store, "sip:bob@example.com", "sip:bob@10.0.0.2", -1).await;
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(store.is_empty().await);
        assert!(!handle.is_finished());

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_tick_does_not_end_the_loop() {
        let failed = guarded_tick(async {
            let report = SweepReport::default();
            assert_eq!(report.removed_bindings, 1, "sweep failed");
            report
        })
        .await;
        assert!(failed.is_none());

        let next = guarded_tick(async {
            SweepReport {
                removed_bindings: 2,
                dropped: Vec::new(),
            }
        })
        .await;
        assert_eq!(next.map(|r| r.removed_bindings), Some(2));
    }

    #[test]
    fn test_default_interval() {
        let sweeper = ExpirySweeper::new(Arc::new(RegistrationStore::new()), EventBus::new());
        assert_eq!(sweeper.interval(), Duration::from_secs(15));
    }
}
