//! In-memory registration store
//!
//! Every read, write and sweep goes through one store-wide lock, so a sweep
//! never interleaves with a commit for the same AOR.

use crate::domain::registration::aggregate::Registration;
use crate::domain::registration::binding::Binding;
use crate::domain::shared::value_objects::Aor;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Outcome of a committed [`RegistrationStore::update`]
#[derive(Debug, Clone)]
pub struct StoreUpdate {
    /// Registration before the update, `None` if the AOR was unknown
    pub previous: Option<Registration>,
    /// Registration after the update; an empty one was not retained
    pub current: Registration,
}

impl StoreUpdate {
    /// Whether the AOR is still present in the store
    pub fn is_retained(&self) -> bool {
        !self.current.is_empty()
    }

    /// Whether the update created the AOR
    pub fn is_new(&self) -> bool {
        self.previous.is_none() && self.is_retained()
    }
}

/// Result of one expiry sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Number of bindings removed across all registrations
    pub removed_bindings: usize,
    /// Registrations dropped because they lost their last binding,
    /// as they were before the sweep
    pub dropped: Vec<Registration>,
}

/// Map of AOR key to registration
#[derive(Debug, Default)]
pub struct RegistrationStore {
    registrations: RwLock<HashMap<String, Registration>>,
}

impl RegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, aor: &Aor) -> Option<Registration> {
        let registrations = self.registrations.read().await;
        registrations.get(&aor.key()).cloned()
    }

    /// Fetch the registration for `aor`, or a fresh one owned by `owner`
    ///
    /// A fresh registration has no bindings and therefore is not retained;
    /// it becomes visible once [`update`](Self::update) gives it a binding.
    pub async fn upsert(&self, aor: &Aor, owner: &str) -> Registration {
        let mut registrations = self.registrations.write().await;
        match registrations.get_mut(&aor.key()) {
            Some(registration) => {
                registration.set_owner(owner);
                registration.clone()
            }
            None => Registration::new(aor.clone(), owner),
        }
    }

    pub async fn remove(&self, aor: &Aor) -> Option<Registration> {
        let mut registrations = self.registrations.write().await;
        let removed = registrations.remove(&aor.key());
        if removed.is_some() {
            info!(aor = %aor, "Registration removed");
        }
        removed
    }

    /// Apply `f` to a working copy of the registration for `aor`
    ///
    /// The copy replaces the stored registration only when `f` returns
    /// `Ok`; an empty result deletes the AOR. On `Err` the store is left
    /// exactly as it was.
    pub async fn update<E, F>(&self, aor: &Aor, owner: &str, f: F) -> Result<StoreUpdate, E>
    where
        F: FnOnce(&mut Registration) -> Result<(), E>,
    {
        let key = aor.key();
        let mut registrations = self.registrations.write().await;

        let previous = registrations.get(&key).cloned();
        let mut working = previous
            .clone()
            .unwrap_or_else(|| Registration::new(aor.clone(), owner));

        f(&mut working)?;

        if working.is_empty() {
            registrations.remove(&key);
        } else {
            registrations.insert(key, working.clone());
        }

        Ok(StoreUpdate {
            previous,
            current: working,
        })
    }

    /// Remove expired bindings and drop registrations left empty
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let mut registrations = self.registrations.write().await;
        let mut report = SweepReport::default();

        registrations.retain(|_, registration| {
            if registration.bindings().all(|b| b.is_expired_at(now)) {
                report.removed_bindings += registration.len();
                report.dropped.push(registration.clone());
                return false;
            }
            report.removed_bindings += registration.remove_expired(now);
            true
        });

        if report.removed_bindings > 0 {
            debug!(
                removed = report.removed_bindings,
                dropped = report.dropped.len(),
                "Swept expired bindings"
            );
        }

        report
    }

    /// Live contacts for `aor`, for request routing
    pub async fn lookup(&self, aor: &Aor, now: DateTime<Utc>) -> Vec<Binding> {
        let registrations = self.registrations.read().await;
        registrations
            .get(&aor.key())
            .map(|r| r.live_bindings(now).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every registration
    pub async fn registrations(&self) -> Vec<Registration> {
        let registrations = self.registrations.read().await;
        registrations.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registrations.read().await.is_empty()
    }
}
