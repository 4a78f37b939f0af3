//! Registration aggregate root

use crate::domain::registration::binding::Binding;
use crate::domain::shared::value_objects::Aor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All bindings of one address-of-record
///
/// At most one binding exists per contact URI. An empty registration is
/// never kept by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    aor: Aor,
    /// Authenticated user that last modified the registration
    owner: String,
    bindings: HashMap<String, Binding>,
}

impl Registration {
    pub fn new(aor: Aor, owner: impl Into<String>) -> Self {
        Self {
            aor,
            owner: owner.into(),
            bindings: HashMap::new(),
        }
    }

    pub fn aor(&self) -> &Aor {
        &self.aor
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
    }

    pub fn binding(&self, contact_uri: &str) -> Option<&Binding> {
        self.bindings.get(contact_uri)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    /// Insert or replace the binding for its contact URI
    pub fn upsert_binding(&mut self, binding: Binding) -> Option<Binding> {
        self.bindings.insert(binding.contact_uri.clone(), binding)
    }

    pub fn remove_binding(&mut self, contact_uri: &str) -> Option<Binding> {
        self.bindings.remove(contact_uri)
    }

    /// Remove expired bindings, returning how many were removed
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, b| !b.is_expired_at(now));
        before - self.bindings.len()
    }

    /// Bindings that have not expired yet
    pub fn live_bindings(&self, now: DateTime<Utc>) -> Vec<&Binding> {
        self.bindings
            .values()
            .filter(|b| !b.is_expired_at(now))
            .collect()
    }

    /// Bindings to list in a REGISTER response
    pub fn advertised_bindings(&self, now: DateTime<Utc>) -> Vec<&Binding> {
        let mut bindings: Vec<&Binding> = self
            .bindings
            .values()
            .filter(|b| b.is_advertisable(now))
            .collect();
        bindings.sort_by(|a, b| a.contact_uri.cmp(&b.contact_uri));
        bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
