//! Registration domain events

use crate::domain::registration::aggregate::Registration;
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why an AOR lost its last binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnregisterReason {
    /// A REGISTER removed the last binding
    Removed,
    /// The expiry sweeper aged out the last binding
    Expired,
}

/// First binding created for an AOR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AorRegistered {
    pub metadata: EventMetadata,
    pub registration: Registration,
}

/// Existing AOR touched by a REGISTER
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AorUpdated {
    pub metadata: EventMetadata,
    pub registration: Registration,
}

/// AOR dropped from the store; carries the last known bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AorUnregistered {
    pub metadata: EventMetadata,
    pub registration: Registration,
    pub reason: UnregisterReason,
}

/// Union of all registration events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrationEvent {
    Registered(AorRegistered),
    Updated(AorUpdated),
    Unregistered(AorUnregistered),
}

impl RegistrationEvent {
    pub fn registered(registration: Registration) -> Self {
        RegistrationEvent::Registered(AorRegistered {
            metadata: EventMetadata::new("registration.registered"),
            registration,
        })
    }

    pub fn updated(registration: Registration) -> Self {
        RegistrationEvent::Updated(AorUpdated {
            metadata: EventMetadata::new("registration.updated"),
            registration,
        })
    }

    pub fn unregistered(registration: Registration, reason: UnregisterReason) -> Self {
        RegistrationEvent::Unregistered(AorUnregistered {
            metadata: EventMetadata::new("registration.unregistered"),
            registration,
            reason,
        })
    }

    pub fn registration(&self) -> &Registration {
        match self {
            RegistrationEvent::Registered(e) => &e.registration,
            RegistrationEvent::Updated(e) => &e.registration,
            RegistrationEvent::Unregistered(e) => &e.registration,
        }
    }

    fn metadata(&self) -> &EventMetadata {
        match self {
            RegistrationEvent::Registered(e) => &e.metadata,
            RegistrationEvent::Updated(e) => &e.metadata,
            RegistrationEvent::Unregistered(e) => &e.metadata,
        }
    }
}

impl DomainEvent for RegistrationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RegistrationEvent::Registered(_) => "registration.registered",
            RegistrationEvent::Updated(_) => "registration.updated",
            RegistrationEvent::Unregistered(_) => "registration.unregistered",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata().occurred_at
    }
}
