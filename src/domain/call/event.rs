//! Call domain events

use crate::domain::call::value_object::{CallDirection, CallState};
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::value_objects::CallId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call moved from one state to another
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStateChanged {
    pub metadata: EventMetadata,
    pub call_id: CallId,
    pub direction: CallDirection,
    pub previous: CallState,
    pub current: CallState,
}

impl CallStateChanged {
    pub fn new(call_id: CallId, direction: CallDirection, previous: CallState, current: CallState) -> Self {
        Self {
            metadata: EventMetadata::new("call.state_changed"),
            call_id,
            direction,
            previous,
            current,
        }
    }
}

impl DomainEvent for CallStateChanged {
    fn event_type(&self) -> &'static str {
        "call.state_changed"
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata.occurred_at
    }
}
