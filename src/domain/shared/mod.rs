//! Shared kernel - identifiers, errors and the event bus used by both bounded contexts

pub mod error;
pub mod events;
pub mod value_objects;

pub use error::{DomainError, Result};
pub use events::{DomainEvent, EventBus, EventMetadata};
pub use value_objects::{Aor, CallId, DialogId, FlowRef};
