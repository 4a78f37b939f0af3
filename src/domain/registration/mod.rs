//! Registration bounded context - AOR bindings and their store

pub mod aggregate;
pub mod binding;
pub mod event;
pub mod store;

pub use aggregate::Registration;
pub use binding::Binding;
pub use event::{RegistrationEvent, UnregisterReason};
pub use store::{RegistrationStore, StoreUpdate, SweepReport};
