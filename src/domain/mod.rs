//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: `Registration` and `Call`
//! - Value Objects: identifiers, bindings, call states
//! - Domain Events: published on typed event buses
//! - Ports: collaborator traits implemented outside the domain

pub mod call;
pub mod registration;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
