//! SIP registrar and call core
//!
//! Keeps the AOR → contact binding table for a SIP registrar and drives the
//! INVITE state machine, including resolution of forked responses.

pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use domain::shared::error::{DomainError, Result};
