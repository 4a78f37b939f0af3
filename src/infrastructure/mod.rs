//! Infrastructure layer - Technical implementations
//!
//! This layer contains the SIP-facing services built on the domain:
//! the registrar, its authenticator and the expiry sweeper.

pub mod protocols;
