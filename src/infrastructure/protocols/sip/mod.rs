//! SIP registrar service
//!
//! ```text
//! ┌─────────────────────────┐
//! │   Transaction Layer     │  (external: parsing, digest auth)
//! └───────────┬─────────────┘
//!             │ RegisterRequest
//! ┌───────────▼─────────────┐      ┌──────────────────┐
//! │       Registrar         │◄────►│  Authenticator   │
//! └───────────┬─────────────┘      └──────────────────┘
//!             │
//! ┌───────────▼─────────────┐      ┌──────────────────┐
//! │   RegistrationStore     │◄─────│  ExpirySweeper   │
//! └─────────────────────────┘      └──────────────────┘
//! ```

pub mod auth;
pub mod message;
pub mod registrar;
pub mod sweeper;

pub use auth::{Authenticator, DigestNonceAuthenticator};
pub use message::{RegisterContact, RegisterOutcome, RegisterRequest, RegisterResponse, ResponseContact};
pub use registrar::{RegisterError, Registrar};
pub use sweeper::{ExpirySweeper, SweeperHandle, DEFAULT_SWEEP_INTERVAL};
