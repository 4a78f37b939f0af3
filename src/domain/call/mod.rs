//! Call bounded context - INVITE lifecycle and fork resolution

pub mod aggregate;
pub mod collaborator;
pub mod event;
pub mod registry;
pub mod value_object;

pub use aggregate::Call;
pub use collaborator::{CollaboratorError, DialogLayer, RequestSender, ResponseSender};
pub use event::CallStateChanged;
pub use registry::CallRegistry;
pub use value_object::{CallDirection, CallResponse, CallState, CallStats, DialogTermination, InviteRequest};
