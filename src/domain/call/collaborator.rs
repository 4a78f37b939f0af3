//! Ports used by the call state machine
//!
//! These are defined in the domain layer as traits and implemented by the
//! transaction and dialog layers, which live outside this crate.

use crate::domain::call::value_object::{CallResponse, DialogTermination, InviteRequest};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{CallId, DialogId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<CollaboratorError> for DomainError {
    fn from(err: CollaboratorError) -> Self {
        DomainError::Collaborator(err.0)
    }
}

/// Client transaction carrying our INVITE
///
/// Responses come back asynchronously through `Call::on_response`.
#[cfg_attr(test, mockall::automock)]
pub trait RequestSender: Send + Sync {
    fn start(&self, request: &InviteRequest) -> Result<(), CollaboratorError>;

    /// Send CANCEL for the outstanding INVITE
    fn cancel(&self);
}

/// Server transaction of an inbound INVITE
#[cfg_attr(test, mockall::automock)]
pub trait ResponseSender: Send + Sync {
    fn send_response(&self, status_code: u16, sdp: Option<String>) -> Result<(), CollaboratorError>;
}

/// Dialog layer owning the dialogs a call refers to by id
///
/// Dialog state changes come back through `Call::on_dialog_terminated`.
#[cfg_attr(test, mockall::automock)]
pub trait DialogLayer: Send + Sync {
    /// Dialog for the branch that produced `response`, created on first sight
    fn create_or_get_dialog(&self, call_id: CallId, response: &CallResponse) -> Result<DialogId, CollaboratorError>;

    /// End a dialog; `graceful` sends a BYE-equivalent to the peer
    fn terminate(&self, dialog: &DialogId, reason: DialogTermination, graceful: bool);
}
