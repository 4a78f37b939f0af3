//! Call value objects

use crate::domain::shared::value_objects::CallId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    /// We sent the INVITE (UAC)
    Outbound,
    /// We received the INVITE (UAS)
    Inbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Outbound => "outbound",
            CallDirection::Inbound => "inbound",
        }
    }
}

/// Call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Outbound call created, INVITE not sent yet
    WaitingForStart,
    /// INVITE sent, no alerting response yet
    Calling,
    /// 180 Ringing received
    Ringing,
    /// 182 Queued received
    Queued,
    /// Inbound INVITE waiting for the application
    WaitingToAccept,
    /// Dialog confirmed
    Active,
    /// CANCEL sent, waiting for the INVITE to complete
    Terminating,
    /// Call ended
    Terminated,
    /// Resources released
    Disposed,
}

impl CallState {
    pub fn initial(direction: CallDirection) -> Self {
        match direction {
            CallDirection::Outbound => CallState::WaitingForStart,
            CallDirection::Inbound => CallState::WaitingToAccept,
        }
    }

    /// INVITE outstanding and not yet answered
    pub fn is_early(&self) -> bool {
        matches!(self, CallState::Calling | CallState::Ringing | CallState::Queued)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Terminated | CallState::Disposed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallState::WaitingForStart => "WaitingForStart",
            CallState::Calling => "Calling",
            CallState::Ringing => "Ringing",
            CallState::Queued => "Queued",
            CallState::WaitingToAccept => "WaitingToAccept",
            CallState::Active => "Active",
            CallState::Terminating => "Terminating",
            CallState::Terminated => "Terminated",
            CallState::Disposed => "Disposed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a dialog is being torn down
///
/// `ForkLost` and `CallFailed` stay distinct: a lost fork had a winner and
/// its branch is ended gracefully, a failed call had none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogTermination {
    /// Another branch answered first
    ForkLost,
    /// The INVITE got a non-2xx final response
    CallFailed,
    /// The call was canceled locally before it was answered
    Canceled,
    /// Local hangup of an answered call
    Hangup,
    /// The call object was disposed
    Disposed,
}

impl DialogTermination {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogTermination::ForkLost => "fork_lost",
            DialogTermination::CallFailed => "call_failed",
            DialogTermination::Canceled => "canceled",
            DialogTermination::Hangup => "hangup",
            DialogTermination::Disposed => "disposed",
        }
    }
}

/// Outbound INVITE handed to the request sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRequest {
    pub call_id: CallId,
    pub from: String,
    pub to: String,
    /// SDP offer
    pub sdp: Option<String>,
}

/// Response to our INVITE as reported by the request sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResponse {
    pub status_code: u16,
    /// To-tag identifying the responding branch
    pub dialog_tag: Option<String>,
    pub sdp: Option<String>,
}

impl CallResponse {
    pub fn new(status_code: u16, dialog_tag: Option<&str>, sdp: Option<&str>) -> Self {
        Self {
            status_code,
            dialog_tag: dialog_tag.map(str::to_string),
            sdp: sdp.map(str::to_string),
        }
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status_code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_final(&self) -> bool {
        self.status_code >= 200
    }
}

/// Call Statistics
#[derive(Debug, Clone)]
pub struct CallStats {
    /// When the call was created
    pub created_at: Instant,
    /// When the call was answered (if applicable)
    pub answered_at: Option<Instant>,
    /// When the call ended (if applicable)
    pub ended_at: Option<Instant>,
    /// Number of provisional responses received
    pub provisional_count: u32,
}

impl CallStats {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            answered_at: None,
            ended_at: None,
            provisional_count: 0,
        }
    }

    /// Time from creation to answer
    pub fn setup_duration(&self) -> Option<Duration> {
        self.answered_at.map(|t| t.duration_since(self.created_at))
    }

    /// Time from answer to end
    pub fn call_duration(&self) -> Option<Duration> {
        match (self.answered_at, self.ended_at) {
            (Some(answered), Some(ended)) => Some(ended.duration_since(answered)),
            _ => None,
        }
    }

    pub(crate) fn mark_answered(&mut self) {
        self.answered_at.get_or_insert_with(Instant::now);
    }

    pub(crate) fn mark_ended(&mut self) {
        self.ended_at.get_or_insert_with(Instant::now);
    }
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_depends_on_direction() {
        assert_eq!(CallState::initial(CallDirection::Outbound), CallState::WaitingForStart);
        assert_eq!(CallState::initial(CallDirection::Inbound), CallState::WaitingToAccept);
    }

    #[test]
    fn test_state_helpers() {
        assert!(CallState::Calling.is_early());
        assert!(CallState::Queued.is_early());
        assert!(!CallState::Terminating.is_early());
        assert!(CallState::Terminated.is_terminal());
        assert!(CallState::Disposed.is_terminal());
        assert!(!CallState::Active.is_terminal());
    }

    #[test]
    fn test_response_classes() {
        let ringing = CallResponse::new(180, Some("a"), None);
        assert!(ringing.is_provisional());
        assert!(!ringing.is_final());

        let ok = CallResponse::new(200, Some("a"), Some("v=0"));
        assert!(ok.is_success());
        assert!(ok.is_final());

        let busy = CallResponse::new(486, None, None);
        assert!(busy.is_final());
        assert!(!busy.is_success());
    }

    #[test]
    fn test_call_stats() {
        let mut stats = CallStats::new();
        assert!(stats.setup_duration().is_none());

        stats.mark_answered();
        let answered = stats.answered_at;
        stats.mark_answered();
        assert_eq!(stats.answered_at, answered);

        stats.mark_ended();
        assert!(stats.call_duration().is_some());
    }
}
