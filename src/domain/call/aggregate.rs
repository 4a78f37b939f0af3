//! Call aggregate root
//!
//! One INVITE attempt, caller or callee side. Response and dialog callbacks
//! may arrive from several forks at once; they serialize through the
//! per-call lock.
//!
//! State is decided under the lock. Dialog creation and the inbound
//! response sender are invoked while it is held and must not call back into
//! the same call. Sending CANCEL, tearing dialogs down and publishing state
//! changes happen after the lock is released.

use crate::domain::call::collaborator::{DialogLayer, RequestSender, ResponseSender};
use crate::domain::call::event::CallStateChanged;
use crate::domain::call::value_object::{
    CallDirection, CallResponse, CallState, CallStats, DialogTermination, InviteRequest,
};
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::events::EventBus;
use crate::domain::shared::value_objects::{CallId, DialogId};
use metrics::counter;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Status sent when a pending inbound INVITE is given up
const REQUEST_TERMINATED: u16 = 487;

#[derive(Debug, Clone)]
struct EarlyDialog {
    dialog: DialogId,
    /// SDP carried by the branch's provisional responses
    sdp: Option<String>,
}

#[derive(Debug)]
struct CallInner {
    state: CallState,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
    early_dialogs: Vec<EarlyDialog>,
    confirmed_dialog: Option<DialogId>,
    /// Dialogs we queued for teardown ourselves
    ended: HashSet<DialogId>,
    /// INVITE handed to the sender, `start` not returned yet
    sending_invite: bool,
    /// CANCEL requested while the INVITE was still being sent
    cancel_pending: bool,
    stats: CallStats,
}

/// Work left for after the lock is released
#[derive(Debug)]
enum Deferred {
    CancelSender,
    TerminateDialog(DialogId, DialogTermination, bool),
    Notify(CallState, CallState),
}

impl CallInner {
    fn new(state: CallState, local_sdp: Option<String>, remote_sdp: Option<String>) -> Self {
        Self {
            state,
            local_sdp,
            remote_sdp,
            early_dialogs: Vec::new(),
            confirmed_dialog: None,
            ended: HashSet::new(),
            sending_invite: false,
            cancel_pending: false,
            stats: CallStats::new(),
        }
    }

    fn transition(&mut self, to: CallState, deferred: &mut Vec<Deferred>) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        if to.is_terminal() {
            self.stats.mark_ended();
        }
        deferred.push(Deferred::Notify(from, to));
    }

    /// Queue teardown of `dialog` unless it was already ended
    fn end_dialog(&mut self, dialog: DialogId, reason: DialogTermination, graceful: bool, deferred: &mut Vec<Deferred>) {
        if self.ended.insert(dialog.clone()) {
            deferred.push(Deferred::TerminateDialog(dialog, reason, graceful));
        }
    }

    /// Cancel the INVITE, or remember to once the sender has it
    fn request_cancel(&mut self, deferred: &mut Vec<Deferred>) {
        if self.sending_invite {
            self.cancel_pending = true;
        } else {
            deferred.push(Deferred::CancelSender);
        }
    }

    /// Hand every early dialog over for teardown, leaving the list empty
    fn teardown_early(&mut self, reason: DialogTermination, graceful: bool, deferred: &mut Vec<Deferred>) {
        let early: Vec<EarlyDialog> = self.early_dialogs.drain(..).collect();
        for e in early {
            self.end_dialog(e.dialog, reason, graceful, deferred);
        }
    }

    fn take_early(&mut self, dialog: &DialogId) -> Option<EarlyDialog> {
        let index = self.early_dialogs.iter().position(|e| &e.dialog == dialog)?;
        Some(self.early_dialogs.remove(index))
    }
}

/// Call aggregate root
pub struct Call {
    id: CallId,
    direction: CallDirection,
    local_uri: String,
    remote_uri: String,
    inner: Mutex<CallInner>,
    sender: Option<Arc<dyn RequestSender>>,
    responder: Option<Arc<dyn ResponseSender>>,
    dialogs: Arc<dyn DialogLayer>,
    events: EventBus<CallStateChanged>,
}

impl Call {
    /// Create an outbound call; `offer` is sent with the INVITE
    pub fn outbound(
        local_uri: impl Into<String>,
        remote_uri: impl Into<String>,
        offer: Option<String>,
        sender: Arc<dyn RequestSender>,
        dialogs: Arc<dyn DialogLayer>,
        events: EventBus<CallStateChanged>,
    ) -> Self {
        let direction = CallDirection::Outbound;
        counter!("sip_calls_total", "direction" => direction.as_str()).increment(1);
        Self {
            id: CallId::new(),
            direction,
            local_uri: local_uri.into(),
            remote_uri: remote_uri.into(),
            inner: Mutex::new(CallInner::new(CallState::initial(direction), offer, None)),
            sender: Some(sender),
            responder: None,
            dialogs,
            events,
        }
    }

    /// Create an inbound call for a received INVITE carrying `offer`
    pub fn inbound(
        local_uri: impl Into<String>,
        remote_uri: impl Into<String>,
        offer: Option<String>,
        responder: Arc<dyn ResponseSender>,
        dialogs: Arc<dyn DialogLayer>,
        events: EventBus<CallStateChanged>,
    ) -> Self {
        let direction = CallDirection::Inbound;
        counter!("sip_calls_total", "direction" => direction.as_str()).increment(1);
        Self {
            id: CallId::new(),
            direction,
            local_uri: local_uri.into(),
            remote_uri: remote_uri.into(),
            inner: Mutex::new(CallInner::new(CallState::initial(direction), None, offer)),
            sender: None,
            responder: Some(responder),
            dialogs,
            events,
        }
    }

    // Getters
    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn local_uri(&self) -> &str {
        &self.local_uri
    }

    pub fn remote_uri(&self) -> &str {
        &self.remote_uri
    }

    pub fn state(&self) -> CallState {
        self.lock().state
    }

    pub fn local_sdp(&self) -> Option<String> {
        self.lock().local_sdp.clone()
    }

    pub fn remote_sdp(&self) -> Option<String> {
        self.lock().remote_sdp.clone()
    }

    /// Early dialogs in creation order
    pub fn early_dialogs(&self) -> Vec<DialogId> {
        self.lock().early_dialogs.iter().map(|e| e.dialog.clone()).collect()
    }

    pub fn confirmed_dialog(&self) -> Option<DialogId> {
        self.lock().confirmed_dialog.clone()
    }

    pub fn stats(&self) -> CallStats {
        self.lock().stats.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == CallState::Disposed
    }

    /// Send the INVITE
    pub fn start(&self) -> Result<()> {
        let mut deferred = Vec::new();
        let (sender, request) = {
            let mut inner = self.lock();
            self.ensure_not_disposed(&inner)?;
            if inner.state != CallState::WaitingForStart {
                return Err(invalid_transition(inner.state, "start"));
            }
            let sender = self
                .sender
                .as_ref()
                .ok_or_else(|| DomainError::InvalidOperation("call has no request sender".to_string()))?;
            inner.transition(CallState::Calling, &mut deferred);
            inner.sending_invite = true;
            let request = InviteRequest {
                call_id: self.id,
                from: self.local_uri.clone(),
                to: self.remote_uri.clone(),
                sdp: inner.local_sdp.clone(),
            };
            (sender, request)
        };
        self.run(deferred);

        info!(call_id = %self.id, to = %self.remote_uri, "Sending INVITE");
        let sent = sender.start(&request);

        let mut deferred = Vec::new();
        {
            let mut inner = self.lock();
            inner.sending_invite = false;
            let cancel = std::mem::take(&mut inner.cancel_pending);
            match &sent {
                Err(e) => {
                    warn!(call_id = %self.id, "INVITE could not be sent: {}", e);
                    if inner.state.is_early() || inner.state == CallState::Terminating {
                        inner.teardown_early(DialogTermination::CallFailed, false, &mut deferred);
                        inner.transition(CallState::Terminated, &mut deferred);
                    }
                }
                // terminate or dispose ran while the INVITE was in flight
                Ok(()) if cancel => deferred.push(Deferred::CancelSender),
                Ok(()) => {}
            }
        }
        self.run(deferred);
        sent.map_err(Into::into)
    }

    /// Response to our INVITE, from any fork
    pub fn on_response(&self, response: CallResponse) -> Result<()> {
        let mut deferred = Vec::new();
        let result = {
            let mut inner = self.lock();
            self.handle_response(&mut inner, &response, &mut deferred)
        };
        self.run(deferred);
        result
    }

    /// The dialog layer ended one of our dialogs
    pub fn on_dialog_terminated(&self, dialog: &DialogId) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.lock();
            if inner.confirmed_dialog.as_ref() == Some(dialog) {
                inner.confirmed_dialog = None;
                if inner.state == CallState::Active {
                    info!(call_id = %self.id, dialog = %dialog, "Remote ended the call");
                    inner.transition(CallState::Terminated, &mut deferred);
                }
            } else if inner.take_early(dialog).is_some() {
                debug!(call_id = %self.id, dialog = %dialog, "Early dialog ended");
            }
        }
        self.run(deferred);
    }

    /// Answer an inbound call
    pub fn accept(&self, answer: Option<String>) -> Result<()> {
        let mut deferred = Vec::new();
        let result = {
            let mut inner = self.lock();
            self.accept_locked(&mut inner, answer, &mut deferred)
        };
        self.run(deferred);
        result
    }

    /// Refuse an inbound call with a final status of 300 or above
    pub fn reject(&self, status_code: u16) -> Result<()> {
        if !(300..700).contains(&status_code) {
            return Err(DomainError::InvalidOperation(format!(
                "{} is not a rejection status",
                status_code
            )));
        }

        let mut deferred = Vec::new();
        {
            let mut inner = self.lock();
            self.ensure_not_disposed(&inner)?;
            if inner.state != CallState::WaitingToAccept {
                return Err(invalid_transition(inner.state, "reject"));
            }
            self.responder()?.send_response(status_code, None)?;
            info!(call_id = %self.id, status_code, "Call rejected");
            inner.transition(CallState::Terminated, &mut deferred);
        }
        self.run(deferred);
        Ok(())
    }

    /// The caller sent CANCEL for our pending inbound INVITE
    pub fn on_cancel(&self) -> Result<()> {
        let mut deferred = Vec::new();
        {
            let mut inner = self.lock();
            match inner.state {
                CallState::WaitingToAccept => {
                    self.send_request_terminated();
                    info!(call_id = %self.id, "Call canceled by peer");
                    inner.transition(CallState::Terminated, &mut deferred);
                }
                CallState::Terminated | CallState::Disposed => {}
                other => return Err(invalid_transition(other, "cancel")),
            }
        }
        self.run(deferred);
        Ok(())
    }

    /// Hang up, cancel or refuse, whatever the call is doing
    ///
    /// Safe from any thread and state; repeated calls have no effect.
    pub fn terminate(&self) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.lock();
            match inner.state {
                CallState::WaitingForStart => {
                    inner.transition(CallState::Terminated, &mut deferred);
                }
                CallState::WaitingToAccept => {
                    self.send_request_terminated();
                    inner.transition(CallState::Terminated, &mut deferred);
                }
                CallState::Active => {
                    if let Some(dialog) = inner.confirmed_dialog.take() {
                        inner.end_dialog(dialog, DialogTermination::Hangup, true, &mut deferred);
                    }
                    inner.transition(CallState::Terminated, &mut deferred);
                }
                CallState::Calling | CallState::Ringing | CallState::Queued => {
                    inner.request_cancel(&mut deferred);
                    inner.transition(CallState::Terminating, &mut deferred);
                }
                CallState::Terminating | CallState::Terminated | CallState::Disposed => {
                    debug!(call_id = %self.id, state = %inner.state, "Terminate ignored");
                }
            }
        }
        self.run(deferred);
    }

    /// Release every resource held by the call
    ///
    /// Terminal and idempotent.
    pub fn dispose(&self) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.lock();
            match inner.state {
                CallState::Disposed => return,
                CallState::WaitingToAccept => self.send_request_terminated(),
                state if state.is_early() => inner.request_cancel(&mut deferred),
                _ => {}
            }
            inner.teardown_early(DialogTermination::Disposed, false, &mut deferred);
            if let Some(dialog) = inner.confirmed_dialog.take() {
                inner.end_dialog(dialog, DialogTermination::Disposed, true, &mut deferred);
            }
            inner.transition(CallState::Disposed, &mut deferred);
        }
        self.run(deferred);
        debug!(call_id = %self.id, "Call disposed");
    }

    fn handle_response(
        &self,
        inner: &mut CallInner,
        response: &CallResponse,
        deferred: &mut Vec<Deferred>,
    ) -> Result<()> {
        self.ensure_not_disposed(inner)?;
        if matches!(inner.state, CallState::WaitingForStart | CallState::WaitingToAccept) {
            return Err(invalid_transition(inner.state, "handle a response for"));
        }

        if response.is_provisional() {
            self.handle_provisional(inner, response, deferred)
        } else if response.is_success() {
            self.handle_success(inner, response, deferred)
        } else {
            self.handle_failure(inner, response, deferred);
            Ok(())
        }
    }

    fn handle_provisional(
        &self,
        inner: &mut CallInner,
        response: &CallResponse,
        deferred: &mut Vec<Deferred>,
    ) -> Result<()> {
        if !inner.state.is_early() && inner.state != CallState::Terminating {
            debug!(call_id = %self.id, state = %inner.state, "Ignoring late provisional response");
            return Ok(());
        }

        inner.stats.provisional_count += 1;

        // A tag we have not seen yet is a new fork
        if response.dialog_tag.is_some() {
            let dialog = self.dialogs.create_or_get_dialog(self.id, response)?;
            if let Some(early) = inner.early_dialogs.iter_mut().find(|e| e.dialog == dialog) {
                if early.sdp.is_none() {
                    early.sdp = response.sdp.clone();
                }
            } else if !inner.ended.contains(&dialog) {
                debug!(call_id = %self.id, dialog = %dialog, "Early dialog created");
                inner.early_dialogs.push(EarlyDialog {
                    dialog,
                    sdp: response.sdp.clone(),
                });
            }
        }

        if inner.state.is_early() {
            match response.status_code {
                180 => inner.transition(CallState::Ringing, deferred),
                182 => inner.transition(CallState::Queued, deferred),
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_success(
        &self,
        inner: &mut CallInner,
        response: &CallResponse,
        deferred: &mut Vec<Deferred>,
    ) -> Result<()> {
        let dialog = self.dialogs.create_or_get_dialog(self.id, response)?;

        match inner.state {
            state if state.is_early() => {
                let early_sdp = inner.take_early(&dialog).and_then(|e| e.sdp);
                inner.teardown_early(DialogTermination::ForkLost, true, deferred);
                info!(call_id = %self.id, dialog = %dialog, "Call answered");
                inner.remote_sdp = response.sdp.clone().or(early_sdp);
                inner.ended.remove(&dialog);
                inner.confirmed_dialog = Some(dialog);
                inner.stats.mark_answered();
                inner.transition(CallState::Active, deferred);
            }
            CallState::Terminating => {
                // Answered after our CANCEL crossed it; end the dialog right away
                info!(call_id = %self.id, dialog = %dialog, "Answer after cancel, ending dialog");
                inner.take_early(&dialog);
                inner.teardown_early(DialogTermination::ForkLost, true, deferred);
                inner.end_dialog(dialog, DialogTermination::Canceled, true, deferred);
                inner.transition(CallState::Terminated, deferred);
            }
            CallState::Active => {
                if inner.confirmed_dialog.as_ref() != Some(&dialog) {
                    warn!(call_id = %self.id, dialog = %dialog, "Second fork answered, ending it");
                    inner.end_dialog(dialog, DialogTermination::ForkLost, true, deferred);
                }
            }
            _ => {
                warn!(call_id = %self.id, dialog = %dialog, state = %inner.state, "Answer after call ended");
                inner.end_dialog(dialog, DialogTermination::Canceled, true, deferred);
            }
        }
        Ok(())
    }

    fn handle_failure(&self, inner: &mut CallInner, response: &CallResponse, deferred: &mut Vec<Deferred>) {
        let state = inner.state;
        if !state.is_early() && state != CallState::Terminating {
            debug!(call_id = %self.id, status = response.status_code, %state, "Ignoring late failure response");
            return;
        }

        if state.is_early() {
            info!(call_id = %self.id, status = response.status_code, "Call failed");
            counter!("sip_calls_failed", "reason" => response.status_code.to_string()).increment(1);
        }
        inner.teardown_early(DialogTermination::CallFailed, false, deferred);
        inner.transition(CallState::Terminated, deferred);
    }

    fn accept_locked(
        &self,
        inner: &mut CallInner,
        answer: Option<String>,
        deferred: &mut Vec<Deferred>,
    ) -> Result<()> {
        self.ensure_not_disposed(inner)?;
        if inner.state != CallState::WaitingToAccept {
            return Err(invalid_transition(inner.state, "accept"));
        }
        let responder = self.responder()?;

        let ok = CallResponse {
            status_code: 200,
            dialog_tag: None,
            sdp: answer.clone(),
        };
        let dialog = self.dialogs.create_or_get_dialog(self.id, &ok)?;
        if let Err(e) = responder.send_response(200, answer.clone()) {
            inner.end_dialog(dialog, DialogTermination::CallFailed, false, deferred);
            return Err(e.into());
        }

        info!(call_id = %self.id, dialog = %dialog, "Call accepted");
        inner.local_sdp = answer;
        inner.ended.remove(&dialog);
        inner.confirmed_dialog = Some(dialog);
        inner.stats.mark_answered();
        inner.transition(CallState::Active, deferred);
        Ok(())
    }

    fn send_request_terminated(&self) {
        if let Some(responder) = &self.responder {
            if let Err(e) = responder.send_response(REQUEST_TERMINATED, None) {
                warn!(call_id = %self.id, "Failed to send 487: {}", e);
            }
        }
    }

    fn responder(&self) -> Result<&Arc<dyn ResponseSender>> {
        self.responder
            .as_ref()
            .ok_or_else(|| DomainError::InvalidOperation("call has no response sender".to_string()))
    }

    fn ensure_not_disposed(&self, inner: &CallInner) -> Result<()> {
        if inner.state == CallState::Disposed {
            return Err(DomainError::InvalidOperation(format!("call {} is disposed", self.id)));
        }
        Ok(())
    }

    fn run(&self, deferred: Vec<Deferred>) {
        for action in deferred {
            match action {
                Deferred::CancelSender => {
                    if let Some(sender) = &self.sender {
                        info!(call_id = %self.id, "Canceling INVITE");
                        sender.cancel();
                    }
                }
                Deferred::TerminateDialog(dialog, reason, graceful) => {
                    debug!(call_id = %self.id, dialog = %dialog, reason = reason.as_str(), graceful, "Terminating dialog");
                    self.dialogs.terminate(&dialog, reason, graceful);
                }
                Deferred::Notify(previous, current) => {
                    debug!(call_id = %self.id, "Call state {} -> {}", previous, current);
                    self.events
                        .publish(CallStateChanged::new(self.id, self.direction, previous, current));
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("local_uri", &self.local_uri)
            .field("remote_uri", &self.remote_uri)
            .field("state", &self.state())
            .finish()
    }
}

fn invalid_transition(state: CallState, operation: &str) -> DomainError {
    DomainError::InvalidStateTransition(format!("cannot {} a call in state {}", operation, state))
}
