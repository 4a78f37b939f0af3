//! Call registry
//!
//! Calls are owned here and addressed by `CallId`. Dialogs only know the id
//! of their call, resolved through the dialog index.

use crate::domain::call::aggregate::Call;
use crate::domain::call::collaborator::{DialogLayer, RequestSender, ResponseSender};
use crate::domain::call::event::CallStateChanged;
use crate::domain::call::value_object::CallResponse;
use crate::domain::shared::error::{DomainError, Result};
use crate::domain::shared::events::EventBus;
use crate::domain::shared::value_objects::{CallId, DialogId};
use metrics::gauge;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct CallRegistry {
    calls: RwLock<HashMap<CallId, Arc<Call>>>,
    dialog_index: RwLock<HashMap<DialogId, CallId>>,
    dialogs: Arc<dyn DialogLayer>,
    events: EventBus<CallStateChanged>,
}

impl CallRegistry {
    pub fn new(dialogs: Arc<dyn DialogLayer>) -> Self {
        Self::with_events(dialogs, EventBus::new())
    }

    pub fn with_events(dialogs: Arc<dyn DialogLayer>, events: EventBus<CallStateChanged>) -> Self {
        Self {
            calls: RwLock::new(HashMap::new()),
            dialog_index: RwLock::new(HashMap::new()),
            dialogs,
            events,
        }
    }

    /// State changes of every call in the registry
    pub fn subscribe(&self) -> broadcast::Receiver<CallStateChanged> {
        self.events.subscribe()
    }

    pub fn create_outbound(
        &self,
        local_uri: impl Into<String>,
        remote_uri: impl Into<String>,
        offer: Option<String>,
        sender: Arc<dyn RequestSender>,
    ) -> Arc<Call> {
        let call = Arc::new(Call::outbound(
            local_uri,
            remote_uri,
            offer,
            sender,
            self.dialogs.clone(),
            self.events.clone(),
        ));
        self.insert(call.clone());
        call
    }

    pub fn create_inbound(
        &self,
        local_uri: impl Into<String>,
        remote_uri: impl Into<String>,
        offer: Option<String>,
        responder: Arc<dyn ResponseSender>,
    ) -> Arc<Call> {
        let call = Arc::new(Call::inbound(
            local_uri,
            remote_uri,
            offer,
            responder,
            self.dialogs.clone(),
            self.events.clone(),
        ));
        self.insert(call.clone());
        call
    }

    pub fn get(&self, id: &CallId) -> Option<Arc<Call>> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Call owning `dialog`, if it is still registered
    pub fn find_by_dialog(&self, dialog: &DialogId) -> Option<Arc<Call>> {
        let id = *self
            .dialog_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dialog)?;
        self.get(&id)
    }

    /// Route a response to its call and index any dialog it produced
    pub fn dispatch_response(&self, id: &CallId, response: CallResponse) -> Result<()> {
        let call = self
            .get(id)
            .ok_or_else(|| DomainError::NotFound(format!("call {}", id)))?;

        call.on_response(response)?;
        self.index_dialogs(&call);
        Ok(())
    }

    /// Answer an inbound call and index the dialog the answer created
    pub fn accept(&self, id: &CallId, answer: Option<String>) -> Result<()> {
        let call = self
            .get(id)
            .ok_or_else(|| DomainError::NotFound(format!("call {}", id)))?;

        call.accept(answer)?;
        self.index_dialogs(&call);
        Ok(())
    }

    /// Deliver a dialog termination; returns false when no call owns it
    pub fn dispatch_dialog_terminated(&self, dialog: &DialogId) -> bool {
        let owner = self
            .dialog_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(dialog);

        match owner.and_then(|id| self.get(&id)) {
            Some(call) => {
                call.on_dialog_terminated(dialog);
                true
            }
            None => {
                debug!(dialog = %dialog, "Termination for unknown dialog");
                false
            }
        }
    }

    /// Dispose a call and drop it from the registry
    pub fn dispose(&self, id: &CallId) -> Option<Arc<Call>> {
        let call = self
            .calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)?;

        self.dialog_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, owner| owner != id);

        call.dispose();
        gauge!("sip_active_calls").decrement(1.0);
        info!(call_id = %id, "Call removed");
        Some(call)
    }

    pub fn len(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index_dialogs(&self, call: &Call) {
        let mut index = self.dialog_index.write().unwrap_or_else(PoisonError::into_inner);
        for dialog in call.early_dialogs().into_iter().chain(call.confirmed_dialog()) {
            index.entry(dialog).or_insert(*call.id());
        }
    }

    fn insert(&self, call: Arc<Call>) {
        debug!(call_id = %call.id(), direction = call.direction().as_str(), "Call registered");
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*call.id(), call);
        gauge!("sip_active_calls").increment(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::collaborator::{MockDialogLayer, MockRequestSender, MockResponseSender};
    use crate::domain::call::value_object::{CallState, DialogTermination};

    fn dialogs() -> MockDialogLayer {
        let mut dialogs = MockDialogLayer::new();
        dialogs
            .expect_create_or_get_dialog()
            .returning(|_, r| Ok(DialogId::new(r.dialog_tag.clone().unwrap_or_default())));
        dialogs.expect_terminate().return_const(());
        dialogs
    }

    fn sender() -> Arc<MockRequestSender> {
        let mut sender = MockRequestSender::new();
        sender.expect_start().returning(|_| Ok(()));
        sender.expect_cancel().return_const(());
        Arc::new(sender)
    }

    #[test]
    fn test_dispatch_indexes_dialogs() {
        let registry = CallRegistry::new(Arc::new(dialogs()));
        let call = registry.create_outbound("sip:a@x", "sip:b@x", None, sender());
        call.start().unwrap();
        assert_eq!(registry.len(), 1);

        registry
            .dispatch_response(call.id(), CallResponse::new(200, Some("t1"), None))
            .unwrap();
        let found = registry.find_by_dialog(&DialogId::new("t1")).unwrap();
        assert_eq!(found.id(), call.id());

        assert!(registry.dispatch_dialog_terminated(&DialogId::new("t1")));
        assert_eq!(call.state(), CallState::Terminated);
        assert!(!registry.dispatch_dialog_terminated(&DialogId::new("t1")));
    }

    #[test]
    fn test_accept_indexes_uas_dialog() {
        let mut responder = MockResponseSender::new();
        responder.expect_send_response().times(1).returning(|_, _| Ok(()));
        let registry = CallRegistry::new(Arc::new(dialogs()));
        let call = registry.create_inbound("sip:b@x", "sip:a@x", None, Arc::new(responder));

        registry.accept(call.id(), Some("v=0".to_string())).unwrap();
        assert_eq!(call.state(), CallState::Active);
        let found = registry.find_by_dialog(&DialogId::new("")).unwrap();
        assert_eq!(found.id(), call.id());

        assert!(registry.dispatch_dialog_terminated(&DialogId::new("")));
        assert_eq!(call.state(), CallState::Terminated);

        let missing = registry.accept(&CallId::new(), None);
        assert!(matches!(missing, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn test_dispatch_to_unknown_call() {
        let registry = CallRegistry::new(Arc::new(dialogs()));
        let result = registry.dispatch_response(&CallId::new(), CallResponse::new(180, None, None));
        assert!(matches!(result, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn test_dispose_removes_call_and_index() {
        let mut layer = MockDialogLayer::new();
        layer
            .expect_create_or_get_dialog()
            .returning(|_, r| Ok(DialogId::new(r.dialog_tag.clone().unwrap_or_default())));
        layer
            .expect_terminate()
            .withf(|_, reason: &DialogTermination, _| *reason == DialogTermination::Disposed)
            .times(1)
            .return_const(());
        let registry = CallRegistry::new(Arc::new(layer));
        let call = registry.create_outbound("sip:a@x", "sip:b@x", None, sender());
        call.start().unwrap();
        registry
            .dispatch_response(call.id(), CallResponse::new(183, Some("e1"), None))
            .unwrap();

        let disposed = registry.dispose(call.id()).unwrap();
        assert!(disposed.is_disposed());
        assert!(registry.is_empty());
        assert!(registry.find_by_dialog(&DialogId::new("e1")).is_none());
        assert!(registry.dispose(call.id()).is_none());
    }
}
