//! Call State Machine Integration Tests

use sip_registrar::domain::call::{
    CallRegistry, CallResponse, CallState, CollaboratorError, DialogLayer, DialogTermination,
    InviteRequest, RequestSender, ResponseSender,
};
use sip_registrar::domain::shared::value_objects::{CallId, DialogId};
use std::sync::{mpsc, Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

#[derive(Default)]
struct RecordingSender {
    invites: Mutex<Vec<InviteRequest>>,
    cancels: Mutex<usize>,
}

impl RequestSender for RecordingSender {
    fn start(&self, request: &InviteRequest) -> Result<(), CollaboratorError> {
        self.invites.lock().unwrap().push(request.clone());
        Ok(())
    }

    fn cancel(&self) {
        *self.cancels.lock().unwrap() += 1;
    }
}

/// Holds `start` until the test releases it
struct BlockingSender {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
    cancels: Mutex<usize>,
}

impl BlockingSender {
    fn new() -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let sender = Arc::new(Self {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            cancels: Mutex::new(0),
        });
        (sender, entered_rx, release_tx)
    }
}

impl RequestSender for BlockingSender {
    fn start(&self, _request: &InviteRequest) -> Result<(), CollaboratorError> {
        self.entered.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(())
    }

    fn cancel(&self) {
        *self.cancels.lock().unwrap() += 1;
    }
}

#[derive(Default)]
struct RecordingResponder {
    sent: Mutex<Vec<(u16, Option<String>)>>,
}

impl ResponseSender for RecordingResponder {
    fn send_response(&self, status_code: u16, sdp: Option<String>) -> Result<(), CollaboratorError> {
        self.sent.lock().unwrap().push((status_code, sdp));
        Ok(())
    }
}

/// Dialog ids are the branch tag; the UAS side gets a fixed id
#[derive(Default)]
struct RecordingDialogs {
    terminated: Mutex<Vec<(DialogId, DialogTermination, bool)>>,
}

impl DialogLayer for RecordingDialogs {
    fn create_or_get_dialog(&self, _call_id: CallId, response: &CallResponse) -> Result<DialogId, CollaboratorError> {
        Ok(DialogId::new(response.dialog_tag.clone().unwrap_or_else(|| "uas".to_string())))
    }

    fn terminate(&self, dialog: &DialogId, reason: DialogTermination, graceful: bool) {
        self.terminated.lock().unwrap().push((dialog.clone(), reason, graceful));
    }
}

fn registry() -> (CallRegistry, Arc<RecordingDialogs>) {
    let dialogs = Arc::new(RecordingDialogs::default());
    (CallRegistry::new(dialogs.clone()), dialogs)
}

#[test]
fn test_forked_invite_resolves_to_first_answer() {
    let (registry, dialogs) = registry();
    let sender = Arc::new(RecordingSender::default());
    let call = registry.create_outbound(
        "sip:alice@example.com",
        "sip:bob@example.com",
        Some("v=0 offer".to_string()),
        sender.clone(),
    );
    let id = *call.id();

    assert_ok!(call.start());
    assert_eq!(call.state(), CallState::Calling);
    assert_eq!(sender.invites.lock().unwrap().len(), 1);

    registry.dispatch_response(&id, CallResponse::new(180, Some("fork-a"), None)).unwrap();
    registry.dispatch_response(&id, CallResponse::new(180, Some("fork-b"), None)).unwrap();
    assert_eq!(call.state(), CallState::Ringing);
    assert_eq!(call.early_dialogs(), vec![DialogId::new("fork-a"), DialogId::new("fork-b")]);

    registry
        .dispatch_response(&id, CallResponse::new(200, Some("fork-a"), Some("v=0 answer")))
        .unwrap();

    assert_eq!(call.state(), CallState::Active);
    assert_eq!(call.confirmed_dialog(), Some(DialogId::new("fork-a")));
    assert_eq!(call.remote_sdp().as_deref(), Some("v=0 answer"));
    assert_eq!(
        *dialogs.terminated.lock().unwrap(),
        vec![(DialogId::new("fork-b"), DialogTermination::ForkLost, true)]
    );
}

#[test]
fn test_terminate_during_calling_cancels_then_completes() {
    let (registry, dialogs) = registry();
    let sender = Arc::new(RecordingSender::default());
    let call = registry.create_outbound("sip:alice@example.com", "sip:bob@example.com", None, sender.clone());
    let mut events = registry.subscribe();
    let id = *call.id();

    assert_ok!(call.start());
    call.terminate();

    assert_eq!(call.state(), CallState::Terminating);
    assert_eq!(*sender.cancels.lock().unwrap(), 1);

    registry.dispatch_response(&id, CallResponse::new(487, None, None)).unwrap();
    assert_eq!(call.state(), CallState::Terminated);
    assert!(dialogs.terminated.lock().unwrap().is_empty());

    let transitions: Vec<(CallState, CallState)> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| (e.previous, e.current))
        .collect();
    assert_eq!(
        transitions,
        vec![
            (CallState::WaitingForStart, CallState::Calling),
            (CallState::Calling, CallState::Terminating),
            (CallState::Terminating, CallState::Terminated),
        ]
    );
}

#[test]
fn test_terminate_while_invite_in_flight_cancels_after_send() {
    let (registry, _) = registry();
    let (sender, entered, release) = BlockingSender::new();
    let call = registry.create_outbound("sip:alice@example.com", "sip:bob@example.com", None, sender.clone());

    let starter = {
        let call = call.clone();
        std::thread::spawn(move || call.start())
    };
    entered.recv().unwrap();

    // No transaction exists to cancel yet
    call.terminate();
    assert_eq!(call.state(), CallState::Terminating);
    assert_eq!(*sender.cancels.lock().unwrap(), 0);

    release.send(()).unwrap();
    assert_ok!(starter.join().unwrap());
    assert_eq!(*sender.cancels.lock().unwrap(), 1);
    assert_eq!(call.state(), CallState::Terminating);
}

#[test]
fn test_concurrent_fork_answers_confirm_one_dialog() {
    let (registry, dialogs) = registry();
    let registry = Arc::new(registry);
    let call = registry.create_outbound(
        "sip:alice@example.com",
        "sip:bob@example.com",
        None,
        Arc::new(RecordingSender::default()),
    );
    let id = *call.id();
    assert_ok!(call.start());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                let tag = format!("fork-{}", i);
                registry.dispatch_response(&id, CallResponse::new(183, Some(&tag), None)).unwrap();
                registry.dispatch_response(&id, CallResponse::new(200, Some(&tag), None)).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(call.state(), CallState::Active);
    let winner = call.confirmed_dialog().expect("one branch won");
    assert!(call.early_dialogs().is_empty());

    // Every losing branch is ended once, none of them as a failure
    let terminated = dialogs.terminated.lock().unwrap();
    assert_eq!(terminated.len(), 3);
    assert!(terminated.iter().all(|(d, reason, _)| *d != winner && *reason == DialogTermination::ForkLost));
    for i in 0..4 {
        let dialog = DialogId::new(format!("fork-{}", i));
        if dialog != winner {
            assert!(terminated.iter().any(|(d, _, _)| *d == dialog));
        }
    }
}

#[test]
fn test_inbound_accept_then_remote_hangup() {
    let (registry, _) = registry();
    let responder = Arc::new(RecordingResponder::default());
    let call = registry.create_inbound(
        "sip:bob@example.com",
        "sip:alice@example.com",
        Some("v=0 offer".to_string()),
        responder.clone(),
    );
    let id = *call.id();

    assert_ok!(registry.accept(&id, Some("v=0 answer".to_string())));
    assert_eq!(call.state(), CallState::Active);
    assert_eq!(
        *responder.sent.lock().unwrap(),
        vec![(200, Some("v=0 answer".to_string()))]
    );
    assert_eq!(registry.find_by_dialog(&DialogId::new("uas")).map(|c| *c.id()), Some(id));

    // The BYE reaches the call through the dialog index
    assert!(registry.dispatch_dialog_terminated(&DialogId::new("uas")));
    assert_eq!(call.state(), CallState::Terminated);
    assert!(call.stats().call_duration().is_some());
}

#[test]
fn test_dispose_drops_call_from_registry() {
    let (registry, dialogs) = registry();
    let call = registry.create_outbound(
        "sip:alice@example.com",
        "sip:bob@example.com",
        None,
        Arc::new(RecordingSender::default()),
    );
    let id = *call.id();
    assert_ok!(call.start());
    registry.dispatch_response(&id, CallResponse::new(200, Some("t"), None)).unwrap();

    registry.dispose(&id).unwrap();

    assert!(registry.get(&id).is_none());
    assert!(call.is_disposed());
    let err = assert_err!(call.accept(None));
    assert!(err.is_state_error());
    assert_eq!(
        *dialogs.terminated.lock().unwrap(),
        vec![(DialogId::new("t"), DialogTermination::Disposed, true)]
    );
}
