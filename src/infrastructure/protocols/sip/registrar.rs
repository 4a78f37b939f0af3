//! SIP Registrar - manages endpoint registrations (RFC 3261 §10.3)

use super::auth::Authenticator;
use super::message::{RegisterContact, RegisterOutcome, RegisterRequest, RegisterResponse, ResponseContact};
use crate::config::RegistrarConfig;
use crate::domain::registration::{
    Binding, Registration, RegistrationEvent, RegistrationStore, StoreUpdate, UnregisterReason,
};
use crate::domain::shared::events::EventBus;
use crate::domain::shared::value_objects::Aor;
use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Why a REGISTER was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Domain not served: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Expiry below minimum of {min_expires}s")]
    IntervalTooBrief { min_expires: u32 },

    #[error("Commit failed: {0}")]
    Commit(String),
}

impl From<RegisterError> for RegisterOutcome {
    fn from(err: RegisterError) -> Self {
        match err {
            RegisterError::NotFound(msg) => RegisterOutcome::NotFound(msg),
            RegisterError::Forbidden(msg) => RegisterOutcome::Forbidden(msg),
            RegisterError::BadRequest(msg) => RegisterOutcome::BadRequest(msg),
            RegisterError::IntervalTooBrief { min_expires } => {
                RegisterOutcome::IntervalTooBrief { min_expires }
            }
            RegisterError::Commit(msg) => RegisterOutcome::ServerError(msg),
        }
    }
}

/// Validated change to one contact
#[derive(Debug)]
enum ContactAction {
    Remove(String),
    Bind(Binding),
}

/// REGISTER processor backed by a shared [`RegistrationStore`]
pub struct Registrar {
    store: Arc<RegistrationStore>,
    auth: Arc<dyn Authenticator>,
    events: EventBus<RegistrationEvent>,
    config: RegistrarConfig,
}

impl Registrar {
    pub fn new(
        store: Arc<RegistrationStore>,
        auth: Arc<dyn Authenticator>,
        config: RegistrarConfig,
    ) -> Self {
        Self {
            store,
            auth,
            events: EventBus::new(),
            config,
        }
    }

    /// Publish events on an existing bus, e.g. one shared with the sweeper
    pub fn with_events(mut self, events: EventBus<RegistrationEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<RegistrationStore> {
        &self.store
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    /// Effective expiry of one contact
    ///
    /// Contact parameter first, then the request `Expires`, then the
    /// configured default. Zero always means removal; other values above
    /// the maximum are clamped.
    pub fn effective_expires(&self, contact: &RegisterContact, request_expires: Option<u32>) -> u32 {
        match contact.expires.or(request_expires) {
            Some(0) => 0,
            Some(expires) => expires.min(self.config.max_expires),
            None => self.config.default_expires,
        }
    }

    /// Live contacts of an AOR, for routing
    pub async fn lookup(&self, aor: &str) -> Vec<Binding> {
        match Aor::parse(aor) {
            Ok(aor) => self.store.lookup(&aor, Utc::now()).await,
            Err(_) => Vec::new(),
        }
    }

    /// Handle an authenticated REGISTER
    ///
    /// Every failure is turned into a rejection response; the store is
    /// only modified when the whole request validates.
    pub async fn process_register(&self, request: RegisterRequest) -> RegisterResponse {
        debug!(
            aor = %request.aor,
            call_id = %request.call_id,
            cseq = request.cseq,
            contacts = request.contacts.len(),
            "Handling REGISTER request"
        );

        let response = match self.try_register(&request).await {
            Ok(contacts) => {
                let nonce = self.auth.create_nonce().await;
                RegisterResponse::ok(contacts, nonce)
            }
            Err(err) => {
                warn!(aor = %request.aor, user = %request.authenticated_user, "REGISTER rejected: {}", err);
                RegisterResponse::rejected(err.into())
            }
        };

        counter!("sip_registrations_total", "outcome" => response.outcome.label()).increment(1);
        response
    }

    async fn try_register(&self, request: &RegisterRequest) -> Result<Vec<ResponseContact>, RegisterError> {
        let aor = Aor::parse(&request.aor).map_err(RegisterError::BadRequest)?;

        if !self.config.serves_domain(aor.host()) {
            return Err(RegisterError::NotFound(aor.host().to_string()));
        }

        if !self.auth.authorize(&request.authenticated_user, &aor).await {
            return Err(RegisterError::Forbidden(format!(
                "{} may not modify {}",
                request.authenticated_user, aor
            )));
        }

        let now = Utc::now();

        if request.is_query() {
            let contacts = self
                .store
                .get(&aor)
                .await
                .map(|r| Self::response_contacts(&r, now))
                .unwrap_or_default();
            return Ok(contacts);
        }

        let user = request.authenticated_user.as_str();
        let update = self
            .store
            .update(&aor, user, |registration| {
                let actions = self.plan(registration, request, now)?;
                self.apply(registration, actions)?;
                registration.set_owner(user);
                Ok(())
            })
            .await?;

        let contacts = Self::response_contacts(&update.current, now);
        self.publish(&update);
        Ok(contacts)
    }

    /// Validate the request against the stored bindings
    ///
    /// Nothing is modified here; the returned actions are applied only
    /// once every contact has passed.
    fn plan(
        &self,
        registration: &Registration,
        request: &RegisterRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContactAction>, RegisterError> {
        if request.contacts.iter().any(RegisterContact::is_star) {
            return self.plan_star(registration, request);
        }

        let mut actions = Vec::with_capacity(request.contacts.len());
        for contact in &request.contacts {
            let expires = self.effective_expires(contact, request.expires);

            if expires != 0 && expires < self.config.min_expires {
                return Err(RegisterError::IntervalTooBrief {
                    min_expires: self.config.min_expires,
                });
            }

            if let Some(existing) = registration.binding(&contact.uri) {
                if existing.call_id == request.call_id && request.cseq <= existing.cseq {
                    return Err(RegisterError::BadRequest(format!(
                        "CSeq {} not above {} for {}",
                        request.cseq, existing.cseq, contact.uri
                    )));
                }
            }

            if expires == 0 {
                actions.push(ContactAction::Remove(contact.uri.clone()));
            } else {
                let expires_at = now
                    .checked_add_signed(Duration::seconds(i64::from(expires)))
                    .ok_or_else(|| RegisterError::Commit(format!("expiry overflow for {}", contact.uri)))?;
                let binding = Binding::new(contact.uri.clone(), request.call_id.clone(), request.cseq, expires_at)
                    .with_flow(request.flow.clone())
                    .with_user_agent(request.user_agent.clone());
                actions.push(ContactAction::Bind(binding));
            }
        }

        Ok(actions)
    }

    /// `Contact: *` removes every binding the request is allowed to override
    fn plan_star(
        &self,
        registration: &Registration,
        request: &RegisterRequest,
    ) -> Result<Vec<ContactAction>, RegisterError> {
        if request.contacts.len() != 1 {
            return Err(RegisterError::BadRequest(
                "'*' contact must be the only contact".to_string(),
            ));
        }
        if self.effective_expires(&request.contacts[0], request.expires) != 0 {
            return Err(RegisterError::BadRequest(
                "'*' contact requires expires of 0".to_string(),
            ));
        }

        let mut actions = Vec::with_capacity(registration.len());
        for binding in registration.bindings() {
            if binding.call_id == request.call_id && request.cseq <= binding.cseq {
                return Err(RegisterError::BadRequest(format!(
                    "CSeq {} not above {} for {}",
                    request.cseq, binding.cseq, binding.contact_uri
                )));
            }
            actions.push(ContactAction::Remove(binding.contact_uri.clone()));
        }
        Ok(actions)
    }

    fn apply(&self, registration: &mut Registration, actions: Vec<ContactAction>) -> Result<(), RegisterError> {
        for action in actions {
            match action {
                ContactAction::Remove(contact) => {
                    if registration.remove_binding(&contact).is_some() {
                        info!(aor = %registration.aor(), contact = %contact, "Unregistered contact");
                    }
                }
                ContactAction::Bind(binding) => {
                    info!(
                        aor = %registration.aor(),
                        contact = %binding.contact_uri,
                        expires_at = %binding.expires_at,
                        "Registered contact"
                    );
                    registration.upsert_binding(binding);
                }
            }
        }

        if registration.len() > self.config.max_bindings_per_aor {
            return Err(RegisterError::Commit(format!(
                "{} would hold {} bindings, limit is {}",
                registration.aor(),
                registration.len(),
                self.config.max_bindings_per_aor
            )));
        }
        Ok(())
    }

    fn response_contacts(registration: &Registration, now: DateTime<Utc>) -> Vec<ResponseContact> {
        registration
            .advertised_bindings(now)
            .into_iter()
            .map(|b| ResponseContact {
                uri: b.contact_uri.clone(),
                expires: u32::try_from(b.ttl_seconds(now)).unwrap_or(u32::MAX),
            })
            .collect()
    }

    fn publish(&self, update: &StoreUpdate) {
        match (&update.previous, update.is_retained()) {
            (None, true) => {
                info!(aor = %update.current.aor(), "AOR registered");
                self.events.publish(RegistrationEvent::registered(update.current.clone()));
                gauge!("sip_registered_aors").increment(1.0);
            }
            (Some(previous), retained) => {
                self.events.publish(RegistrationEvent::updated(update.current.clone()));
                if !retained {
                    info!(aor = %previous.aor(), "AOR unregistered");
                    self.events.publish(RegistrationEvent::unregistered(
                        previous.clone(),
                        UnregisterReason::Removed,
                    ));
                    gauge!("sip_registered_aors").decrement(1.0);
                }
            }
            (None, false) => {}
        }
    }
}
