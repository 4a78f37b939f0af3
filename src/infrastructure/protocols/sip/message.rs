//! Structured REGISTER request/response types
//!
//! Parsing and serialization are done by the transaction layer; the
//! registrar only sees these already-decoded values.

use crate::domain::shared::value_objects::FlowRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The `*` contact used to remove all bindings
pub const STAR_CONTACT: &str = "*";

/// One Contact header entry of a REGISTER
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterContact {
    pub uri: String,
    /// `expires` contact parameter
    pub expires: Option<u32>,
}

impl RegisterContact {
    pub fn new(uri: impl Into<String>, expires: Option<u32>) -> Self {
        Self {
            uri: uri.into(),
            expires,
        }
    }

    pub fn star() -> Self {
        Self::new(STAR_CONTACT, None)
    }

    pub fn is_star(&self) -> bool {
        self.uri.trim() == STAR_CONTACT
    }
}

/// An authenticated REGISTER handed over by the transaction layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// To URI, the address-of-record being registered
    pub aor: String,
    pub contacts: Vec<RegisterContact>,
    /// Request-level `Expires` header
    pub expires: Option<u32>,
    pub call_id: String,
    pub cseq: u32,
    /// User name established by digest authentication
    pub authenticated_user: String,
    pub user_agent: Option<String>,
    /// Flow the request arrived on
    pub flow: Option<FlowRef>,
}

impl RegisterRequest {
    pub fn new(
        aor: impl Into<String>,
        call_id: impl Into<String>,
        cseq: u32,
        authenticated_user: impl Into<String>,
    ) -> Self {
        Self {
            aor: aor.into(),
            contacts: Vec::new(),
            expires: None,
            call_id: call_id.into(),
            cseq,
            authenticated_user: authenticated_user.into(),
            user_agent: None,
            flow: None,
        }
    }

    pub fn contact(mut self, uri: impl Into<String>, expires: Option<u32>) -> Self {
        self.contacts.push(RegisterContact::new(uri, expires));
        self
    }

    pub fn star(mut self) -> Self {
        self.contacts.push(RegisterContact::star());
        self
    }

    pub fn expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn flow(mut self, flow: FlowRef) -> Self {
        self.flow = Some(flow);
        self
    }

    /// A REGISTER without contacts only queries the current bindings
    pub fn is_query(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Final disposition of a REGISTER
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RegisterOutcome {
    Ok,
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    IntervalTooBrief { min_expires: u32 },
    ServerError(String),
}

impl RegisterOutcome {
    pub fn status_code(&self) -> u16 {
        match self {
            RegisterOutcome::Ok => 200,
            RegisterOutcome::BadRequest(_) => 400,
            RegisterOutcome::Forbidden(_) => 403,
            RegisterOutcome::NotFound(_) => 404,
            RegisterOutcome::IntervalTooBrief { .. } => 423,
            RegisterOutcome::ServerError(_) => 500,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self {
            RegisterOutcome::Ok => "OK",
            RegisterOutcome::BadRequest(_) => "Bad Request",
            RegisterOutcome::Forbidden(_) => "Forbidden",
            RegisterOutcome::NotFound(_) => "Not Found",
            RegisterOutcome::IntervalTooBrief { .. } => "Interval Too Brief",
            RegisterOutcome::ServerError(_) => "Server Internal Error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RegisterOutcome::Ok)
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            RegisterOutcome::Ok => "ok",
            RegisterOutcome::BadRequest(_) => "bad_request",
            RegisterOutcome::Forbidden(_) => "forbidden",
            RegisterOutcome::NotFound(_) => "not_found",
            RegisterOutcome::IntervalTooBrief { .. } => "interval_too_brief",
            RegisterOutcome::ServerError(_) => "server_error",
        }
    }
}

impl fmt::Display for RegisterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status_code(), self.reason_phrase())
    }
}

/// Contact echoed in a 200 OK with its remaining lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseContact {
    pub uri: String,
    pub expires: u32,
}

impl fmt::Display for ResponseContact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>;expires={}", self.uri, self.expires)
    }
}

/// Response to a REGISTER, ready for the transaction layer to serialize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub outcome: RegisterOutcome,
    pub contacts: Vec<ResponseContact>,
    /// `Min-Expires` header, present only on 423
    pub min_expires: Option<u32>,
    /// `Authentication-Info: nextnonce`, present only on success
    pub next_nonce: Option<String>,
}

impl RegisterResponse {
    pub fn ok(contacts: Vec<ResponseContact>, next_nonce: String) -> Self {
        Self {
            outcome: RegisterOutcome::Ok,
            contacts,
            min_expires: None,
            next_nonce: Some(next_nonce),
        }
    }

    pub fn rejected(outcome: RegisterOutcome) -> Self {
        let min_expires = match outcome {
            RegisterOutcome::IntervalTooBrief { min_expires } => Some(min_expires),
            _ => None,
        };
        Self {
            outcome,
            contacts: Vec::new(),
            min_expires,
            next_nonce: None,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.outcome.status_code()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn contact(&self, uri: &str) -> Option<&ResponseContact> {
        self.contacts.iter().find(|c| c.uri == uri)
    }
}
