//! Registration binding

use crate::domain::shared::value_objects::FlowRef;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One contact registered under an address-of-record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Contact URI, compared by value
    pub contact_uri: String,
    /// Call-ID of the REGISTER that created or last refreshed the binding
    pub call_id: String,
    /// CSeq of that REGISTER
    pub cseq: u32,
    /// Expiration time
    pub expires_at: DateTime<Utc>,
    /// When the binding was last refreshed
    pub registered_at: DateTime<Utc>,
    /// Flow the contact was learned on; `None` opens a new flow on use
    pub flow: Option<FlowRef>,
    /// User Agent
    pub user_agent: Option<String>,
}

impl Binding {
    pub fn new(
        contact_uri: impl Into<String>,
        call_id: impl Into<String>,
        cseq: u32,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            contact_uri: contact_uri.into(),
            call_id: call_id.into(),
            cseq,
            expires_at,
            registered_at: Utc::now(),
            flow: None,
            user_agent: None,
        }
    }

    pub fn with_flow(mut self, flow: Option<FlowRef>) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime in whole seconds, never negative
    pub fn ttl_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.remaining(now).num_seconds().max(0)
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether the binding is still worth advertising in a 200 OK
    ///
    /// Bindings with one second or less left are treated as gone.
    pub fn is_advertisable(&self, now: DateTime<Utc>) -> bool {
        self.ttl_seconds(now) > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_counts_down() {
        let now = Utc::now();
        let binding = Binding::new("sip:alice@10.0.0.1", "call-1", 1, now + Duration::seconds(90));

        assert_eq!(binding.ttl_seconds(now), 90);
        assert_eq!(binding.ttl_seconds(now + Duration::seconds(30)), 60);
        assert!(!binding.is_expired_at(now));
        assert!(binding.is_expired_at(now + Duration::seconds(90)));
        assert_eq!(binding.ttl_seconds(now + Duration::seconds(120)), 0);
    }

    #[test]
    fn test_nearly_expired_binding_is_not_advertised() {
        let now = Utc::now();
        let binding = Binding::new("sip:alice@10.0.0.1", "call-1", 1, now + Duration::seconds(1));
        assert!(!binding.is_expired_at(now));
        assert!(!binding.is_advertisable(now));

        let fresh = Binding::new("sip:alice@10.0.0.1", "call-1", 1, now + Duration::seconds(2));
        assert!(fresh.is_advertisable(now));
    }

    #[test]
    fn test_builder_fields() {
        let binding = Binding::new("sip:bob@10.0.0.2", "call-2", 7, Utc::now())
            .with_flow(Some(FlowRef::new("udp:10.0.0.2:5060")))
            .with_user_agent(Some("softphone/1.0".to_string()));

        assert_eq!(binding.flow.as_ref().map(FlowRef::as_str), Some("udp:10.0.0.2:5060"));
        assert_eq!(binding.user_agent.as_deref(), Some("softphone/1.0"));
        assert_eq!(binding.cseq, 7);
    }
}
