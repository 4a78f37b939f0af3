//! Authorization and nonce issuing for the registrar
//!
//! Digest verification happens before a request reaches the registrar;
//! what is left here is deciding whether the authenticated user may touch
//! an AOR and minting the `nextnonce` for the client's next request.

use crate::domain::shared::value_objects::Aor;
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Registrar-facing auth collaborator
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Whether `user` may add or remove bindings of `aor`
    async fn authorize(&self, user: &str, aor: &Aor) -> bool;

    /// Fresh opaque nonce for `Authentication-Info`
    async fn create_nonce(&self) -> String;
}

/// Default policy: users manage their own AOR, admins manage any
pub struct DigestNonceAuthenticator {
    admins: HashSet<String>,
    issued: AtomicU64,
}

impl DigestNonceAuthenticator {
    pub fn new() -> Self {
        Self {
            admins: HashSet::new(),
            issued: AtomicU64::new(0),
        }
    }

    pub fn with_admins<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
            issued: AtomicU64::new(0),
        }
    }

    /// Number of nonces handed out so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    fn generate_nonce() -> String {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; 16] = rng.gen();
        hex::encode(random_bytes)
    }
}

impl Default for DigestNonceAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for DigestNonceAuthenticator {
    async fn authorize(&self, user: &str, aor: &Aor) -> bool {
        if self.admins.contains(user) {
            debug!(user, aor = %aor, "Admin authorized for AOR");
            return true;
        }
        aor.user().eq_ignore_ascii_case(user)
    }

    async fn create_nonce(&self) -> String {
        self.issued.fetch_add(1, Ordering::Relaxed);
        Self::generate_nonce()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_may_register_own_aor_only() {
        let auth = DigestNonceAuthenticator::new();
        let alice = Aor::parse("sip:alice@example.com").unwrap();

        assert!(auth.authorize("alice", &alice).await);
        assert!(auth.authorize("ALICE", &alice).await);
        assert!(!auth.authorize("mallory", &alice).await);
    }

    #[tokio::test]
    async fn test_admin_may_register_any_aor() {
        let auth = DigestNonceAuthenticator::with_admins(["ops"]);
        let alice = Aor::parse("sip:alice@example.com").unwrap();
        assert!(auth.authorize("ops", &alice).await);
    }

    #[tokio::test]
    async fn test_nonces_are_fresh_hex() {
        let auth = DigestNonceAuthenticator::new();
        let first = auth.create_nonce().await;
        let second = auth.create_nonce().await;

        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
        assert_eq!(auth.issued(), 2);
    }
}
