//! Credential verification seam for the session handshake.
//!
//! The gateway exchanges the client's bearer token for a [`Principal`] once
//! per connection. Verification is the only suspension point that blocks
//! connection acceptance.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use boardcast_proto::task::UserId;
use tokio::sync::RwLock;

/// The authenticated identity behind a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// The user this credential belongs to.
    pub user_id: UserId,
}

/// Errors from credential verification.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token is not recognised.
    #[error("unknown credential")]
    UnknownToken,
    /// The token was valid once but its acceptance window has passed.
    #[error("credential expired")]
    Expired,
    /// The verifier backend could not serve the request.
    #[error("verifier unavailable: {0}")]
    Unavailable(String),
}

/// Token-to-principal exchange, implemented by the external credential
/// system.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verifies a bearer token, returning the principal it identifies.
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

struct IssuedToken {
    user_id: UserId,
    issued_at: Instant,
}

/// In-memory verifier holding pre-issued tokens with a TTL, for tests and
/// the dev binary.
pub struct StaticTokenVerifier {
    ttl: Duration,
    tokens: RwLock<HashMap<String, IssuedToken>>,
}

impl StaticTokenVerifier {
    /// Creates a verifier with the given token acceptance window.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Issues a token for a user, valid for the configured TTL.
    pub async fn issue(&self, token: impl Into<String>, user_id: UserId) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(
            token.into(),
            IssuedToken {
                user_id,
                issued_at: Instant::now(),
            },
        );
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let tokens = self.tokens.read().await;
        let issued = tokens.get(token).ok_or(AuthError::UnknownToken)?;
        if issued.issued_at.elapsed() > self.ttl {
            return Err(AuthError::Expired);
        }
        Ok(Principal {
            user_id: issued.user_id.clone(),
        })
    }
}
