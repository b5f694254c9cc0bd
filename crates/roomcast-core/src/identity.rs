//! Identity resolution collaborator interface.
//!
//! Token issuance and verification live outside this subsystem. The gateway
//! only needs to turn an access token into a user identity before any
//! protocol traffic is accepted.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::message::UserIdentity;

/// Resolves an access token to a user identity.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    /// Resolve a token. `None` means the connection must be refused.
    async fn resolve(&self, token: &str) -> Option<UserIdentity>;
}

/// In-memory token table for the demo binary and tests.
#[derive(Debug, Default)]
pub struct MemoryTokens {
    tokens: DashMap<String, UserIdentity>,
}

impl MemoryTokens {
    /// Create an empty token table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user.
    pub fn insert(&self, token: impl Into<String>, user: UserIdentity) {
        self.tokens.insert(token.into(), user);
    }

    /// Number of registered tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if no tokens are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenResolver for MemoryTokens {
    async fn resolve(&self, token: &str) -> Option<UserIdentity> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }
}
