//! Delegated sign-in. The provider's own protocol is out of our hands; all
//! the core sees is a grant or an error.

use async_trait::async_trait;
use shared::protocol::AuthorizationGrant;

use crate::error::ClientError;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self) -> Result<AuthorizationGrant, ClientError>;
}

/// Used when no delegated flow is wired in.
pub struct MissingIdentityProvider;

#[async_trait]
impl IdentityProvider for MissingIdentityProvider {
    async fn sign_in(&self) -> Result<AuthorizationGrant, ClientError> {
        Err(ClientError::Identity(
            "delegated sign-in is unavailable in this build".into(),
        ))
    }
}

/// Hands out a grant obtained elsewhere, e.g. pasted on the command line.
pub struct StaticIdentityProvider {
    grant: AuthorizationGrant,
}

impl StaticIdentityProvider {
    pub fn new(grant: AuthorizationGrant) -> Self {
        Self { grant }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn sign_in(&self) -> Result<AuthorizationGrant, ClientError> {
        Ok(self.grant.clone())
    }
}
