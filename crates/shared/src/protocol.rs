use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Identity;

/// Opaque token produced by the delegated identity provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationArtifact(pub String);

impl std::fmt::Debug for AuthorizationArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthorizationArtifact(..)")
    }
}

/// Result of a successful delegated sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationGrant {
    pub identity: Identity,
    pub artifact: AuthorizationArtifact,
}

/// Access credential attached to every item call.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

impl Credential {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("identity", &self.identity)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialExchangeRequest {
    pub authorization_code: AuthorizationArtifact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCredentialRequest {
    pub test_credential: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialExchangeResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

impl From<CredentialExchangeResponse> for Credential {
    fn from(value: CredentialExchangeResponse) -> Self {
        Self {
            access_token: value.access_token,
            expires_at: value.expires_at,
            identity: value.identity,
        }
    }
}
