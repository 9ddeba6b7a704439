//! Backend Gateway: remote CRUD for items plus credential exchange.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use shared::{
    domain::{Item, ItemDraft, ItemId},
    error::{ApiError, ApiException},
    protocol::{
        AuthorizationArtifact, Credential, CredentialExchangeRequest, CredentialExchangeResponse,
        TestCredentialRequest,
    },
};
use tracing::{debug, info};

use crate::{credentials::CredentialStore, error::ClientError};

#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Item>, ClientError>;
    async fn create(&self, draft: &ItemDraft) -> Result<Item, ClientError>;
    async fn update(&self, item: &Item) -> Result<Item, ClientError>;
    async fn delete(&self, id: &ItemId) -> Result<(), ClientError>;
    async fn exchange_credential(
        &self,
        artifact: &AuthorizationArtifact,
    ) -> Result<Credential, ClientError>;
    async fn exchange_test_credential(&self, secret: &str) -> Result<Credential, ClientError>;
}

pub struct HttpGateway {
    http: Client,
    server_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpGateway {
    pub fn new(
        server_url: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, ClientError> {
        let mut builder = Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|err| ClientError::Config(format!("failed to build http client: {err}")))?;
        let server_url = server_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            server_url,
            credentials,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let credential = self
            .credentials
            .load()
            .await?
            .ok_or(ClientError::NotSignedIn)?;
        let response = request.bearer_auth(&credential.access_token).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(api) => Err(ClientError::Api(api.into())),
        Err(_) => Err(ClientError::Status {
            status: status.as_u16(),
            body,
        }),
    }
}

#[async_trait]
impl BackendGateway for HttpGateway {
    async fn fetch_all(&self) -> Result<Vec<Item>, ClientError> {
        let items: Vec<Item> = self
            .authorized(self.http.get(format!("{}/items", self.server_url)))
            .await?
            .json()
            .await?;
        debug!(count = items.len(), "fetched items");
        Ok(items)
    }

    async fn create(&self, draft: &ItemDraft) -> Result<Item, ClientError> {
        let item = self
            .authorized(
                self.http
                    .post(format!("{}/items", self.server_url))
                    .json(draft),
            )
            .await?
            .json()
            .await?;
        Ok(item)
    }

    async fn update(&self, item: &Item) -> Result<Item, ClientError> {
        let updated = self
            .authorized(
                self.http
                    .put(format!("{}/items/{}", self.server_url, item.id))
                    .json(item),
            )
            .await?
            .json()
            .await?;
        Ok(updated)
    }

    async fn delete(&self, id: &ItemId) -> Result<(), ClientError> {
        self.authorized(
            self.http
                .delete(format!("{}/items/{}", self.server_url, id)),
        )
        .await?;
        Ok(())
    }

    async fn exchange_credential(
        &self,
        artifact: &AuthorizationArtifact,
    ) -> Result<Credential, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/exchange", self.server_url))
            .json(&CredentialExchangeRequest {
                authorization_code: artifact.clone(),
            })
            .send()
            .await?;
        let body: CredentialExchangeResponse = check_status(response).await?.json().await?;
        info!("exchanged authorization artifact for access credential");
        Ok(body.into())
    }

    async fn exchange_test_credential(&self, secret: &str) -> Result<Credential, ClientError> {
        let response = self
            .http
            .post(format!("{}/auth/test-credential", self.server_url))
            .json(&TestCredentialRequest {
                test_credential: secret.to_string(),
            })
            .send()
            .await?;
        let body: CredentialExchangeResponse = check_status(response).await?.json().await?;
        info!("exchanged test credential for access credential");
        Ok(body.into())
    }
}

/// In-process backend. Assigns ids "1", "2", ... and can be told to fail
/// upcoming calls.
#[derive(Default)]
pub struct MemoryGateway {
    inner: Mutex<MemoryBackend>,
}

#[derive(Default)]
struct MemoryBackend {
    items: Vec<Item>,
    next_id: u64,
    issued_tokens: u64,
    test_secret: Option<String>,
    failures: VecDeque<ClientError>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: Vec<Item>) -> Self {
        let gateway = Self::default();
        {
            let mut backend = gateway.backend();
            backend.next_id = items.len() as u64;
            backend.items = items;
        }
        gateway
    }

    pub fn accept_test_credential(self, secret: impl Into<String>) -> Self {
        self.backend().test_secret = Some(secret.into());
        self
    }

    /// Makes the next call fail with `err`.
    pub fn fail_next(&self, err: ClientError) {
        self.backend().failures.push_back(err);
    }

    pub fn items(&self) -> Vec<Item> {
        self.backend().items.clone()
    }

    fn backend(&self) -> MutexGuard<'_, MemoryBackend> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self) -> Result<MutexGuard<'_, MemoryBackend>, ClientError> {
        let mut backend = self.backend();
        match backend.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(backend),
        }
    }
}

fn not_found(id: &ItemId) -> ClientError {
    ClientError::Api(ApiException::item_not_found(id))
}

impl MemoryBackend {
    fn issue_token(&mut self) -> Credential {
        self.issued_tokens += 1;
        Credential::bearer(format!("memory-token-{}", self.issued_tokens))
    }
}

#[async_trait]
impl BackendGateway for MemoryGateway {
    async fn fetch_all(&self) -> Result<Vec<Item>, ClientError> {
        Ok(self.begin()?.items.clone())
    }

    async fn create(&self, draft: &ItemDraft) -> Result<Item, ClientError> {
        let mut backend = self.begin()?;
        backend.next_id += 1;
        let item = Item::new(
            ItemId(backend.next_id.to_string()),
            draft.body.clone(),
            draft.completed,
        );
        backend.items.push(item.clone());
        Ok(item)
    }

    async fn update(&self, item: &Item) -> Result<Item, ClientError> {
        let mut backend = self.begin()?;
        let existing = backend
            .items
            .iter_mut()
            .find(|existing| existing.id == item.id)
            .ok_or_else(|| not_found(&item.id))?;
        *existing = item.clone();
        Ok(item.clone())
    }

    async fn delete(&self, id: &ItemId) -> Result<(), ClientError> {
        let mut backend = self.begin()?;
        let before = backend.items.len();
        backend.items.retain(|item| &item.id != id);
        if backend.items.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }

    async fn exchange_credential(
        &self,
        artifact: &AuthorizationArtifact,
    ) -> Result<Credential, ClientError> {
        let mut backend = self.begin()?;
        if artifact.0.trim().is_empty() {
            return Err(ClientError::Unauthorized);
        }
        Ok(backend.issue_token())
    }

    async fn exchange_test_credential(&self, secret: &str) -> Result<Credential, ClientError> {
        let mut backend = self.begin()?;
        if backend.test_secret.as_deref() != Some(secret) {
            return Err(ClientError::Unauthorized);
        }
        Ok(backend.issue_token())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
