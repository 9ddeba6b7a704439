//! Shared fixtures for the unit tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{Item, ItemDraft, ItemId},
    protocol::{AuthorizationArtifact, Credential},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    config::Settings,
    container::AppContainer,
    credentials::{CredentialStore, MemoryCredentialStore},
    error::ClientError,
    foreground::Foreground,
    gateway::BackendGateway,
    state::{AppState, SessionStatus},
    store::{Store, Subscription},
};

pub(crate) const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn spawn_foreground() -> (Store, Foreground, JoinHandle<()>) {
    let store = Store::new(64);
    let (foreground, task) = Foreground::spawn(store.clone());
    (store, foreground, task)
}

/// Records every session status the store publishes, starting with the
/// current one.
pub(crate) fn record_sessions(store: &Store) -> (Arc<Mutex<Vec<SessionStatus>>>, Subscription) {
    let seen = Arc::new(Mutex::new(vec![store.snapshot().session().clone()]));
    let sink = Arc::clone(&seen);
    let subscription = store.subscribe(move |state: &AppState| {
        let mut seen = sink.lock().expect("lock");
        if seen.last() != Some(state.session()) {
            seen.push(state.session().clone());
        }
    });
    (seen, subscription)
}

pub(crate) fn assert_valid_session_path(seen: &[SessionStatus]) {
    for pair in seen.windows(2) {
        assert!(
            pair[0].can_transition_to(&pair[1]),
            "invalid session transition {:?} -> {:?} in {seen:?}",
            pair[0],
            pair[1]
        );
    }
}

pub(crate) fn container_with(
    gateway: Arc<dyn BackendGateway>,
    credentials: Arc<dyn CredentialStore>,
) -> AppContainer {
    AppContainer::builder(Settings::default())
        .gateway(gateway)
        .credentials(credentials)
        .build()
        .expect("container")
}

pub(crate) fn memory_credentials() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credential(Credential::bearer(
        "test-token",
    )))
}

/// One gateway call waiting for the test to answer it.
pub(crate) enum Call {
    FetchAll(oneshot::Sender<Result<Vec<Item>, ClientError>>),
    Create(ItemDraft, oneshot::Sender<Result<Item, ClientError>>),
    Update(Item, oneshot::Sender<Result<Item, ClientError>>),
    Delete(ItemId, oneshot::Sender<Result<(), ClientError>>),
    Exchange(
        AuthorizationArtifact,
        oneshot::Sender<Result<Credential, ClientError>>,
    ),
    TestExchange(String, oneshot::Sender<Result<Credential, ClientError>>),
}

impl Call {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::FetchAll(_) => "fetch_all",
            Self::Create(..) => "create",
            Self::Update(..) => "update",
            Self::Delete(..) => "delete",
            Self::Exchange(..) => "exchange",
            Self::TestExchange(..) => "test_exchange",
        }
    }
}

/// Gateway whose calls stay pending until the test resolves them, so
/// completion order is fully under test control.
pub(crate) struct ScriptedGateway {
    calls: mpsc::UnboundedSender<Call>,
}

pub(crate) struct Script {
    calls: mpsc::UnboundedReceiver<Call>,
}

impl ScriptedGateway {
    pub(crate) fn new() -> (Arc<Self>, Script) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { calls }), Script { calls: rx })
    }

    async fn pending<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> Call,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.calls
            .send(make(tx))
            .map_err(|_| ClientError::Transport("script closed".into()))?;
        rx.await
            .map_err(|_| ClientError::Transport("script dropped the call".into()))?
    }
}

impl Script {
    pub(crate) async fn next(&mut self) -> Call {
        tokio::time::timeout(WAIT, self.calls.recv())
            .await
            .expect("timed out waiting for gateway call")
            .expect("gateway dropped")
    }

    pub(crate) async fn next_fetch(&mut self) -> oneshot::Sender<Result<Vec<Item>, ClientError>> {
        match self.next().await {
            Call::FetchAll(reply) => reply,
            other => panic!("expected fetch_all, got {}", other.name()),
        }
    }

    pub(crate) async fn next_create(
        &mut self,
    ) -> (ItemDraft, oneshot::Sender<Result<Item, ClientError>>) {
        match self.next().await {
            Call::Create(draft, reply) => (draft, reply),
            other => panic!("expected create, got {}", other.name()),
        }
    }

    pub(crate) async fn next_update(&mut self) -> (Item, oneshot::Sender<Result<Item, ClientError>>) {
        match self.next().await {
            Call::Update(item, reply) => (item, reply),
            other => panic!("expected update, got {}", other.name()),
        }
    }

    pub(crate) async fn next_delete(
        &mut self,
    ) -> (ItemId, oneshot::Sender<Result<(), ClientError>>) {
        match self.next().await {
            Call::Delete(id, reply) => (id, reply),
            other => panic!("expected delete, got {}", other.name()),
        }
    }

    pub(crate) async fn next_exchange(
        &mut self,
    ) -> (
        AuthorizationArtifact,
        oneshot::Sender<Result<Credential, ClientError>>,
    ) {
        match self.next().await {
            Call::Exchange(artifact, reply) => (artifact, reply),
            other => panic!("expected exchange, got {}", other.name()),
        }
    }

    pub(crate) async fn next_test_exchange(
        &mut self,
    ) -> (String, oneshot::Sender<Result<Credential, ClientError>>) {
        match self.next().await {
            Call::TestExchange(secret, reply) => (secret, reply),
            other => panic!("expected test exchange, got {}", other.name()),
        }
    }
}

#[async_trait]
impl BackendGateway for ScriptedGateway {
    async fn fetch_all(&self) -> Result<Vec<Item>, ClientError> {
        self.pending(Call::FetchAll).await
    }

    async fn create(&self, draft: &ItemDraft) -> Result<Item, ClientError> {
        let draft = draft.clone();
        self.pending(move |reply| Call::Create(draft, reply)).await
    }

    async fn update(&self, item: &Item) -> Result<Item, ClientError> {
        let item = item.clone();
        self.pending(move |reply| Call::Update(item, reply)).await
    }

    async fn delete(&self, id: &ItemId) -> Result<(), ClientError> {
        let id = id.clone();
        self.pending(move |reply| Call::Delete(id, reply)).await
    }

    async fn exchange_credential(
        &self,
        artifact: &AuthorizationArtifact,
    ) -> Result<Credential, ClientError> {
        let artifact = artifact.clone();
        self.pending(move |reply| Call::Exchange(artifact, reply))
            .await
    }

    async fn exchange_test_credential(&self, secret: &str) -> Result<Credential, ClientError> {
        let secret = secret.to_string();
        self.pending(move |reply| Call::TestExchange(secret, reply))
            .await
    }
}
