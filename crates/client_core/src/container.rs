//! The one place that wires gateway, store and interactors together.
//!
//! Everything an interactor needs is handed to it through an explicit
//! [`InteractorContext`]. Alternate implementations are swapped in with
//! [`ContainerBuilder::item_interactor`] /
//! [`ContainerBuilder::session_interactor`] before `build`; consumers only
//! ever see the trait objects.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    config::{InteractorMode, Settings},
    credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore},
    error::ClientError,
    foreground::Foreground,
    gateway::{BackendGateway, HttpGateway},
    identity::{IdentityProvider, MissingIdentityProvider},
    items::{ItemInteractor, LiveItemInteractor},
    presentation::{renderer_for, DeviceCapability, ItemRenderer},
    preview::{PreviewItemInteractor, PreviewSessionInteractor},
    session::{LiveSessionInteractor, LoginPath, SessionInteractor},
    store::Store,
};

/// Collaborators available to interactor factories.
#[derive(Clone)]
pub struct InteractorContext {
    pub foreground: Foreground,
    pub gateway: Arc<dyn BackendGateway>,
    pub credentials: Arc<dyn CredentialStore>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub login_path: LoginPath,
}

type ItemFactory = Box<dyn FnOnce(&InteractorContext) -> Arc<dyn ItemInteractor> + Send>;
type SessionFactory = Box<dyn FnOnce(&InteractorContext) -> Arc<dyn SessionInteractor> + Send>;

pub struct ContainerBuilder {
    settings: Settings,
    gateway: Option<Arc<dyn BackendGateway>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    items: Option<ItemFactory>,
    session: Option<SessionFactory>,
}

impl ContainerBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            gateway: None,
            credentials: None,
            identity_provider: None,
            items: None,
            session: None,
        }
    }

    pub fn gateway(mut self, gateway: Arc<dyn BackendGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_provider = Some(provider);
        self
    }

    pub fn item_interactor<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&InteractorContext) -> Arc<dyn ItemInteractor> + Send + 'static,
    {
        self.items = Some(Box::new(factory));
        self
    }

    pub fn session_interactor<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&InteractorContext) -> Arc<dyn SessionInteractor> + Send + 'static,
    {
        self.session = Some(Box::new(factory));
        self
    }

    /// Must run inside a tokio runtime: it starts the foreground loop.
    pub fn build(self) -> Result<AppContainer, ClientError> {
        tokio::runtime::Handle::try_current().map_err(|_| {
            ClientError::Config("the container must be built inside a tokio runtime".into())
        })?;
        self.settings.validate()?;
        let login_path = self.settings.login_path()?;

        let credentials: Arc<dyn CredentialStore> = match self.credentials {
            Some(credentials) => credentials,
            None => match &self.settings.credential_path {
                Some(path) => Arc::new(FileCredentialStore::new(path)),
                None => Arc::new(MemoryCredentialStore::new()),
            },
        };
        let gateway: Arc<dyn BackendGateway> = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(HttpGateway::new(
                self.settings.backend_url.clone(),
                Arc::clone(&credentials),
                self.settings.request_timeout(),
            )?),
        };
        let identity_provider: Arc<dyn IdentityProvider> = match self.identity_provider {
            Some(provider) => provider,
            None => Arc::new(MissingIdentityProvider),
        };

        let store = Store::new(self.settings.event_capacity);
        let (foreground, foreground_task) = Foreground::spawn(store.clone());

        let context = InteractorContext {
            foreground: foreground.clone(),
            gateway,
            credentials,
            identity_provider,
            login_path,
        };

        let mode = self.settings.interactors;
        let items = match self.items {
            Some(factory) => factory(&context),
            None => default_items(mode, &context),
        };
        let session = match self.session {
            Some(factory) => factory(&context),
            None => default_session(mode, &context),
        };

        info!(
            interactors = ?mode,
            device = %self.settings.device,
            login_path = ?context.login_path,
            "app container ready"
        );

        Ok(AppContainer {
            store,
            items,
            session,
            foreground,
            capability: self.settings.device,
            foreground_task: Mutex::new(Some(foreground_task)),
        })
    }
}

fn default_items(mode: InteractorMode, context: &InteractorContext) -> Arc<dyn ItemInteractor> {
    match mode {
        InteractorMode::Live => Arc::new(LiveItemInteractor::new(
            Arc::clone(&context.gateway),
            context.foreground.clone(),
        )),
        InteractorMode::Preview => Arc::new(PreviewItemInteractor::sample(
            context.foreground.clone(),
        )),
    }
}

fn default_session(
    mode: InteractorMode,
    context: &InteractorContext,
) -> Arc<dyn SessionInteractor> {
    match mode {
        InteractorMode::Live => Arc::new(LiveSessionInteractor::new(
            Arc::clone(&context.gateway),
            Arc::clone(&context.credentials),
            Arc::clone(&context.identity_provider),
            context.login_path.clone(),
            context.foreground.clone(),
        )),
        InteractorMode::Preview => Arc::new(PreviewSessionInteractor::signed_in(
            context.foreground.clone(),
            PreviewSessionInteractor::preview_identity(),
        )),
    }
}

/// Store plus interactors, as handed to presentation surfaces.
pub struct AppContainer {
    store: Store,
    items: Arc<dyn ItemInteractor>,
    session: Arc<dyn SessionInteractor>,
    foreground: Foreground,
    capability: DeviceCapability,
    foreground_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppContainer {
    pub fn builder(settings: Settings) -> ContainerBuilder {
        ContainerBuilder::new(settings)
    }

    pub fn live(settings: Settings) -> Result<Self, ClientError> {
        ContainerBuilder::new(settings).build()
    }

    pub fn preview() -> Result<Self, ClientError> {
        ContainerBuilder::new(Settings::preview()).build()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn items(&self) -> &dyn ItemInteractor {
        self.items.as_ref()
    }

    pub fn session(&self) -> &dyn SessionInteractor {
        self.session.as_ref()
    }

    pub fn capability(&self) -> DeviceCapability {
        self.capability
    }

    pub fn renderer(&self) -> Box<dyn ItemRenderer> {
        renderer_for(self.capability)
    }

    /// Waits until every completion queued so far has been applied.
    pub async fn settle(&self) {
        self.foreground.flush().await;
    }

    /// Tears down both interactors and stops the foreground loop. Completions
    /// that have not applied yet are dropped.
    pub fn shutdown(&self) {
        self.items.shutdown();
        self.session.shutdown();
        let task = self
            .foreground_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            info!("app container shut down");
        }
    }
}

impl Drop for AppContainer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/container_tests.rs"]
mod tests;
