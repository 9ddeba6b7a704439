//! Client-side state synchronization: one observable store, interactors that
//! turn user intent into backend calls and fold confirmed results back in,
//! and a container that wires them together.

pub mod config;
pub mod container;
pub mod credentials;
pub mod error;
pub mod foreground;
pub mod gateway;
pub mod identity;
pub mod items;
pub mod presentation;
pub mod preview;
pub mod session;
pub mod state;
pub mod store;

pub use config::{load_settings, InteractorMode, LoginMode, Settings};
pub use container::{AppContainer, ContainerBuilder, InteractorContext};
pub use credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use error::{ClientError, SessionError, SessionErrorKind};
pub use foreground::{Dispatcher, Foreground, Operation, Outcome, OwnerScope};
pub use gateway::{BackendGateway, HttpGateway, MemoryGateway};
pub use identity::{IdentityProvider, MissingIdentityProvider, StaticIdentityProvider};
pub use items::{ItemInteractor, LiveItemInteractor};
pub use presentation::{
    renderer_for, DeviceCapability, EditShadow, InputAction, ItemRenderer, SessionRoute,
};
pub use preview::{PreviewItemInteractor, PreviewSessionInteractor};
pub use session::{LiveSessionInteractor, LoginPath, SessionInteractor};
pub use state::{AppState, SessionStatus};
pub use store::{IgnoreReason, Store, StoreEvent, Subscription};

#[cfg(test)]
pub(crate) mod testing;
