//! Session operations and the sign-in state machine.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::Utc;
use shared::{
    domain::Identity,
    protocol::{AuthorizationGrant, Credential},
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    credentials::CredentialStore,
    error::{ClientError, SessionError},
    foreground::{Dispatcher, Foreground, Operation, Outcome},
    gateway::BackendGateway,
    identity::IdentityProvider,
    state::SessionStatus,
    store::{IdentityChange, IgnoreReason, StoreWriter},
};

pub trait SessionInteractor: Send + Sync {
    /// Resolves the launch-time `Loading` status from the stored credential.
    fn check_session(&self) -> Operation;
    /// Exchanges an authorization grant for an access credential.
    fn login(&self, grant: AuthorizationGrant) -> Operation;
    /// Runs whichever sign-in path this interactor was built with, end to end.
    fn sign_in(&self) -> Operation;
    fn logout(&self) -> Operation;
    fn shutdown(&self);
}

/// How `login`/`sign_in` obtain a credential. Fixed when the interactor is
/// built.
#[derive(Clone)]
pub enum LoginPath {
    Delegated,
    /// Skips the identity provider and exchanges a fixed secret. For
    /// environments where the delegated flow cannot run.
    TestCredential { secret: String, identity: Identity },
}

impl std::fmt::Debug for LoginPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delegated => f.write_str("Delegated"),
            Self::TestCredential { identity, .. } => f
                .debug_struct("TestCredential")
                .field("identity", identity)
                .finish_non_exhaustive(),
        }
    }
}

/// Moves `SignedOut -> Loading` at the start of a login attempt.
pub(crate) fn begin_login(writer: &StoreWriter<'_>) -> Result<(), ClientError> {
    let current = writer.state().session().label();
    writer
        .transition_session(SessionStatus::Loading, IdentityChange::Keep)
        .map_err(|_| {
            ClientError::SessionBusy(format!(
                "cannot start a login while the session is {current}"
            ))
        })
}

/// Applies the end of a login or session check: `Loading -> SignedIn` on
/// success, `Loading -> SignedOut(error)` on failure.
pub(crate) fn finish_sign_in(
    writer: &StoreWriter<'_>,
    operation: &'static str,
    result: Result<Option<Identity>, ClientError>,
) -> Result<Outcome, ClientError> {
    let (next, identity, failure) = match result {
        Ok(identity) => (
            SessionStatus::SignedIn,
            identity.map_or(IdentityChange::Keep, IdentityChange::Set),
            None,
        ),
        Err(err) => (
            SessionStatus::SignedOut(Some(SessionError::from(&err))),
            IdentityChange::Clear,
            Some(err),
        ),
    };

    let applied = writer.transition_session(next, identity);
    if let Err(reason) = &applied {
        writer.ignored(operation, reason.clone());
    }
    match (failure, applied) {
        (Some(err), _) => Err(err),
        (None, Ok(())) => Ok(Outcome::Applied),
        (None, Err(reason)) => Ok(Outcome::Ignored(reason)),
    }
}

/// `Loading -> SignedOut(None)` when launch finds nothing to resume.
pub(crate) fn finish_without_credential(writer: &StoreWriter<'_>) -> Outcome {
    transition_or_ignore(writer, "check_session", SessionStatus::SignedOut(None))
}

/// `SignedIn -> SignedOut(None)`.
pub(crate) fn finish_sign_out(writer: &StoreWriter<'_>) -> Outcome {
    transition_or_ignore(writer, "logout", SessionStatus::SignedOut(None))
}

fn transition_or_ignore(
    writer: &StoreWriter<'_>,
    operation: &'static str,
    next: SessionStatus,
) -> Outcome {
    match writer.transition_session(next, IdentityChange::Clear) {
        Ok(()) => Outcome::Applied,
        Err(reason) => {
            writer.ignored(operation, reason.clone());
            Outcome::Ignored(reason)
        }
    }
}

pub(crate) enum StoredSession {
    Valid(Option<Identity>),
    Absent,
}

async fn load_stored_session(
    credentials: &dyn CredentialStore,
) -> Result<StoredSession, ClientError> {
    match credentials.load().await? {
        Some(credential) if !credential.is_expired_at(Utc::now()) => {
            Ok(StoredSession::Valid(credential.identity))
        }
        Some(_) => {
            info!("stored credential expired");
            credentials.clear().await?;
            Ok(StoredSession::Absent)
        }
        None => Ok(StoredSession::Absent),
    }
}

pub(crate) fn apply_stored_session(
    writer: &StoreWriter<'_>,
    result: Result<StoredSession, ClientError>,
) -> Result<Outcome, ClientError> {
    match result {
        Ok(StoredSession::Valid(identity)) => finish_sign_in(writer, "check_session", Ok(identity)),
        Ok(StoredSession::Absent) => Ok(finish_without_credential(writer)),
        Err(err) => finish_sign_in(writer, "check_session", Err(err)),
    }
}

type Exchange = (Credential, Option<Identity>);

/// Orders credential writes against the session. Each login attempt and each
/// logout takes a ticket; a login may only store its credential, and later
/// sign in, while its ticket is still the newest one.
#[derive(Default)]
struct CredentialGate {
    newest: AtomicU64,
    writes: Mutex<()>,
}

impl CredentialGate {
    fn next_ticket(&self) -> u64 {
        self.newest.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.newest.load(Ordering::Acquire) == ticket
    }

    /// Returns `false` without touching the store when `ticket` has been
    /// overtaken.
    async fn persist(
        &self,
        ticket: u64,
        credentials: &dyn CredentialStore,
        credential: &Credential,
    ) -> Result<bool, ClientError> {
        let _writes = self.writes.lock().await;
        if !self.is_current(ticket) {
            return Ok(false);
        }
        credentials.save(credential).await?;
        Ok(true)
    }

    async fn revoke(&self, credentials: &dyn CredentialStore) -> Result<(), ClientError> {
        let _writes = self.writes.lock().await;
        self.next_ticket();
        credentials.clear().await
    }
}

enum LoginCompletion {
    Stored(Option<Identity>),
    Failed(ClientError),
    Superseded,
}

fn finish_login(
    writer: &StoreWriter<'_>,
    operation: &'static str,
    gate: &CredentialGate,
    ticket: u64,
    completion: LoginCompletion,
) -> Result<Outcome, ClientError> {
    let current = gate.is_current(ticket);
    let result = match completion {
        LoginCompletion::Stored(identity) if current => Ok(identity),
        LoginCompletion::Failed(err) if current => Err(err),
        LoginCompletion::Failed(err) => {
            writer.ignored(operation, IgnoreReason::SupersededLogin);
            return Err(err);
        }
        LoginCompletion::Stored(_) | LoginCompletion::Superseded => {
            info!(operation, "login superseded; nothing stored");
            writer.ignored(operation, IgnoreReason::SupersededLogin);
            return Ok(Outcome::Ignored(IgnoreReason::SupersededLogin));
        }
    };
    finish_sign_in(writer, operation, result)
}

pub struct LiveSessionInteractor {
    gateway: Arc<dyn BackendGateway>,
    credentials: Arc<dyn CredentialStore>,
    identity_provider: Arc<dyn IdentityProvider>,
    login_path: LoginPath,
    gate: Arc<CredentialGate>,
    dispatcher: Dispatcher,
}

impl LiveSessionInteractor {
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        credentials: Arc<dyn CredentialStore>,
        identity_provider: Arc<dyn IdentityProvider>,
        login_path: LoginPath,
        foreground: Foreground,
    ) -> Self {
        Self {
            gateway,
            credentials,
            identity_provider,
            login_path,
            gate: Arc::new(CredentialGate::default()),
            dispatcher: Dispatcher::new("session", foreground),
        }
    }

    pub fn login_path(&self) -> &LoginPath {
        &self.login_path
    }

    /// Shared body of `login` and `sign_in`: flip to `Loading`, obtain a
    /// credential, persist it, then apply the identity.
    fn run_login<F, Fut>(&self, operation: &'static str, exchange: F) -> Operation
    where
        F: FnOnce(Arc<dyn BackendGateway>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Exchange, ClientError>> + Send + 'static,
    {
        let gateway = Arc::clone(&self.gateway);
        let credentials = Arc::clone(&self.credentials);
        let foreground = self.dispatcher.foreground().clone();
        let gate = Arc::clone(&self.gate);
        let apply_gate = Arc::clone(&self.gate);

        self.dispatcher.dispatch(
            operation,
            async move {
                let ticket = {
                    let gate = Arc::clone(&gate);
                    foreground
                        .run(move |writer| begin_login(writer).map(|()| gate.next_ticket()))
                        .await??
                };
                let completion = match exchange(gateway).await {
                    Ok((credential, identity)) => {
                        let identity = identity.or_else(|| credential.identity.clone());
                        match gate.persist(ticket, credentials.as_ref(), &credential).await {
                            Ok(true) => {
                                info!(operation, "credential stored");
                                LoginCompletion::Stored(identity)
                            }
                            Ok(false) => LoginCompletion::Superseded,
                            Err(err) => LoginCompletion::Failed(err),
                        }
                    }
                    Err(err) => LoginCompletion::Failed(err),
                };
                Ok::<_, ClientError>((ticket, completion))
            },
            // Errors at this level (busy, cancelled) never moved the store.
            move |writer, result| {
                let (ticket, completion) = result?;
                finish_login(writer, operation, &apply_gate, ticket, completion)
            },
        )
    }
}

impl SessionInteractor for LiveSessionInteractor {
    fn check_session(&self) -> Operation {
        let credentials = Arc::clone(&self.credentials);
        self.dispatcher.dispatch(
            "check_session",
            async move { load_stored_session(credentials.as_ref()).await },
            apply_stored_session,
        )
    }

    fn login(&self, grant: AuthorizationGrant) -> Operation {
        match self.login_path.clone() {
            LoginPath::Delegated => self.run_login("login", move |gateway| async move {
                let credential = gateway.exchange_credential(&grant.artifact).await?;
                Ok::<_, ClientError>((credential, Some(grant.identity)))
            }),
            LoginPath::TestCredential { secret, .. } => {
                self.run_login("login", move |gateway| async move {
                    let credential = gateway.exchange_test_credential(&secret).await?;
                    Ok::<_, ClientError>((credential, Some(grant.identity)))
                })
            }
        }
    }

    fn sign_in(&self) -> Operation {
        match self.login_path.clone() {
            LoginPath::Delegated => {
                let provider = Arc::clone(&self.identity_provider);
                self.run_login("sign_in", move |gateway| async move {
                    let grant = provider.sign_in().await?;
                    let credential = gateway.exchange_credential(&grant.artifact).await?;
                    Ok::<_, ClientError>((credential, Some(grant.identity)))
                })
            }
            LoginPath::TestCredential { secret, identity } => {
                self.run_login("sign_in", move |gateway| async move {
                    let credential = gateway.exchange_test_credential(&secret).await?;
                    let identity = credential.identity.clone().unwrap_or(identity);
                    Ok::<_, ClientError>((credential, Some(identity)))
                })
            }
        }
    }

    fn logout(&self) -> Operation {
        let credentials = Arc::clone(&self.credentials);
        let gate = Arc::clone(&self.gate);
        self.dispatcher.dispatch(
            "logout",
            async move {
                if let Err(err) = gate.revoke(credentials.as_ref()).await {
                    warn!(error = %err, "failed to clear stored credential on logout");
                }
                Ok::<_, ClientError>(())
            },
            |writer, result: Result<(), ClientError>| {
                result?;
                Ok(finish_sign_out(writer))
            },
        )
    }

    fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
